pub mod notifier;
pub mod severity;

pub use notifier::{StatusNotifier, Viewer, WarningMessage};
pub use severity::Severity;
