pub mod prerequisites;
pub mod runner;
pub mod start_module;
pub mod store;
pub mod wizard;

pub use prerequisites::DatabaseUpdatedPrerequisite;
pub use runner::{DONE_NAMESPACE, RunOutcome, UpgradeRunner, WizardState, WizardStatus};
pub use start_module::StartModuleUpdate;
pub use store::UserConfigStore;
pub use wizard::{Prerequisite, UpgradeWizard};
