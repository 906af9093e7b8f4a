pub mod backend_users;
pub mod database;
pub mod migrations;
pub mod registry;

pub use backend_users::{BackendUser, UserConfigRow};
pub use database::Database;
pub use migrations::{AppliedMigration, MIGRATIONS, Migration};
