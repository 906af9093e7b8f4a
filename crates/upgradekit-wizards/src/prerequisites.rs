use std::sync::Arc;

use tracing::info;
use upgradekit_common::Result;
use upgradekit_db::Database;

use crate::wizard::Prerequisite;

/// Holds when every schema migration has been applied.
pub struct DatabaseUpdatedPrerequisite {
    db: Arc<Database>,
}

impl DatabaseUpdatedPrerequisite {
    pub const IDENTIFIER: &'static str = "databaseUpdated";

    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl Prerequisite for DatabaseUpdatedPrerequisite {
    fn identifier(&self) -> &'static str {
        Self::IDENTIFIER
    }

    fn title(&self) -> &'static str {
        "Database Up-to-Date"
    }

    fn is_fulfilled(&self) -> Result<bool> {
        Ok(self.db.pending_migrations()?.is_empty())
    }

    fn ensure(&self) -> Result<bool> {
        let applied = self.db.migrate()?;
        if applied > 0 {
            info!("database schema updated ({applied} migration(s) applied)");
        }
        self.is_fulfilled()
    }
}
