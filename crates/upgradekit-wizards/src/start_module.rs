use std::sync::Arc;

use tracing::{debug, info, warn};
use upgradekit_common::Result;
use upgradekit_common::serialized::{self, Array, ObjectPolicy, Value};
use upgradekit_db::UserConfigRow;

use crate::prerequisites::DatabaseUpdatedPrerequisite;
use crate::store::UserConfigStore;
use crate::wizard::UpgradeWizard;

const START_MODULE_KEY: &str = "startModule";

/// Historical spellings of the about-modules start module.
pub const LEGACY_START_MODULES: [&str; 3] = [
    "help_aboutmodules",
    "help_AboutmodulesAboutmodules",
    "help_AboutAboutmodules",
];

/// Start module written in place of any legacy spelling.
pub const START_MODULE: &str = "help_AboutAbout";

/// Rewrites the `startModule` user setting of backend users that still point
/// at the renamed about-modules module.
pub struct StartModuleUpdate {
    store: Arc<dyn UserConfigStore>,
}

impl StartModuleUpdate {
    pub const IDENTIFIER: &'static str = "startModuleUpdate";

    pub fn new(store: Arc<dyn UserConfigStore>) -> Self {
        Self { store }
    }

    /// The decoded configuration of `row` if its start module is a legacy one.
    fn legacy_config(row: &UserConfigRow) -> Option<Array> {
        let uc = row.uc.as_deref()?;
        let config = match serialized::decode(uc, ObjectPolicy::Inert) {
            Ok(Value::Array(config)) => config,
            Ok(_) => return None,
            Err(e) => {
                warn!("skipping backend user {}: undecodable uc: {e}", row.uid);
                return None;
            }
        };
        is_legacy_start_module(config.get(START_MODULE_KEY)).then_some(config)
    }
}

fn is_legacy_start_module(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_bytes)
        .is_some_and(|module| LEGACY_START_MODULES.iter().any(|m| m.as_bytes() == module))
}

impl UpgradeWizard for StartModuleUpdate {
    fn identifier(&self) -> &'static str {
        Self::IDENTIFIER
    }

    fn title(&self) -> &'static str {
        "Update backend user setting \"startModule\""
    }

    fn description(&self) -> &'static str {
        "The backend user setting startModule is changed for the extensions about/aboutmodules. \
         Update all backend users that use ext:aboutmodules as startModule."
    }

    fn prerequisites(&self) -> Vec<&'static str> {
        vec![DatabaseUpdatedPrerequisite::IDENTIFIER]
    }

    fn is_necessary(&self) -> Result<bool> {
        let rows = self.store.fetch_user_configs()?;
        Ok(rows.iter().any(|row| Self::legacy_config(row).is_some()))
    }

    fn execute(&self) -> Result<bool> {
        // Fresh read: rows may have changed since is_necessary ran.
        let rows = self.store.fetch_user_configs()?;
        let mut migrated = 0usize;

        for row in &rows {
            let Some(mut config) = Self::legacy_config(row) else {
                continue;
            };
            config.insert(START_MODULE_KEY, Value::from(START_MODULE));
            let encoded = serialized::encode(&Value::Array(config));
            self.store.store_user_config(row.uid, &encoded)?;
            debug!("backend user {}: startModule set to {START_MODULE}", row.uid);
            migrated += 1;
        }

        info!(
            "{}: updated {migrated} of {} backend user(s)",
            Self::IDENTIFIER,
            rows.len()
        );
        Ok(true)
    }
}
