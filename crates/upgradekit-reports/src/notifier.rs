use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use upgradekit_common::Result;
use upgradekit_common::serialized::Value;
use upgradekit_db::Database;

use crate::severity::Severity;

const REGISTRY_NAMESPACE: &str = "tx_reports";
const REGISTRY_KEY: &str = "status.highestSeverity";

/// Key under which the status notification is added to the message list.
pub const NOTIFICATION_KEY: &str = "tx_reports_status_notification";

/// Module that shows the detailed status report.
pub const REPORT_MODULE: &str = "system_ReportsTxreportsm1";

const PROBLEM_NOTIFICATION: &str = "One or more problems were detected with your installation. \
     Please check the status report for more information.";

/// Who is looking at the warning messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Viewer {
    pub is_admin: bool,
}

/// A warning message pointing at a backend module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningMessage {
    pub text: String,
    pub module: String,
    pub parameters: Vec<(String, String)>,
}

/// Surfaces the highest recorded system status severity as an admin warning.
pub struct StatusNotifier {
    db: Arc<Database>,
}

impl StatusNotifier {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The highest severity level recorded by the last status check, if any.
    /// Levels outside the known [`Severity`] range are returned as stored.
    pub fn highest_severity(&self) -> Result<Option<i64>> {
        let Some(value) = self.db.registry_get(REGISTRY_NAMESPACE, REGISTRY_KEY, None)? else {
            return Ok(None);
        };
        let level = match &value {
            Value::Int(n) => Some(*n),
            Value::Str(_) => value.as_str().and_then(|s| s.trim().parse().ok()),
            _ => None,
        };
        if level.is_none() {
            warn!("ignoring non-numeric highest severity value: {value:?}");
        }
        Ok(level)
    }

    pub fn store_highest_severity(&self, severity: Severity) -> Result<()> {
        self.db.registry_set(
            REGISTRY_NAMESPACE,
            REGISTRY_KEY,
            &Value::Int(severity.as_i64()),
        )
    }

    /// Add the status notification to `messages` when an admin is viewing and
    /// the recorded severity is worse than OK. Otherwise leave it untouched.
    pub fn post_process(
        &self,
        viewer: &Viewer,
        messages: &mut BTreeMap<String, WarningMessage>,
    ) -> Result<()> {
        if !viewer.is_admin {
            return Ok(());
        }
        let Some(level) = self.highest_severity()? else {
            debug!("no status severity recorded");
            return Ok(());
        };
        if level <= Severity::Ok.as_i64() {
            return Ok(());
        }

        match Severity::from_i64(level) {
            Some(severity) => debug!("highest status severity is {severity}, adding notification"),
            None => debug!("highest status severity level is {level}, adding notification"),
        }
        messages.insert(
            NOTIFICATION_KEY.to_string(),
            WarningMessage {
                text: PROBLEM_NOTIFICATION.to_string(),
                module: REPORT_MODULE.to_string(),
                parameters: report_parameters(),
            },
        );
        Ok(())
    }
}

fn report_parameters() -> Vec<(String, String)> {
    [
        ("extension", "tx_reports"),
        ("report", "status"),
        ("action", "detail"),
        ("controller", "Report"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
