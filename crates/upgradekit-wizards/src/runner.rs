use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use upgradekit_common::serialized::Value;
use upgradekit_common::{Error, Result};
use upgradekit_db::Database;

use crate::prerequisites::DatabaseUpdatedPrerequisite;
use crate::start_module::StartModuleUpdate;
use crate::wizard::{Prerequisite, UpgradeWizard};

/// Registry namespace holding one entry per executed wizard identifier.
pub const DONE_NAMESPACE: &str = "installUpdate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardState {
    /// Already executed (or found unnecessary) and recorded as done.
    Done,
    /// A prerequisite is not fulfilled, so necessity cannot be checked yet.
    Blocked,
    Necessary,
    NotNecessary,
}

#[derive(Debug, Clone, Serialize)]
pub struct WizardStatus {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub prerequisites: Vec<String>,
    pub state: WizardState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    AlreadyDone,
    /// Nothing to migrate; the wizard was marked done without executing.
    NotNecessary,
    Executed,
    /// `execute` returned false; the wizard was not marked done.
    Failed,
}

/// Runs registered upgrade wizards once each, after their prerequisites.
pub struct UpgradeRunner {
    db: Arc<Database>,
    wizards: Vec<Box<dyn UpgradeWizard>>,
    prerequisites: Vec<Box<dyn Prerequisite>>,
}

impl UpgradeRunner {
    pub fn new(
        db: Arc<Database>,
        wizards: Vec<Box<dyn UpgradeWizard>>,
        prerequisites: Vec<Box<dyn Prerequisite>>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for wizard in &wizards {
            if !seen.insert(wizard.identifier()) {
                return Err(Error::Wizard(format!(
                    "duplicate wizard identifier: {}",
                    wizard.identifier()
                )));
            }
        }
        let mut seen = HashSet::new();
        for prerequisite in &prerequisites {
            if !seen.insert(prerequisite.identifier()) {
                return Err(Error::Prerequisite(format!(
                    "duplicate prerequisite identifier: {}",
                    prerequisite.identifier()
                )));
            }
        }

        Ok(Self {
            db,
            wizards,
            prerequisites,
        })
    }

    /// Runner with every built-in wizard and prerequisite.
    pub fn with_defaults(db: Arc<Database>) -> Result<Self> {
        let wizards: Vec<Box<dyn UpgradeWizard>> =
            vec![Box::new(StartModuleUpdate::new(db.clone()))];
        let prerequisites: Vec<Box<dyn Prerequisite>> =
            vec![Box::new(DatabaseUpdatedPrerequisite::new(db.clone()))];
        Self::new(db, wizards, prerequisites)
    }

    pub fn wizards(&self) -> &[Box<dyn UpgradeWizard>] {
        &self.wizards
    }

    fn wizard(&self, identifier: &str) -> Result<&dyn UpgradeWizard> {
        self.wizards
            .iter()
            .find(|w| w.identifier() == identifier)
            .map(|w| w.as_ref())
            .ok_or_else(|| Error::NotFound(format!("upgrade wizard {identifier}")))
    }

    fn prerequisite(&self, wizard: &str, identifier: &str) -> Result<&dyn Prerequisite> {
        self.prerequisites
            .iter()
            .map(|p| p.as_ref())
            .find(|p| p.identifier() == identifier)
            .ok_or_else(|| {
                Error::Prerequisite(format!(
                    "wizard {wizard} requires unknown prerequisite {identifier}"
                ))
            })
    }

    fn prerequisites_fulfilled(&self, wizard: &dyn UpgradeWizard) -> Result<bool> {
        for identifier in wizard.prerequisites() {
            if !self
                .prerequisite(wizard.identifier(), identifier)?
                .is_fulfilled()?
            {
                debug!(
                    "prerequisite {identifier} of {} not fulfilled",
                    wizard.identifier()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn ensure_prerequisites(&self, wizard: &dyn UpgradeWizard) -> Result<()> {
        for identifier in wizard.prerequisites() {
            let prerequisite = self.prerequisite(wizard.identifier(), identifier)?;
            if prerequisite.is_fulfilled()? {
                continue;
            }
            info!("ensuring prerequisite: {}", prerequisite.title());
            if !prerequisite.ensure()? {
                return Err(Error::Prerequisite(format!(
                    "prerequisite {identifier} of {} could not be fulfilled",
                    wizard.identifier()
                )));
            }
        }
        Ok(())
    }

    pub fn is_done(&self, identifier: &str) -> Result<bool> {
        let marker = self.db.registry_get(DONE_NAMESPACE, identifier, None)?;
        Ok(marker.as_ref().is_some_and(is_truthy))
    }

    pub fn mark_done(&self, identifier: &str) -> Result<()> {
        self.wizard(identifier)?;
        self.db
            .registry_set(DONE_NAMESPACE, identifier, &Value::Int(1))?;
        debug!("marked {identifier} as done");
        Ok(())
    }

    /// Forget that a wizard ran so it is offered again. Returns whether it
    /// was marked done before.
    pub fn mark_undone(&self, identifier: &str) -> Result<bool> {
        self.wizard(identifier)?;
        let removed = self.db.registry_remove(DONE_NAMESPACE, identifier)?;
        if removed {
            info!("marked {identifier} as undone");
        }
        Ok(removed)
    }

    /// State of every registered wizard, in registration order.
    pub fn list(&self) -> Result<Vec<WizardStatus>> {
        self.wizards
            .iter()
            .map(|wizard| -> Result<WizardStatus> {
                let wizard = wizard.as_ref();
                let done =
                    self.db.registry_available()? && self.is_done(wizard.identifier())?;
                let state = if done {
                    WizardState::Done
                } else if !self.prerequisites_fulfilled(wizard)? {
                    WizardState::Blocked
                } else if wizard.is_necessary()? {
                    WizardState::Necessary
                } else {
                    WizardState::NotNecessary
                };
                Ok(WizardStatus {
                    identifier: wizard.identifier().to_string(),
                    title: wizard.title().to_string(),
                    description: wizard.description().to_string(),
                    prerequisites: wizard
                        .prerequisites()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    state,
                })
            })
            .collect()
    }

    /// Run one wizard: ensure its prerequisites, skip it if it is done, and
    /// record it as done once it no longer needs to run.
    pub fn run(&self, identifier: &str) -> Result<RunOutcome> {
        let wizard = self.wizard(identifier)?;
        self.ensure_prerequisites(wizard)?;

        if self.is_done(identifier)? {
            debug!("{identifier} already done");
            return Ok(RunOutcome::AlreadyDone);
        }

        if !wizard.is_necessary()? {
            info!("{identifier}: nothing to do");
            self.mark_done(identifier)?;
            return Ok(RunOutcome::NotNecessary);
        }

        info!("executing {identifier}: {}", wizard.title());
        if wizard.execute()? {
            self.mark_done(identifier)?;
            info!("{identifier} executed");
            Ok(RunOutcome::Executed)
        } else {
            warn!("{identifier} reported failure, not marking as done");
            Ok(RunOutcome::Failed)
        }
    }

    /// Run every wizard in registration order. Stops at the first error.
    pub fn run_all(&self) -> Result<Vec<(String, RunOutcome)>> {
        self.wizards
            .iter()
            .map(|wizard| {
                let identifier = wizard.identifier();
                self.run(identifier).map(|outcome| (identifier.to_string(), outcome))
            })
            .collect()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(bytes) => !(bytes.is_empty() || bytes == b"0"),
        Value::Array(array) => !array.is_empty(),
        Value::Object { .. } | Value::Custom { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeWizard {
        identifier: &'static str,
        prerequisites: Vec<&'static str>,
        necessary: AtomicBool,
        succeeds: bool,
        executions: Arc<AtomicUsize>,
    }

    impl FakeWizard {
        fn new(identifier: &'static str, necessary: bool) -> Self {
            Self {
                identifier,
                prerequisites: Vec::new(),
                necessary: AtomicBool::new(necessary),
                succeeds: true,
                executions: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl UpgradeWizard for FakeWizard {
        fn identifier(&self) -> &'static str {
            self.identifier
        }

        fn title(&self) -> &'static str {
            "fake"
        }

        fn description(&self) -> &'static str {
            "fake wizard"
        }

        fn prerequisites(&self) -> Vec<&'static str> {
            self.prerequisites.clone()
        }

        fn is_necessary(&self) -> Result<bool> {
            Ok(self.necessary.load(Ordering::SeqCst))
        }

        fn execute(&self) -> Result<bool> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.succeeds {
                self.necessary.store(false, Ordering::SeqCst);
            }
            Ok(self.succeeds)
        }
    }

    struct FakePrerequisite {
        fulfilled: Arc<Mutex<bool>>,
        can_ensure: bool,
    }

    impl Prerequisite for FakePrerequisite {
        fn identifier(&self) -> &'static str {
            "fake"
        }

        fn title(&self) -> &'static str {
            "Fake prerequisite"
        }

        fn is_fulfilled(&self) -> Result<bool> {
            Ok(*self.fulfilled.lock().unwrap())
        }

        fn ensure(&self) -> Result<bool> {
            let mut fulfilled = self.fulfilled.lock().unwrap();
            if self.can_ensure {
                *fulfilled = true;
            }
            Ok(*fulfilled)
        }
    }

    fn migrated_db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    fn runner(wizards: Vec<Box<dyn UpgradeWizard>>) -> UpgradeRunner {
        UpgradeRunner::new(migrated_db(), wizards, Vec::new()).unwrap()
    }

    #[test]
    fn executes_once_then_reports_done() {
        let wizard = FakeWizard::new("fakeUpdate", true);
        let executions = wizard.executions.clone();
        let runner = runner(vec![Box::new(wizard)]);

        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::Executed);
        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::AlreadyDone);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(runner.is_done("fakeUpdate").unwrap());
    }

    #[test]
    fn unnecessary_wizard_is_marked_done_without_executing() {
        let wizard = FakeWizard::new("fakeUpdate", false);
        let executions = wizard.executions.clone();
        let runner = runner(vec![Box::new(wizard)]);

        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::NotNecessary);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(runner.list().unwrap()[0].state, WizardState::Done);
    }

    #[test]
    fn failed_execution_is_not_marked_done() {
        let mut wizard = FakeWizard::new("fakeUpdate", true);
        wizard.succeeds = false;
        let runner = runner(vec![Box::new(wizard)]);

        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::Failed);
        assert!(!runner.is_done("fakeUpdate").unwrap());
        assert_eq!(runner.list().unwrap()[0].state, WizardState::Necessary);
    }

    #[test]
    fn unknown_wizard_is_not_found() {
        let runner = runner(Vec::new());
        assert!(matches!(runner.run("nope"), Err(Error::NotFound(_))));
        assert!(matches!(runner.mark_undone("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let result = UpgradeRunner::new(
            migrated_db(),
            vec![
                Box::new(FakeWizard::new("same", true)),
                Box::new(FakeWizard::new("same", false)),
            ],
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::Wizard(_))));
    }

    #[test]
    fn unknown_prerequisite_blocks_run() {
        let mut wizard = FakeWizard::new("fakeUpdate", true);
        wizard.prerequisites = vec!["missing"];
        let executions = wizard.executions.clone();
        let runner = runner(vec![Box::new(wizard)]);

        assert!(matches!(
            runner.run("fakeUpdate"),
            Err(Error::Prerequisite(_))
        ));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prerequisites_are_ensured_before_running() {
        let mut wizard = FakeWizard::new("fakeUpdate", true);
        wizard.prerequisites = vec!["fake"];
        let prerequisite = FakePrerequisite {
            fulfilled: Arc::new(Mutex::new(false)),
            can_ensure: true,
        };
        let runner =
            UpgradeRunner::new(migrated_db(), vec![Box::new(wizard)], vec![Box::new(prerequisite)])
                .unwrap();

        assert_eq!(runner.list().unwrap()[0].state, WizardState::Blocked);
        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::Executed);
        assert_eq!(runner.list().unwrap()[0].state, WizardState::Done);
    }

    #[test]
    fn done_wizard_stays_done_while_prerequisite_is_unmet() {
        let mut wizard = FakeWizard::new("fakeUpdate", true);
        wizard.prerequisites = vec!["fake"];
        let fulfilled = Arc::new(Mutex::new(true));
        let prerequisite = FakePrerequisite {
            fulfilled: fulfilled.clone(),
            can_ensure: true,
        };
        let runner =
            UpgradeRunner::new(migrated_db(), vec![Box::new(wizard)], vec![Box::new(prerequisite)])
                .unwrap();
        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::Executed);

        // A later schema change leaves the prerequisite unmet again.
        *fulfilled.lock().unwrap() = false;
        assert_eq!(runner.list().unwrap()[0].state, WizardState::Done);
    }

    #[test]
    fn list_on_fresh_database_reports_blocked() {
        let mut wizard = FakeWizard::new("fakeUpdate", true);
        wizard.prerequisites = vec!["fake"];
        let prerequisite = FakePrerequisite {
            fulfilled: Arc::new(Mutex::new(false)),
            can_ensure: true,
        };
        let runner = UpgradeRunner::new(
            Arc::new(Database::in_memory().unwrap()),
            vec![Box::new(wizard)],
            vec![Box::new(prerequisite)],
        )
        .unwrap();

        assert_eq!(runner.list().unwrap()[0].state, WizardState::Blocked);
    }

    #[test]
    fn unfulfillable_prerequisite_fails_run() {
        let mut wizard = FakeWizard::new("fakeUpdate", true);
        wizard.prerequisites = vec!["fake"];
        let executions = wizard.executions.clone();
        let prerequisite = FakePrerequisite {
            fulfilled: Arc::new(Mutex::new(false)),
            can_ensure: false,
        };
        let runner =
            UpgradeRunner::new(migrated_db(), vec![Box::new(wizard)], vec![Box::new(prerequisite)])
                .unwrap();

        assert!(matches!(
            runner.run("fakeUpdate"),
            Err(Error::Prerequisite(_))
        ));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mark_undone_re_enables_wizard() {
        let wizard = FakeWizard::new("fakeUpdate", true);
        let executions = wizard.executions.clone();
        let runner = runner(vec![Box::new(wizard)]);

        runner.run("fakeUpdate").unwrap();
        assert!(runner.mark_undone("fakeUpdate").unwrap());
        assert!(!runner.mark_undone("fakeUpdate").unwrap());

        // The fake is no longer necessary, so the rerun only re-marks it.
        assert_eq!(runner.run("fakeUpdate").unwrap(), RunOutcome::NotNecessary);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_all_keeps_registration_order() {
        let runner = runner(vec![
            Box::new(FakeWizard::new("second", false)),
            Box::new(FakeWizard::new("first", true)),
        ]);

        let outcomes = runner.run_all().unwrap();
        assert_eq!(
            outcomes,
            vec![
                ("second".to_string(), RunOutcome::NotNecessary),
                ("first".to_string(), RunOutcome::Executed),
            ]
        );
    }

    #[test]
    fn legacy_done_markers_are_recognised() {
        let db = migrated_db();
        db.registry_set(DONE_NAMESPACE, "fakeUpdate", &Value::Bool(true))
            .unwrap();
        db.registry_set(DONE_NAMESPACE, "otherUpdate", &Value::from("0"))
            .unwrap();
        let runner = UpgradeRunner::new(
            db,
            vec![
                Box::new(FakeWizard::new("fakeUpdate", true)),
                Box::new(FakeWizard::new("otherUpdate", true)),
            ],
            Vec::new(),
        )
        .unwrap();

        assert!(runner.is_done("fakeUpdate").unwrap());
        assert!(!runner.is_done("otherUpdate").unwrap());
    }
}
