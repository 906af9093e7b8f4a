use std::sync::Arc;

use upgradekit_common::serialized::{self, Array, ObjectPolicy, Value};
use upgradekit_common::{Error, Result};
use upgradekit_db::{Database, UserConfigRow};
use upgradekit_wizards::{
    DatabaseUpdatedPrerequisite, Prerequisite, RunOutcome, StartModuleUpdate, UpgradeRunner,
    UpgradeWizard, UserConfigStore, WizardState,
};

fn uc(start_module: &str) -> Vec<u8> {
    let config: Array = [
        ("startModule", Value::from(start_module)),
        ("edit_RTE", Value::from("1")),
    ]
    .into_iter()
    .collect();
    serialized::encode(&Value::Array(config))
}

fn start_module_of(db: &Database, uid: i64) -> Option<String> {
    let user = db.get_backend_user(uid).unwrap()?;
    let value = serialized::decode(&user.uc?, ObjectPolicy::Reject).unwrap();
    value
        .as_array()
        .and_then(|config| config.get("startModule"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Backend users 1-4: two legacy start modules, one null config, one
/// unrelated start module.
fn seed(db: &Database) -> [i64; 4] {
    [
        db.insert_backend_user("editor", false, Some(&uc("help_aboutmodules")))
            .unwrap(),
        db.insert_backend_user("admin", true, Some(&uc("help_AboutAboutmodules")))
            .unwrap(),
        db.insert_backend_user("fresh", false, None).unwrap(),
        db.insert_backend_user("other", false, Some(&uc("other")))
            .unwrap(),
    ]
}

#[test]
fn scenario_migrates_legacy_users_only() {
    let db = Arc::new(Database::in_memory().unwrap());
    db.migrate().unwrap();
    let [legacy_a, legacy_b, null_uc, other] = seed(&db);
    let other_before = db.get_backend_user(other).unwrap().unwrap().uc;

    let wizard = StartModuleUpdate::new(db.clone());
    assert!(wizard.is_necessary().unwrap());
    assert!(wizard.execute().unwrap());

    assert_eq!(start_module_of(&db, legacy_a).as_deref(), Some("help_AboutAbout"));
    assert_eq!(start_module_of(&db, legacy_b).as_deref(), Some("help_AboutAbout"));
    assert!(db.get_backend_user(null_uc).unwrap().unwrap().uc.is_none());
    assert_eq!(db.get_backend_user(other).unwrap().unwrap().uc, other_before);

    // Untouched keys survive the rewrite.
    let migrated = db.get_backend_user(legacy_a).unwrap().unwrap().uc.unwrap();
    assert_eq!(migrated, uc("help_AboutAbout"));

    let snapshot = db.user_configs().unwrap();
    assert!(wizard.execute().unwrap());
    assert_eq!(db.user_configs().unwrap(), snapshot);
    assert!(!wizard.is_necessary().unwrap());
}

#[test]
fn runner_migrates_file_database_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cms.db");

    // Schema is created by the prerequisite, not by opening.
    let db = Arc::new(Database::open(&path).unwrap());
    let runner = UpgradeRunner::with_defaults(db.clone()).unwrap();
    let status = runner.list().unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].identifier, "startModuleUpdate");
    assert_eq!(status[0].state, WizardState::Blocked);

    db.migrate().unwrap();
    let [legacy_a, _, _, _] = seed(&db);
    assert_eq!(runner.list().unwrap()[0].state, WizardState::Necessary);

    assert_eq!(
        runner.run("startModuleUpdate").unwrap(),
        RunOutcome::Executed
    );
    assert_eq!(
        runner.run_all().unwrap(),
        vec![("startModuleUpdate".to_string(), RunOutcome::AlreadyDone)]
    );
    drop(runner);
    drop(db);

    let db = Arc::new(Database::open(&path).unwrap());
    assert_eq!(start_module_of(&db, legacy_a).as_deref(), Some("help_AboutAbout"));
    let runner = UpgradeRunner::with_defaults(db).unwrap();
    assert_eq!(runner.list().unwrap()[0].state, WizardState::Done);
}

#[test]
fn run_ensures_schema_on_fresh_database() {
    let db = Arc::new(Database::in_memory().unwrap());
    let runner = UpgradeRunner::with_defaults(db.clone()).unwrap();

    assert_eq!(
        runner.run("startModuleUpdate").unwrap(),
        RunOutcome::NotNecessary
    );
    assert!(db.pending_migrations().unwrap().is_empty());
    assert!(runner.is_done("startModuleUpdate").unwrap());
}

#[test]
fn re_enabled_wizard_picks_up_new_legacy_rows() {
    let db = Arc::new(Database::in_memory().unwrap());
    db.migrate().unwrap();
    let runner = UpgradeRunner::with_defaults(db.clone()).unwrap();
    assert_eq!(
        runner.run("startModuleUpdate").unwrap(),
        RunOutcome::NotNecessary
    );

    // A restored backup brings a legacy value back.
    let uid = db
        .insert_backend_user("restored", false, Some(&uc("help_AboutmodulesAboutmodules")))
        .unwrap();
    assert_eq!(
        runner.run("startModuleUpdate").unwrap(),
        RunOutcome::AlreadyDone
    );
    assert_eq!(
        start_module_of(&db, uid).as_deref(),
        Some("help_AboutmodulesAboutmodules")
    );

    assert!(runner.mark_undone("startModuleUpdate").unwrap());
    assert_eq!(
        runner.run("startModuleUpdate").unwrap(),
        RunOutcome::Executed
    );
    assert_eq!(start_module_of(&db, uid).as_deref(), Some("help_AboutAbout"));
}

/// Store that reads from the database but cannot write.
struct ReadOnlyStore(Arc<Database>);

impl UserConfigStore for ReadOnlyStore {
    fn fetch_user_configs(&self) -> Result<Vec<UserConfigRow>> {
        self.0.fetch_user_configs()
    }

    fn store_user_config(&self, uid: i64, _uc: &[u8]) -> Result<()> {
        Err(Error::Database(format!("backend user {uid} is read-only")))
    }
}

#[test]
fn failed_write_is_not_recorded_as_done() {
    let db = Arc::new(Database::in_memory().unwrap());
    db.migrate().unwrap();
    let [legacy_a, ..] = seed(&db);

    let wizards: Vec<Box<dyn UpgradeWizard>> = vec![Box::new(StartModuleUpdate::new(Arc::new(
        ReadOnlyStore(db.clone()),
    )))];
    let prerequisites: Vec<Box<dyn Prerequisite>> =
        vec![Box::new(DatabaseUpdatedPrerequisite::new(db.clone()))];
    let runner = UpgradeRunner::new(db.clone(), wizards, prerequisites).unwrap();

    let err = runner.run("startModuleUpdate").unwrap_err();
    assert!(matches!(err, Error::Database(msg) if msg.contains("read-only")));
    assert!(!runner.is_done("startModuleUpdate").unwrap());
    assert_eq!(runner.list().unwrap()[0].state, WizardState::Necessary);
    assert_eq!(start_module_of(&db, legacy_a).as_deref(), Some("help_aboutmodules"));
}
