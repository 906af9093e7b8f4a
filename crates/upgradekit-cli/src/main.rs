mod banner;
mod logging;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;
use upgradekit_config::ConfigLoader;
use upgradekit_db::Database;
use upgradekit_reports::{StatusNotifier, Viewer};
use upgradekit_wizards::{RunOutcome, UpgradeRunner};

#[derive(Parser)]
#[command(name = "upgradekit", version, about = "Run upgrade wizards against a CMS database")]
struct Cli {
    /// Config file (YAML or TOML)
    #[arg(long, env = "UPGRADEKIT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the config
    #[arg(long, env = "UPGRADEKIT_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Init {
        #[arg(long)]
        json: bool,
    },
    /// List upgrade wizards and their state
    List {
        #[arg(long)]
        json: bool,
    },
    /// Run one upgrade wizard, or every wizard with --all
    Run {
        identifier: Option<String>,
        #[arg(long, conflicts_with = "identifier")]
        all: bool,
    },
    /// Forget that a wizard has run so it is offered again
    MarkUndone { identifier: String },
    /// Show the system status notification
    Status {
        /// Render as seen by an administrator
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    logging::init(&config.log, cli.json_logs || config.log.json);
    debug!("using database {}", config.database.path.display());

    let db = Arc::new(Database::open(&config.database.path).with_context(|| {
        format!(
            "failed to open database {}",
            config.database.path.display()
        )
    })?);

    match cli.command {
        Command::Init { json } => {
            let applied = db.migrate().context("failed to apply migrations")?;
            let migrations = db.applied_migrations()?;
            if json {
                let report = serde_json::json!({
                    "applied": applied,
                    "migrations": migrations,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("Applied {applied} migration(s).");
            for migration in migrations {
                println!(
                    "  {:>3}  {:<24} {}",
                    migration.version,
                    migration.name,
                    migration.applied_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::List { json } => {
            let runner = UpgradeRunner::with_defaults(db)?;
            let statuses = runner.list().context("failed to list wizards")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                banner::print_wizard_table(&statuses, &config.database.path);
            }
        }
        Command::Run { identifier, all } => {
            let runner = UpgradeRunner::with_defaults(db)?;
            let outcomes = match (identifier, all) {
                (Some(identifier), false) => {
                    let outcome = runner
                        .run(&identifier)
                        .with_context(|| format!("wizard {identifier} failed"))?;
                    vec![(identifier, outcome)]
                }
                (None, true) => runner.run_all().context("running wizards failed")?,
                _ => bail!("pass a wizard identifier or --all"),
            };
            let mut failed = false;
            for (identifier, outcome) in outcomes {
                failed |= outcome == RunOutcome::Failed;
                println!("{identifier}: {}", outcome_label(outcome));
            }
            if failed {
                bail!("one or more wizards did not complete");
            }
        }
        Command::MarkUndone { identifier } => {
            require_schema(&db)?;
            let runner = UpgradeRunner::with_defaults(db)?;
            if runner.mark_undone(&identifier)? {
                println!("{identifier} marked as undone.");
            } else {
                println!("{identifier} was not marked as done.");
            }
        }
        Command::Status { admin, json } => {
            require_schema(&db)?;
            let notifier = StatusNotifier::new(db);
            let mut messages = BTreeMap::new();
            notifier.post_process(&Viewer { is_admin: admin }, &mut messages)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
                return Ok(());
            }
            if messages.is_empty() {
                println!("No status problems to report.");
            }
            for message in messages.values() {
                let parameters: Vec<String> = message
                    .parameters
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                println!("{}", message.text);
                println!("  -> {} ({})", message.module, parameters.join(", "));
            }
        }
    }

    Ok(())
}

fn require_schema(db: &Database) -> Result<()> {
    if !db.pending_migrations()?.is_empty() {
        bail!("database schema is not up to date, run `upgradekit init` first");
    }
    Ok(())
}

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::AlreadyDone => "already done",
        RunOutcome::NotNecessary => "nothing to do, marked as done",
        RunOutcome::Executed => "executed",
        RunOutcome::Failed => "failed",
    }
}
