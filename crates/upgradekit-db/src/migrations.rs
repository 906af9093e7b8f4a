//! Migration system for tracking and applying database schema changes.
//!
//! Each migration has a version number and a SQL statement.
//! Migrations are applied in order and tracked in a `_migrations` table.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::info;
use upgradekit_common::{Error, Result};

use crate::database::Database;

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_be_users",
        sql: "CREATE TABLE IF NOT EXISTS be_users (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL DEFAULT '',
                admin INTEGER NOT NULL DEFAULT 0,
                uc BLOB
            );",
    },
    Migration {
        version: 2,
        name: "create_sys_registry",
        sql: "CREATE TABLE IF NOT EXISTS sys_registry (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_namespace TEXT NOT NULL,
                entry_key TEXT NOT NULL,
                entry_value BLOB,
                UNIQUE (entry_namespace, entry_key)
            );",
    },
];

/// A migration recorded in `_migrations`.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

impl Database {
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version ASC")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query migrations: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read migration row: {e}")))
    }

    pub fn pending_migrations(&self) -> Result<Vec<&'static Migration>> {
        let applied: Vec<u32> = self
            .applied_migrations()?
            .into_iter()
            .map(|m| m.version)
            .collect();
        Ok(MIGRATIONS
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }

    /// Apply every pending migration, each in its own transaction.
    /// Returns how many were applied.
    pub fn migrate(&self) -> Result<usize> {
        let pending = self.pending_migrations()?;
        let mut conn = self.connection()?;

        for migration in &pending {
            let tx = conn
                .transaction()
                .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
            tx.execute_batch(migration.sql).map_err(|e| {
                Error::Database(format!("migration {} failed: {e}", migration.name))
            })?;
            tx.execute(
                "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
                params![migration.version, migration.name],
            )
            .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
            tx.commit()
                .map_err(|e| Error::Database(format!("failed to commit migration: {e}")))?;
            info!(
                "applied migration {} ({})",
                migration.version, migration.name
            );
        }

        Ok(pending.len())
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
