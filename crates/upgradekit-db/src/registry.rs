use rusqlite::{OptionalExtension, params};
use tracing::warn;
use upgradekit_common::serialized::{self, ObjectPolicy, Value};
use upgradekit_common::{Error, Result};

use crate::backend_users::read_blob;
use crate::database::Database;

/// Namespaced key/value registry stored in `sys_registry`. Values are kept in
/// the serialized format.
impl Database {
    /// Value stored under `namespace`/`key`, or `default` if there is none.
    /// A stored value that fails to decode is logged and treated as absent.
    pub fn registry_get(
        &self,
        namespace: &str,
        key: &str,
        default: Option<Value>,
    ) -> Result<Option<Value>> {
        let raw = {
            let conn = self.connection()?;
            conn.query_row(
                "SELECT entry_value FROM sys_registry
                 WHERE entry_namespace = ?1 AND entry_key = ?2",
                params![namespace, key],
                |row| read_blob(row, 0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read registry entry: {e}")))?
        };

        let Some(Some(bytes)) = raw else {
            return Ok(default);
        };
        match serialized::decode(&bytes, ObjectPolicy::Inert) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("registry entry {namespace}/{key} is not decodable: {e}");
                Ok(default)
            }
        }
    }

    pub fn registry_set(&self, namespace: &str, key: &str, value: &Value) -> Result<()> {
        let encoded = serialized::encode(value);
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO sys_registry (entry_namespace, entry_key, entry_value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (entry_namespace, entry_key)
             DO UPDATE SET entry_value = excluded.entry_value",
            params![namespace, key, encoded],
        )
        .map_err(|e| Error::Database(format!("failed to write registry entry: {e}")))?;
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn registry_remove(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.connection()?;
        let removed = conn
            .execute(
                "DELETE FROM sys_registry WHERE entry_namespace = ?1 AND entry_key = ?2",
                params![namespace, key],
            )
            .map_err(|e| Error::Database(format!("failed to remove registry entry: {e}")))?;
        Ok(removed > 0)
    }

    /// Whether the registry table exists yet. It is created by a schema
    /// migration, so a fresh database has none.
    pub fn registry_available(&self) -> Result<bool> {
        let conn = self.connection()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sys_registry'",
                [],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to inspect schema: {e}")))?;
        Ok(found.is_some())
    }
}
