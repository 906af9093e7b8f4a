use rusqlite::types::{FromSqlError, ValueRef};
use rusqlite::{OptionalExtension, Row, params};
use upgradekit_common::{Error, Result};

use crate::database::Database;

/// Minimal projection of a `be_users` row: the primary key and the
/// serialized user configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserConfigRow {
    pub uid: i64,
    pub uc: Option<Vec<u8>>,
}

/// A full `be_users` row.
#[derive(Debug, Clone)]
pub struct BackendUser {
    pub uid: i64,
    pub username: String,
    pub admin: bool,
    pub uc: Option<Vec<u8>>,
}

impl Database {
    pub fn insert_backend_user(&self, username: &str, admin: bool, uc: Option<&[u8]>) -> Result<i64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO be_users (username, admin, uc) VALUES (?1, ?2, ?3)",
            params![username, admin, uc],
        )
        .map_err(|e| Error::Database(format!("failed to insert backend user: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_backend_user(&self, uid: i64) -> Result<Option<BackendUser>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT uid, username, admin, uc FROM be_users WHERE uid = ?1",
            params![uid],
            |row| {
                Ok(BackendUser {
                    uid: row.get(0)?,
                    username: row.get(1)?,
                    admin: row.get(2)?,
                    uc: read_blob(row, 3)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to load backend user {uid}: {e}")))
    }

    /// Every row's `uid` and `uc`, without access restrictions.
    pub fn user_configs(&self) -> Result<Vec<UserConfigRow>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT uid, uc FROM be_users ORDER BY uid ASC")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(UserConfigRow {
                    uid: row.get(0)?,
                    uc: read_blob(row, 1)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query user configs: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read user config row: {e}")))
    }

    /// Overwrite `uc` of the row with this exact `uid`. Returns the number of
    /// rows changed (0 if the row is gone).
    pub fn update_user_config(&self, uid: i64, uc: &[u8]) -> Result<usize> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE be_users SET uc = ?1 WHERE uid = ?2",
            params![uc, uid],
        )
        .map_err(|e| Error::Database(format!("failed to update user config {uid}: {e}")))
    }
}

/// Read a nullable payload column. Legacy rows may hold the blob as TEXT.
pub(crate) fn read_blob(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<u8>>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(Some(bytes.to_vec())),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            other.data_type(),
            Box::new(FromSqlError::InvalidType),
        )),
    }
}
