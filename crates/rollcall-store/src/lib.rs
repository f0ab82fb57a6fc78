//! rollcall-store — SQLite gallery store and attendance ledger.
//!
//! One `attendance` row per (person, day), enforced by a unique constraint.
//! Every check-then-write against the ledger runs inside a `BEGIN IMMEDIATE`
//! transaction so concurrent check-ins for the same person serialise on the
//! database write lock.

mod gallery;
mod ledger;
mod schema;

pub use gallery::StoredEmbedding;
pub use ledger::DaySummary;

use rollcall_core::{AttendanceError, PersonId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How long a writer waits for another connection's transaction to finish.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error("attendance record {0} not found")]
    RecordNotFound(i64),
    #[error("face embedding {0} not found")]
    EmbeddingNotFound(i64),
}

/// Handle on the rollcall database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal = %journal, "journal mode set");
        schema::migrate(&conn)?;

        tracing::info!(path = %path.display(), "store opened");
        Ok(Self { conn })
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Assign `person_id` to a class/group, creating the roster entry if needed.
    pub fn set_group(&self, person_id: PersonId, group: Option<&str>) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO roster (person_id, group_name) VALUES (?1, ?2)
             ON CONFLICT(person_id) DO UPDATE SET group_name = excluded.group_name",
            params![person_id, group],
        )?;
        tracing::debug!(person_id, ?group, "roster group set");
        Ok(())
    }

    pub fn group_of(&self, person_id: PersonId) -> Result<Option<String>, StoreError> {
        Ok(group_of(&self.conn, person_id)?)
    }
}

pub(crate) fn group_of(conn: &Connection, person_id: PersonId) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT group_name FROM roster WHERE person_id = ?1",
        [person_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(Option::flatten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("rollcall-store-test-{}", std::process::id()));
        let path = dir.join("nested/rollcall.db");
        let store = Store::open(&path).unwrap();
        store.set_group(1, Some("5A")).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.group_of(1).unwrap().as_deref(), Some("5A"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_set_group_overwrites() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.group_of(3).unwrap(), None);
        store.set_group(3, Some("5A")).unwrap();
        store.set_group(3, Some("6B")).unwrap();
        assert_eq!(store.group_of(3).unwrap().as_deref(), Some("6B"));
        store.set_group(3, None).unwrap();
        assert_eq!(store.group_of(3).unwrap(), None);
    }
}
