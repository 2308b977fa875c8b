//! SQLite-backed session descriptor storage.
//!
//! The descriptor is the only piece of tracking state that must survive
//! process death: a background task restarted by the OS reads it to learn
//! which workspace it is reporting for.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::StoreError;

/// Fixed kv key the descriptor is stored under.
pub const SESSION_KEY: &str = "location_tracking_session";

/// Durable identity of the active background session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub workspace_id: String,
    #[serde(default)]
    pub sample_counter: u64,
}

impl SessionDescriptor {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            sample_counter: 0,
        }
    }
}

/// Key-value persistence for [`SessionDescriptor`].
///
/// The connection sits behind a mutex so the store can be shared between
/// the coordinator and background delivery tasks. No lock is held across an
/// await point; every operation is a single short statement.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open the store at `~/.config/locshare/locshare.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = data_dir()?.join("locshare.db");
        Self::open(&path)
    }

    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // SQLite stays consistent if a holder panicked.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the descriptor, replacing any previous one.
    pub fn save(&self, descriptor: &SessionDescriptor) -> Result<(), StoreError> {
        let value = serde_json::to_string(descriptor)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![SESSION_KEY, value],
        )?;
        Ok(())
    }

    /// Read the stored descriptor, if any.
    pub fn load(&self) -> Result<Option<SessionDescriptor>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![SESSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Remove the descriptor. Succeeds when nothing is stored.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![SESSION_KEY])?;
        Ok(())
    }

    /// Bump `sample_counter` and return the new value.
    ///
    /// Returns `None` when no descriptor is stored.
    pub fn increment_counter(&self) -> Result<Option<u64>, StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![SESSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut descriptor: SessionDescriptor = serde_json::from_str(&raw)?;
        descriptor.sample_counter += 1;
        tx.execute(
            "UPDATE kv SET value = ?2 WHERE key = ?1",
            params![SESSION_KEY, serde_json::to_string(&descriptor)?],
        )?;
        tx.commit()?;
        Ok(Some(descriptor.sample_counter))
    }
}
