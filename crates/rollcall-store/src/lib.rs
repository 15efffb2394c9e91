//! rollcall-store: Durable roster and attendance log.
//!
//! Both collections live in one SQLite `kv` table under fixed keys, each
//! value a JSON array. An absent key reads as empty; a value that fails to
//! parse is reported as [`StoreError::DataCorruption`].

use rollcall_core::decision::{is_duplicate, AttendanceSink};
use rollcall_core::{AttendanceRecord, Identity};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub const ROSTER_KEY: &str = "roster";
pub const ATTENDANCE_KEY: &str = "attendance-log";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value for '{key}' is corrupt: {source}")]
    DataCorruption {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Roster and attendance log persistence.
///
/// All access goes through one connection behind a mutex, so the
/// read-check-write of [`Store::add_attendance_if_not_duplicate`] is
/// serialized across threads.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        tracing::info!(path = %path.display(), "opened attendance store");
        Self::init(conn)
    }

    /// Private in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
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

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Every mutation is a single statement or transaction, so a
        // poisoned guard still holds a consistent connection.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered identities in registration order.
    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        read_key(&self.lock(), ROSTER_KEY)
    }

    /// Append an identity to the roster. The caller supplies a unique id.
    pub fn add_identity(&self, identity: Identity) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut roster: Vec<Identity> = read_key(&tx, ROSTER_KEY)?;
        roster.push(identity);
        write_key(&tx, ROSTER_KEY, &roster)?;
        tx.commit()?;
        Ok(())
    }

    /// Attendance log, most recent first.
    pub fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        read_key(&self.lock(), ATTENDANCE_KEY)
    }

    /// Insert `record` at the head of the log unless an existing record for
    /// the same identity lies inside the dedup window. Returns whether the
    /// record was written.
    pub fn add_attendance_if_not_duplicate(
        &self,
        record: AttendanceRecord,
    ) -> Result<bool, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut log: Vec<AttendanceRecord> = read_key(&tx, ATTENDANCE_KEY)?;
        if is_duplicate(&log, &record) {
            return Ok(false);
        }
        log.insert(0, record);
        write_key(&tx, ATTENDANCE_KEY, &log)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn clear_attendance(&self) -> Result<(), StoreError> {
        delete_key(&self.lock(), ATTENDANCE_KEY)
    }

    pub fn clear_identities(&self) -> Result<(), StoreError> {
        delete_key(&self.lock(), ROSTER_KEY)
    }
}

impl AttendanceSink for Store {
    type Error = StoreError;

    fn append_if_not_duplicate(&self, record: AttendanceRecord) -> Result<bool, StoreError> {
        self.add_attendance_if_not_duplicate(record)
    }
}

fn read_key<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Vec<T>, StoreError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;

    match raw {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|source| {
            tracing::error!(key, error = %source, "stored value failed to parse");
            StoreError::DataCorruption {
                key: key.to_string(),
                source,
            }
        }),
    }
}

fn write_key<T: Serialize>(conn: &Connection, key: &str, items: &[T]) -> Result<(), StoreError> {
    let text = serde_json::to_string(items).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, text],
    )?;
    Ok(())
}

fn delete_key(conn: &Connection, key: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    Ok(())
}
