//! rollcall-store — SQLite persistence for the rollcall engine.
//!
//! One database file holds enrolled feature vectors, the session timetable
//! and attendance records. [`SqliteStore`] implements all three collaborator
//! traits from `rollcall-core`; share it between them with an `Arc`.

mod attendance;
mod features;
mod sessions;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("face encoding for identity {identity} is not a JSON number array: {source}")]
    Encoding {
        identity: i64,
        source: serde_json::Error,
    },
    #[error("connection lock poisoned")]
    LockPoisoned,
}

impl From<StoreError> for rollcall_core::Error {
    fn from(err: StoreError) -> Self {
        rollcall_core::Error::StoreUnavailable(err.to_string())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          INTEGER PRIMARY KEY,
    name        TEXT,
    code        TEXT,
    encoding    TEXT NOT NULL,
    enrolled_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    code       TEXT,
    department TEXT,
    start_time TEXT NOT NULL,
    end_time   TEXT NOT NULL,
    CHECK (start_time <= end_time)
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL,
    session_id  INTEGER,
    day         TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('present', 'absent', 'late'))
);

-- NULLs never collide in a unique index, so the no-session bucket gets its own.
DROP INDEX IF EXISTS attendance_once_per_day;
CREATE UNIQUE INDEX IF NOT EXISTS attendance_once_per_session_day
    ON attendance (identity_id, session_id, day) WHERE session_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS attendance_once_per_day_unscheduled
    ON attendance (identity_id, day) WHERE session_id IS NULL;

CREATE INDEX IF NOT EXISTS attendance_by_identity
    ON attendance (identity_id, recorded_at);
";

/// SQLite-backed feature store, session catalog and attendance store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// `busy_timeout` bounds how long a call waits on another writer before
    /// failing; the failure surfaces as `StoreUnavailable`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::info!(path = %path.display(), journal_mode = %mode, "opened attendance database");

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}
