//! SQLite persistence for projects, jobs, sub-jobs, item status and events.
//!
//! One rusqlite connection is shared behind a mutex. Each `with_conn` call
//! is one unit of work: read-modify-write sequences that must not
//! interleave with other writers belong inside a single closure.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod error;
pub mod event_repo;
pub mod item_status_repo;
pub mod job_repo;
pub mod migrations;
pub mod project_repo;
pub mod sub_job_repo;

pub use error::DatabaseError;

/// Shared handle to the storyforge database.
///
/// Clones share one connection. The request path, fan-out workers and the
/// poller all hold a clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating parent directories as needed, and
    /// migrates it to the current schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let db = Self::prepare(
            Connection::open(path)?,
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;
        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// A private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?, "PRAGMA foreign_keys=ON;")
    }

    fn prepare(conn: Connection, pragmas: &str) -> Result<Self, DatabaseError> {
        conn.execute_batch(pragmas)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// A unit of work that panicked leaves the mutex poisoned. Its statements
    /// either ran or did not, so the connection is taken back and the poison
    /// cleared rather than failing every later caller.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| {
            log::warn!("Recovering database connection after a panicked unit of work");
            self.conn.clear_poison();
            poisoned.into_inner()
        });
        f(&conn)
    }
}

/// Returns the canonical database path: `~/.storyforge/data/storyforge.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".storyforge").join("data").join("storyforge.db"))
}

/// Formats a timestamp with fixed precision so lexical order matches time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}
