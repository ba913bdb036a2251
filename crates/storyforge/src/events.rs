//! Event log sink: persisted, append-only domain events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broadcast::{LogBroadcaster, LogEvent};
use crate::db::event_repo::{self, EventQuery, EventRow, NewEvent};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Fire-and-forget event logging.
///
/// Implementations must never fail or block the caller on storage errors.
pub trait EventSink: Send + Sync {
    fn log(
        &self,
        project_id: Option<&str>,
        job_id: Option<&str>,
        severity: Severity,
        message: &str,
        details: Option<Value>,
    );
}

/// Discards every event.
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn log(&self, _: Option<&str>, _: Option<&str>, _: Severity, _: &str, _: Option<Value>) {}
}

/// Writes events to the `event_logs` table and rebroadcasts them.
#[derive(Clone)]
pub struct DbEventLog {
    db: Database,
    broadcaster: LogBroadcaster,
}

impl DbEventLog {
    pub fn new(db: Database, broadcaster: LogBroadcaster) -> Self {
        Self { db, broadcaster }
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }
}

impl EventSink for DbEventLog {
    fn log(
        &self,
        project_id: Option<&str>,
        job_id: Option<&str>,
        severity: Severity,
        message: &str,
        details: Option<Value>,
    ) {
        let now = Utc::now();
        let timestamp = format_timestamp(now);
        let event = NewEvent {
            project_id,
            job_id,
            level: severity.as_str(),
            message,
            module: Some(module_path!()),
            details: details.as_ref().map(Value::to_string),
            timestamp: &timestamp,
        };
        if let Err(e) = event_repo::insert(&self.db, &event) {
            log::warn!("Failed to persist event '{}': {}", message, e);
        }

        self.broadcaster.send(LogEvent {
            timestamp: now,
            level: severity.as_str().to_string(),
            project_id: project_id.map(str::to_string),
            job_id: job_id.map(str::to_string),
            message: message.to_string(),
            details,
        });
    }
}

/// Filter for [`EventLogStore::list`].
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub level: Option<Severity>,
    pub limit: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            job_id: None,
            level: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    pub id: i64,
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub level: String,
    pub message: String,
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl EventEntry {
    fn from_row(row: EventRow) -> Self {
        Self {
            id: row.id,
            details: row.details.as_deref().and_then(|d| serde_json::from_str(d).ok()),
            timestamp: parse_timestamp(&row.timestamp),
            project_id: row.project_id,
            job_id: row.job_id,
            level: row.level,
            message: row.message,
        }
    }
}

/// Read side of the event log.
#[derive(Clone)]
pub struct EventLogStore {
    db: Database,
}

impl EventLogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Newest events first.
    pub fn list(&self, filter: &EventFilter) -> Result<Vec<EventEntry>, DatabaseError> {
        let query = EventQuery {
            project_id: filter.project_id.clone(),
            job_id: filter.job_id.clone(),
            level: filter.level.map(|l| l.as_str().to_string()),
            limit: filter.limit,
        };
        Ok(event_repo::list(&self.db, &query)?
            .into_iter()
            .map(EventEntry::from_row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo;
    use serde_json::json;

    #[test]
    fn test_db_event_log_persists_and_broadcasts() {
        let db = Database::open_in_memory().unwrap();
        project_repo::ensure_exists(&db, "p", "2026-01-01T00:00:00.000000Z").unwrap();
        let sink = DbEventLog::new(db.clone(), LogBroadcaster::new(8));
        let mut rx = sink.broadcaster().subscribe();

        sink.log(
            Some("p"),
            None,
            Severity::Error,
            "Shot 2 failed",
            Some(json!({"shot": 2})),
        );

        let live = rx.try_recv().unwrap();
        assert_eq!(live.level, "ERROR");

        let entries = EventLogStore::new(db)
            .list(&EventFilter {
                project_id: Some("p".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Shot 2 failed");
        assert_eq!(entries[0].details, Some(json!({"shot": 2})));
    }

    #[test]
    fn test_storage_failure_is_swallowed() {
        let db = Database::open_in_memory().unwrap();
        let sink = DbEventLog::new(db.clone(), LogBroadcaster::new(8));
        let mut rx = sink.broadcaster().subscribe();

        // Unknown project violates the foreign key; the caller never sees it.
        sink.log(Some("ghost"), None, Severity::Info, "hello", None);

        assert!(rx.try_recv().is_ok());
        let entries = EventLogStore::new(db).list(&EventFilter::default()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_filter_by_level() {
        let db = Database::open_in_memory().unwrap();
        let sink = DbEventLog::new(db.clone(), LogBroadcaster::default());
        sink.log(None, None, Severity::Info, "a", None);
        sink.log(None, None, Severity::Warning, "b", None);

        let store = EventLogStore::new(db);
        let warnings = store
            .list(&EventFilter {
                level: Some(Severity::Warning),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "b");
    }
}
