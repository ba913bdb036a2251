//! Append-only event log rows.

use rusqlite::{params_from_iter, types::Value, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub id: i64,
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub level: String,
    pub message: String,
    pub module: Option<String>,
    /// JSON-encoded details.
    pub details: Option<String>,
    pub timestamp: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            job_id: row.get("job_id")?,
            level: row.get("level")?,
            message: row.get("message")?,
            module: row.get("module")?,
            details: row.get("details")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

/// A new event; the id is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub project_id: Option<&'a str>,
    pub job_id: Option<&'a str>,
    pub level: &'a str,
    pub message: &'a str,
    pub module: Option<&'a str>,
    pub details: Option<String>,
    pub timestamp: &'a str,
}

/// Row filter for [`list`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub level: Option<String>,
    pub limit: u32,
}

/// Inserts an event and returns its row id.
pub fn insert(db: &Database, event: &NewEvent<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO event_logs (project_id, job_id, level, message, module, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                event.project_id,
                event.job_id,
                event.level,
                event.message,
                event.module,
                event.details,
                event.timestamp,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists matching events, newest first.
pub fn list(db: &Database, query: &EventQuery) -> Result<Vec<EventRow>, DatabaseError> {
    let mut sql = String::from("SELECT * FROM event_logs WHERE 1=1");
    let mut args: Vec<Value> = Vec::new();

    if let Some(project_id) = &query.project_id {
        args.push(Value::Text(project_id.clone()));
        sql.push_str(&format!(" AND project_id = ?{}", args.len()));
    }
    if let Some(job_id) = &query.job_id {
        args.push(Value::Text(job_id.clone()));
        sql.push_str(&format!(" AND job_id = ?{}", args.len()));
    }
    if let Some(level) = &query.level {
        args.push(Value::Text(level.clone()));
        sql.push_str(&format!(" AND level = ?{}", args.len()));
    }
    args.push(Value::Integer(i64::from(query.limit)));
    sql.push_str(&format!(" ORDER BY timestamp DESC, id DESC LIMIT ?{}", args.len()));

    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
