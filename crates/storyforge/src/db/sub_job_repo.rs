//! Rows for externally submitted long-running work.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw sub-job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct SubJobRow {
    pub id: String,
    pub project_id: String,
    pub parent_job_id: Option<String>,
    pub item_key: i64,
    pub stage: String,
    /// Remote task id; absent when the submission itself was rejected.
    pub remote_handle: Option<String>,
    pub status: String,
    pub artifact_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SubJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            parent_job_id: row.get("parent_job_id")?,
            item_key: row.get("item_key")?,
            stage: row.get("stage")?,
            remote_handle: row.get("remote_handle")?,
            status: row.get("status")?,
            artifact_url: row.get("artifact_url")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Terminal counts over the children of one parent job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Inserts a new sub-job row.
pub fn insert(db: &Database, sub: &SubJobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sub_jobs (id, project_id, parent_job_id, item_key, stage, remote_handle,
             status, artifact_url, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sub.id,
                sub.project_id,
                sub.parent_job_id,
                sub.item_key,
                sub.stage,
                sub.remote_handle,
                sub.status,
                sub.artifact_url,
                sub.error_message,
                sub.created_at,
                sub.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a sub-job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<SubJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM sub_jobs WHERE id = ?1",
                params![id],
                SubJobRow::from_row,
            )
            .optional()?)
    })
}

/// Returns up to `limit` sub-jobs in the given status, oldest first.
pub fn list_by_status(
    db: &Database,
    status: &str,
    limit: u64,
) -> Result<Vec<SubJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM sub_jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status, limit as i64], SubJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists all children of a parent job in submission order.
pub fn list_by_parent(db: &Database, parent_job_id: &str) -> Result<Vec<SubJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM sub_jobs WHERE parent_job_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![parent_job_id], SubJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts children of a parent job by terminal status.
///
/// Takes a connection so the count and the parent write that depends on it
/// can share one unit of work.
pub fn count_children(conn: &Connection, parent_job_id: &str) -> Result<ChildCounts, DatabaseError> {
    let counts = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
         FROM sub_jobs WHERE parent_job_id = ?1",
        params![parent_job_id],
        |r| {
            Ok(ChildCounts {
                total: r.get::<_, i64>(0)? as u64,
                completed: r.get::<_, i64>(1)? as u64,
                failed: r.get::<_, i64>(2)? as u64,
            })
        },
    )?;
    Ok(counts)
}

/// Moves a `submitted` sub-job to a terminal status.
///
/// Returns `false` when the row is missing or already terminal, so a
/// second resolution of the same sub-job never writes.
pub fn resolve(
    db: &Database,
    id: &str,
    status: &str,
    artifact_url: Option<&str>,
    error_message: Option<&str>,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE sub_jobs SET status = ?2, artifact_url = ?3, error_message = ?4, updated_at = ?5
             WHERE id = ?1 AND status = 'submitted'",
            params![id, status, artifact_url, error_message, updated_at],
        )?;
        Ok(changed == 1)
    })
}

/// Latest completed sub-job per item of one stage, ordered by item key.
pub fn select_latest_completed(
    conn: &Connection,
    project_id: &str,
    stage: &str,
) -> Result<Vec<SubJobRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM sub_jobs
         WHERE project_id = ?1 AND stage = ?2 AND status = 'completed'
         ORDER BY item_key ASC, created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map(params![project_id, stage], SubJobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut latest: Vec<SubJobRow> = Vec::new();
    for row in rows {
        if latest.last().map(|l| l.item_key) != Some(row.item_key) {
            latest.push(row);
        }
    }
    Ok(latest)
}
