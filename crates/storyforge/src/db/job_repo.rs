//! Persistence for the `jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub project_id: String,
    pub kind: String,
    pub status: String,
    pub progress: i64,
    pub current_step: Option<String>,
    /// JSON-encoded result payload.
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            current_step: row.get("current_step")?,
            result: row.get("result")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, project_id, kind, status, progress, current_step, result,
             error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.project_id,
                job.kind,
                job.status,
                job.progress,
                job.current_step,
                job.result,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Reads one job row on an already locked connection.
pub fn select_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Lists all jobs of a project, newest first.
pub fn list_by_project(db: &Database, project_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE project_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![project_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Writes the mutable columns of `row` back on an already locked connection.
pub fn update_row(conn: &Connection, row: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status=?2, progress=?3, current_step=?4, result=?5, error=?6,
         updated_at=?7 WHERE id=?1",
        params![
            row.id,
            row.status,
            row.progress,
            row.current_step,
            row.result,
            row.error,
            row.updated_at,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo;

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        project_repo::ensure_exists(&db, "proj-1", "2026-01-01T00:00:00.000000Z").unwrap();
        db
    }

    fn sample_job(id: &str, created_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            kind: "image_generation".to_string(),
            status: "pending".to_string(),
            progress: 0,
            current_step: None,
            result: None,
            error: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1", "2026-01-01T00:00:00.000000Z")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.kind, "image_generation");
        assert_eq!(found.status, "pending");
        assert_eq!(found.progress, 0);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_insert_requires_project() {
        let db = test_db();
        let mut job = sample_job("orphan", "2026-01-01T00:00:00.000000Z");
        job.project_id = "missing".to_string();
        assert!(insert(&db, &job).is_err());
    }

    #[test]
    fn test_list_by_project_newest_first() {
        let db = test_db();
        insert(&db, &sample_job("a", "2026-01-01T00:00:00.000000Z")).unwrap();
        insert(&db, &sample_job("b", "2026-01-03T00:00:00.000000Z")).unwrap();
        insert(&db, &sample_job("c", "2026-01-02T00:00:00.000000Z")).unwrap();

        let ids: Vec<String> = list_by_project(&db, "proj-1")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(list_by_project(&db, "other").unwrap().is_empty());
    }

    #[test]
    fn test_update_row_writes_mutable_columns() {
        let db = test_db();
        insert(&db, &sample_job("m1", "2026-01-01T00:00:00.000000Z")).unwrap();

        db.with_conn(|conn| {
            let mut row = select_by_id(conn, "m1")?.unwrap();
            row.status = "completed".to_string();
            row.progress = 100;
            row.result = Some(r#"{"completed":2}"#.to_string());
            row.kind = "ignored".to_string();
            row.updated_at = "2026-01-01T00:00:05.000000Z".to_string();
            update_row(conn, &row)
        })
        .unwrap();

        let stored = find_by_id(&db, "m1").unwrap().unwrap();
        assert_eq!(stored.status, "completed");
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.result.as_deref(), Some(r#"{"completed":2}"#));
        assert_eq!(stored.kind, "image_generation");
        assert_eq!(stored.updated_at, "2026-01-01T00:00:05.000000Z");
        assert!(db
            .with_conn(|conn| select_by_id(conn, "missing"))
            .unwrap()
            .is_none());
    }
}
