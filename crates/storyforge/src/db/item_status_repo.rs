//! Per-item status rows keyed by (project, stage, item).

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatusRow {
    pub project_id: String,
    pub stage: String,
    pub item_key: i64,
    pub status: String,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
    pub request_id: Option<String>,
    pub updated_at: String,
}

impl ItemStatusRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            project_id: row.get("project_id")?,
            stage: row.get("stage")?,
            item_key: row.get("item_key")?,
            status: row.get("status")?,
            artifact_url: row.get("artifact_url")?,
            error: row.get("error")?,
            request_id: row.get("request_id")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or replaces the status of a single item.
///
/// Each call touches one row only, so concurrent workers writing
/// different items never overwrite each other.
pub fn upsert(db: &Database, row: &ItemStatusRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO item_status (project_id, stage, item_key, status, artifact_url, error,
             request_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(project_id, stage, item_key) DO UPDATE SET
                status = excluded.status,
                artifact_url = excluded.artifact_url,
                error = excluded.error,
                request_id = excluded.request_id,
                updated_at = excluded.updated_at",
            params![
                row.project_id,
                row.stage,
                row.item_key,
                row.status,
                row.artifact_url,
                row.error,
                row.request_id,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// All item statuses of a project, ordered by stage then item.
pub fn list_by_project(db: &Database, project_id: &str) -> Result<Vec<ItemStatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM item_status WHERE project_id = ?1 ORDER BY stage ASC, item_key ASC",
        )?;
        let rows = stmt
            .query_map(params![project_id], ItemStatusRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo;

    const T0: &str = "2026-01-01T00:00:00.000000Z";

    fn row(stage: &str, item_key: i64, status: &str) -> ItemStatusRow {
        ItemStatusRow {
            project_id: "p".to_string(),
            stage: stage.to_string(),
            item_key,
            status: status.to_string(),
            artifact_url: None,
            error: None,
            request_id: None,
            updated_at: T0.to_string(),
        }
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let db = Database::open_in_memory().unwrap();
        project_repo::ensure_exists(&db, "p", T0).unwrap();

        upsert(&db, &row("video", 1, "processing")).unwrap();
        let mut failed = row("video", 1, "failed");
        failed.error = Some("boom".to_string());
        failed.request_id = Some("req-9".to_string());
        upsert(&db, &failed).unwrap();

        let rows = list_by_project(&db, "p").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "failed");
        assert_eq!(rows[0].error.as_deref(), Some("boom"));
        assert_eq!(rows[0].request_id.as_deref(), Some("req-9"));
    }

    #[test]
    fn test_keys_are_independent() {
        let db = Database::open_in_memory().unwrap();
        project_repo::ensure_exists(&db, "p", T0).unwrap();

        upsert(&db, &row("video", 2, "completed")).unwrap();
        upsert(&db, &row("image", 2, "processing")).unwrap();
        upsert(&db, &row("video", 1, "processing")).unwrap();

        let keys: Vec<(String, i64)> = list_by_project(&db, "p")
            .unwrap()
            .into_iter()
            .map(|r| (r.stage, r.item_key))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("image".to_string(), 2),
                ("video".to_string(), 1),
                ("video".to_string(), 2)
            ]
        );
    }
}
