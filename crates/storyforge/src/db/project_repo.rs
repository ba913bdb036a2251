//! Project rows: the parent aggregate of jobs and sub-jobs.
//!
//! Every write here is field-scoped: artifact lists and usage counters are
//! read, modified and written back inside a single `with_conn` call, so two
//! writers touching different fields (or different indices) never clobber
//! each other.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{sub_job_repo, Database, DatabaseError};
use crate::usage::Usage;

/// Name given to projects created implicitly by job submission.
pub const PLACEHOLDER_NAME: &str = "Unknown Project";

/// Largest item key an artifact list is grown to hold.
pub const MAX_ITEM_KEY: i64 = 10_000;

/// A raw project row. List and usage columns are still JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub shot_count: i64,
    pub image_paths: String,
    pub video_paths: String,
    pub usage: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            shot_count: row.get("shot_count")?,
            image_paths: row.get("image_paths")?,
            video_paths: row.get("video_paths")?,
            usage: row.get("usage")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn artifacts(&self, column: ArtifactColumn) -> &str {
        match column {
            ArtifactColumn::ImagePaths => &self.image_paths,
            ArtifactColumn::VideoPaths => &self.video_paths,
        }
    }
}

/// Which per-shot artifact list a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactColumn {
    ImagePaths,
    VideoPaths,
}

impl ArtifactColumn {
    fn as_sql(self) -> &'static str {
        match self {
            Self::ImagePaths => "image_paths",
            Self::VideoPaths => "video_paths",
        }
    }
}

/// Grows `list` to at least `max(shot_count, item_key)` entries and stores
/// `url` at the 1-based `item_key`. Keys outside `1..=MAX_ITEM_KEY` leave
/// the list untouched.
pub fn assign_indexed(
    list: &mut Vec<Option<String>>,
    shot_count: i64,
    item_key: i64,
    url: &str,
) -> bool {
    if !(1..=MAX_ITEM_KEY).contains(&item_key) {
        return false;
    }
    let wanted = shot_count.clamp(0, MAX_ITEM_KEY).max(item_key) as usize;
    if list.len() < wanted {
        list.resize(wanted, None);
    }
    list[(item_key - 1) as usize] = Some(url.to_string());
    true
}

pub fn insert(db: &Database, project: &ProjectRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, name, shot_count, image_paths, video_paths, usage,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                project.id,
                project.name,
                project.shot_count,
                project.image_paths,
                project.video_paths,
                project.usage,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Creates a placeholder project if `id` is unknown. Returns whether a row
/// was created.
pub fn ensure_exists(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let created = conn.execute(
            "INSERT OR IGNORE INTO projects (id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![id, PLACEHOLDER_NAME, now],
        )?;
        Ok(created == 1)
    })
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM projects WHERE id = ?1",
            params![id],
            ProjectRow::from_row,
        )
        .optional()?)
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Updates the shot count. Existing list entries are never dropped.
pub fn set_shot_count(
    db: &Database,
    id: &str,
    shot_count: i64,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET shot_count = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, shot_count, now],
        )?;
        Ok(changed == 1)
    })
}

pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    })
}

/// Bounds-safe indexed write into one artifact list.
///
/// Returns `false` when the project is missing or `item_key` is out of range.
pub fn place_artifact(
    db: &Database,
    id: &str,
    column: ArtifactColumn,
    item_key: i64,
    url: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let Some(row) = select_by_id(conn, id)? else {
            return Ok(false);
        };
        let mut list: Vec<Option<String>> = serde_json::from_str(row.artifacts(column))?;
        if !assign_indexed(&mut list, row.shot_count, item_key, url) {
            return Ok(false);
        }
        write_list(conn, id, column, &list, now)?;
        Ok(true)
    })
}

/// Rebuilds one artifact list from the newest completed sub-job of each item
/// of `stage`. Items without a completed sub-job keep their entry.
///
/// The project row, the sub-job query and the write share one unit of work,
/// so an artifact placed concurrently for another item is never lost.
pub fn sync_from_sub_jobs(
    db: &Database,
    id: &str,
    column: ArtifactColumn,
    stage: &str,
    now: &str,
) -> Result<Option<Vec<Option<String>>>, DatabaseError> {
    db.with_conn(|conn| {
        let Some(row) = select_by_id(conn, id)? else {
            return Ok(None);
        };
        let mut list: Vec<Option<String>> = serde_json::from_str(row.artifacts(column))?;
        let wanted = row.shot_count.clamp(0, MAX_ITEM_KEY) as usize;
        if list.len() < wanted {
            list.resize(wanted, None);
        }
        for sub in sub_job_repo::select_latest_completed(conn, id, stage)? {
            if let Some(url) = sub.artifact_url.as_deref() {
                assign_indexed(&mut list, row.shot_count, sub.item_key, url);
            }
        }
        write_list(conn, id, column, &list, now)?;
        Ok(Some(list))
    })
}

fn write_list(
    conn: &Connection,
    id: &str,
    column: ArtifactColumn,
    list: &[Option<String>],
    now: &str,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "UPDATE projects SET {} = ?2, updated_at = ?3 WHERE id = ?1",
        column.as_sql()
    );
    conn.execute(&sql, params![id, serde_json::to_string(list)?, now])?;
    Ok(())
}

/// Adds `usage` onto the stored counters. Returns the new totals.
pub fn add_usage(
    db: &Database,
    id: &str,
    usage: Usage,
    now: &str,
) -> Result<Option<Usage>, DatabaseError> {
    db.with_conn(|conn| {
        let Some(row) = select_by_id(conn, id)? else {
            return Ok(None);
        };
        let mut total: Usage = serde_json::from_str(&row.usage)?;
        total += usage;
        conn.execute(
            "UPDATE projects SET usage = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(&total)?, now],
        )?;
        Ok(Some(total))
    })
}
