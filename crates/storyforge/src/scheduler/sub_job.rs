use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::sub_job_repo::{self, SubJobRow};
use crate::db::{now_timestamp, parse_timestamp, Database};
use crate::error::JobError;
use crate::project::ItemStage;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubJobStatus {
    Submitted,
    Completed,
    Failed,
}

impl SubJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "submitted" => Self::Submitted,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => {
                log::warn!("Unknown sub-job status '{}', treating as failed", other);
                Self::Failed
            }
        }
    }
}

/// One remote task addressing one item, optionally owned by a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubJob {
    pub id: String,
    pub project_id: String,
    pub parent_job_id: Option<String>,
    pub item_key: i64,
    pub stage: ItemStage,
    pub remote_handle: Option<String>,
    pub status: SubJobStatus,
    pub artifact_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubJob {
    fn from_row(row: SubJobRow) -> Self {
        let stage = ItemStage::parse(&row.stage).unwrap_or_else(|| {
            log::warn!("Unknown stage '{}' on sub-job {}", row.stage, row.id);
            ItemStage::Video
        });
        Self {
            status: SubJobStatus::parse(&row.status),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            id: row.id,
            project_id: row.project_id,
            parent_job_id: row.parent_job_id,
            item_key: row.item_key,
            stage,
            remote_handle: row.remote_handle,
            artifact_url: row.artifact_url,
            error_message: row.error_message,
        }
    }
}

/// Sub-job records. Only the poller resolves them once created.
#[derive(Clone)]
pub struct SubJobStore {
    db: Database,
}

impl SubJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records an accepted submission in `submitted` state.
    pub fn create(
        &self,
        project_id: &str,
        parent_job_id: Option<&str>,
        stage: ItemStage,
        item_key: i64,
        remote_handle: &str,
    ) -> Result<SubJob, JobError> {
        self.insert(
            project_id,
            parent_job_id,
            stage,
            item_key,
            Some(remote_handle),
            SubJobStatus::Submitted,
            None,
        )
    }

    /// Records a submission the remote side refused, already `failed`.
    pub fn create_rejected(
        &self,
        project_id: &str,
        parent_job_id: Option<&str>,
        stage: ItemStage,
        item_key: i64,
        error: &str,
    ) -> Result<SubJob, JobError> {
        self.insert(
            project_id,
            parent_job_id,
            stage,
            item_key,
            None,
            SubJobStatus::Failed,
            Some(error),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        project_id: &str,
        parent_job_id: Option<&str>,
        stage: ItemStage,
        item_key: i64,
        remote_handle: Option<&str>,
        status: SubJobStatus,
        error: Option<&str>,
    ) -> Result<SubJob, JobError> {
        let now = now_timestamp();
        let row = SubJobRow {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            parent_job_id: parent_job_id.map(str::to_string),
            item_key,
            stage: stage.as_str().to_string(),
            remote_handle: remote_handle.map(str::to_string),
            status: status.as_str().to_string(),
            artifact_url: None,
            error_message: error.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        };
        sub_job_repo::insert(&self.db, &row)?;
        Ok(SubJob::from_row(row))
    }

    pub fn get(&self, id: &str) -> Result<SubJob, JobError> {
        sub_job_repo::find_by_id(&self.db, id)?
            .map(SubJob::from_row)
            .ok_or_else(|| JobError::NotFound {
                kind: "SubJob",
                id: id.to_string(),
            })
    }

    /// Oldest submitted sub-jobs first.
    pub fn list_submitted(&self, limit: u64) -> Result<Vec<SubJob>, JobError> {
        Ok(
            sub_job_repo::list_by_status(&self.db, SubJobStatus::Submitted.as_str(), limit)?
                .into_iter()
                .map(SubJob::from_row)
                .collect(),
        )
    }

    pub fn list_by_parent(&self, parent_job_id: &str) -> Result<Vec<SubJob>, JobError> {
        Ok(sub_job_repo::list_by_parent(&self.db, parent_job_id)?
            .into_iter()
            .map(SubJob::from_row)
            .collect())
    }

    /// Returns `false` if the sub-job was no longer `submitted`.
    pub fn complete(&self, id: &str, artifact_url: &str) -> Result<bool, JobError> {
        Ok(sub_job_repo::resolve(
            &self.db,
            id,
            SubJobStatus::Completed.as_str(),
            Some(artifact_url),
            None,
            &now_timestamp(),
        )?)
    }

    /// Returns `false` if the sub-job was no longer `submitted`.
    pub fn fail(&self, id: &str, error: &str) -> Result<bool, JobError> {
        Ok(sub_job_repo::resolve(
            &self.db,
            id,
            SubJobStatus::Failed.as_str(),
            None,
            Some(error),
            &now_timestamp(),
        )?)
    }
}
