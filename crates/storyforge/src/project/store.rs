use uuid::Uuid;

use crate::db::item_status_repo::{self, ItemStatusRow};
use crate::db::project_repo::{self, ProjectRow, MAX_ITEM_KEY};
use crate::db::{now_timestamp, Database};
use crate::error::JobError;
use crate::project::model::{ArtifactList, ItemStage, ItemState, ItemStatus, Project};
use crate::usage::Usage;

/// Field-scoped access to the project aggregate.
#[derive(Clone)]
pub struct ProjectStore {
    db: Database,
}

impl ProjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, name: &str, shot_count: i64) -> Result<Project, JobError> {
        let now = now_timestamp();
        let row = ProjectRow {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            shot_count: shot_count.clamp(0, MAX_ITEM_KEY),
            image_paths: "[]".to_string(),
            video_paths: "[]".to_string(),
            usage: "{}".to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        project_repo::insert(&self.db, &row)?;
        Ok(Project::from_row(&row)?)
    }

    pub fn get(&self, id: &str) -> Result<Project, JobError> {
        let row = project_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| JobError::project_not_found(id))?;
        Ok(Project::from_row(&row)?)
    }

    /// Returns whether a placeholder had to be created.
    pub fn ensure_exists(&self, id: &str) -> Result<bool, JobError> {
        Ok(project_repo::ensure_exists(&self.db, id, &now_timestamp())?)
    }

    pub fn set_shot_count(&self, id: &str, shot_count: i64) -> Result<(), JobError> {
        if !project_repo::set_shot_count(
            &self.db,
            id,
            shot_count.clamp(0, MAX_ITEM_KEY),
            &now_timestamp(),
        )? {
            return Err(JobError::project_not_found(id));
        }
        Ok(())
    }

    /// Deletes the project with all of its jobs, sub-jobs, statuses and events.
    pub fn delete(&self, id: &str) -> Result<(), JobError> {
        if !project_repo::delete(&self.db, id)? {
            return Err(JobError::project_not_found(id));
        }
        log::info!("Deleted project {}", id);
        Ok(())
    }

    /// Stores `url` for shot `item_key`. Returns `false` for keys outside
    /// `1..=MAX_ITEM_KEY` and for unknown projects.
    pub fn place_artifact(
        &self,
        id: &str,
        list: ArtifactList,
        item_key: i64,
        url: &str,
    ) -> Result<bool, JobError> {
        let placed =
            project_repo::place_artifact(&self.db, id, list.column(), item_key, url, &now_timestamp())?;
        if !placed {
            log::debug!(
                "Skipped artifact write for project {} item {} ({})",
                id,
                item_key,
                list.dir_name()
            );
        }
        Ok(placed)
    }

    pub fn add_usage(&self, id: &str, usage: Usage) -> Result<Usage, JobError> {
        project_repo::add_usage(&self.db, id, usage, &now_timestamp())?
            .ok_or_else(|| JobError::project_not_found(id))
    }

    /// Rebuilds `video_paths` from the newest completed video sub-job of
    /// each shot. Shots with no completed sub-job keep their entry.
    pub fn sync_latest_videos(&self, id: &str) -> Result<Vec<Option<String>>, JobError> {
        project_repo::sync_from_sub_jobs(
            &self.db,
            id,
            ArtifactList::Videos.column(),
            ItemStage::Video.as_str(),
            &now_timestamp(),
        )?
        .ok_or_else(|| JobError::project_not_found(id))
    }
}

/// Structured per-item status, one row per (project, stage, item).
#[derive(Clone)]
pub struct ItemStatusStore {
    db: Database,
}

impl ItemStatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn mark_processing(
        &self,
        project_id: &str,
        stage: ItemStage,
        item_key: i64,
    ) -> Result<(), JobError> {
        self.write(project_id, stage, item_key, ItemState::Processing, None, None, None)
    }

    pub fn mark_completed(
        &self,
        project_id: &str,
        stage: ItemStage,
        item_key: i64,
        artifact_url: Option<&str>,
    ) -> Result<(), JobError> {
        self.write(
            project_id,
            stage,
            item_key,
            ItemState::Completed,
            artifact_url,
            None,
            None,
        )
    }

    pub fn mark_failed(
        &self,
        project_id: &str,
        stage: ItemStage,
        item_key: i64,
        error: &str,
        request_id: Option<&str>,
    ) -> Result<(), JobError> {
        self.write(
            project_id,
            stage,
            item_key,
            ItemState::Failed,
            None,
            Some(error),
            request_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        project_id: &str,
        stage: ItemStage,
        item_key: i64,
        state: ItemState,
        artifact_url: Option<&str>,
        error: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<(), JobError> {
        item_status_repo::upsert(
            &self.db,
            &ItemStatusRow {
                project_id: project_id.to_string(),
                stage: stage.as_str().to_string(),
                item_key,
                status: state.as_str().to_string(),
                artifact_url: artifact_url.map(str::to_string),
                error: error.map(str::to_string),
                request_id: request_id.map(str::to_string),
                updated_at: now_timestamp(),
            },
        )?;
        Ok(())
    }

    pub fn list(&self, project_id: &str) -> Result<Vec<ItemStatus>, JobError> {
        Ok(item_status_repo::list_by_project(&self.db, project_id)?
            .into_iter()
            .filter_map(ItemStatus::from_row)
            .collect())
    }

    pub fn get(
        &self,
        project_id: &str,
        stage: ItemStage,
        item_key: i64,
    ) -> Result<Option<ItemStatus>, JobError> {
        Ok(self
            .list(project_id)?
            .into_iter()
            .find(|s| s.stage == stage && s.item_key == item_key))
    }
}
