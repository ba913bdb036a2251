use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::item_status_repo::ItemStatusRow;
use crate::db::parse_timestamp;
use crate::db::project_repo::{ArtifactColumn, ProjectRow};
use crate::db::DatabaseError;
use crate::usage::Usage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub shot_count: i64,
    /// Index `n - 1` holds the artifact for shot `n`.
    pub image_paths: Vec<Option<String>>,
    pub video_paths: Vec<Option<String>>,
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn from_row(row: &ProjectRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.id.clone(),
            name: row.name.clone(),
            shot_count: row.shot_count,
            image_paths: serde_json::from_str(&row.image_paths)?,
            video_paths: serde_json::from_str(&row.video_paths)?,
            usage: serde_json::from_str(&row.usage)?,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        })
    }

    /// Artifact stored for a 1-based item key, if any.
    pub fn artifact(&self, list: ArtifactList, item_key: i64) -> Option<&str> {
        let paths = match list {
            ArtifactList::Images => &self.image_paths,
            ArtifactList::Videos => &self.video_paths,
        };
        item_key
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| paths.get(i))
            .and_then(|p| p.as_deref())
    }
}

/// Per-shot artifact lists on the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactList {
    Images,
    Videos,
}

impl ArtifactList {
    pub(crate) fn column(self) -> ArtifactColumn {
        match self {
            Self::Images => ArtifactColumn::ImagePaths,
            Self::Videos => ArtifactColumn::VideoPaths,
        }
    }

    /// Directory segment used in destination keys.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Videos => "videos",
        }
    }
}

/// Pipeline stage an item belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Character,
    Scene,
    Prompt,
    Image,
    Video,
}

impl ItemStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Scene => "scene",
            Self::Prompt => "prompt",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "character" => Some(Self::Character),
            "scene" => Some(Self::Scene),
            "prompt" => Some(Self::Prompt),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// The project list this stage's artifacts are placed in.
    pub fn artifact_list(self) -> Option<ArtifactList> {
        match self {
            Self::Image => Some(ArtifactList::Images),
            Self::Video => Some(ArtifactList::Videos),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Processing,
    Completed,
    Failed,
}

impl ItemState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Fine-grained status of one item, polled by UIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatus {
    pub stage: ItemStage,
    pub item_key: i64,
    pub state: ItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ItemStatus {
    /// Rows with an unknown stage or state are skipped.
    pub fn from_row(row: ItemStatusRow) -> Option<Self> {
        let stage = ItemStage::parse(&row.stage);
        let state = ItemState::parse(&row.status);
        let (Some(stage), Some(state)) = (stage, state) else {
            log::warn!(
                "Skipping item status with stage '{}' and state '{}'",
                row.stage,
                row.status
            );
            return None;
        };
        Some(Self {
            stage,
            item_key: row.item_key,
            state,
            artifact_url: row.artifact_url,
            error: row.error,
            request_id: row.request_id,
            updated_at: parse_timestamp(&row.updated_at),
        })
    }
}
