//! Job domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::job_repo::JobRow;
use crate::db::{format_timestamp, parse_timestamp};

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a plain update may move a job from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => !a.is_terminal(),
            (Self::Pending, _) => true,
            (Self::Running, Self::Pending) => false,
            (Self::Running, _) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    ScriptGeneration,
    CharacterGeneration,
    SceneGeneration,
    StoryboardGeneration,
    PromptGeneration,
    ImageGeneration,
    VideoGeneration,
    VideoRegeneration,
    VideoMerge,
    Other(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ScriptGeneration => "script_generation",
            Self::CharacterGeneration => "character_generation",
            Self::SceneGeneration => "scene_generation",
            Self::StoryboardGeneration => "storyboard_generation",
            Self::PromptGeneration => "prompt_generation",
            Self::ImageGeneration => "image_generation",
            Self::VideoGeneration => "video_generation",
            Self::VideoRegeneration => "video_regeneration",
            Self::VideoMerge => "video_merge",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "script_generation" => Self::ScriptGeneration,
            "character_generation" => Self::CharacterGeneration,
            "scene_generation" => Self::SceneGeneration,
            "storyboard_generation" => Self::StoryboardGeneration,
            "prompt_generation" => Self::PromptGeneration,
            "image_generation" => Self::ImageGeneration,
            "video_generation" => Self::VideoGeneration,
            "video_regeneration" => Self::VideoRegeneration,
            "video_merge" => Self::VideoMerge,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A job as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub project_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0 to 100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn from_row(row: &JobRow) -> Self {
        let status = JobStatus::parse(&row.status).unwrap_or_else(|| {
            log::warn!(
                "Unknown job status '{}' for job {}, treating as failed",
                row.status,
                row.id
            );
            JobStatus::Failed
        });
        let result = row.result.as_deref().and_then(|s| {
            serde_json::from_str(s)
                .map_err(|e| log::warn!("Unreadable result for job {}: {}", row.id, e))
                .ok()
        });

        Self {
            id: row.id.clone(),
            project_id: row.project_id.clone(),
            kind: JobKind::parse(&row.kind),
            status,
            progress: row.progress.clamp(0, 100) as u8,
            current_step: row.current_step.clone(),
            result,
            error: row.error.clone(),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }

    pub fn to_row(&self) -> JobRow {
        JobRow {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            kind: self.kind.as_str().to_string(),
            status: self.status.as_str().to_string(),
            progress: i64::from(self.progress),
            current_step: self.current_step.clone(),
            result: self.result.as_ref().map(Value::to_string),
            error: self.error.clone(),
            created_at: format_timestamp(self.created_at),
            updated_at: format_timestamp(self.updated_at),
        }
    }
}

/// Partial update; `None` fields are left unchanged.
///
/// `clear_result` and `clear_error` erase the stored value first, so a
/// re-driven parent does not keep the outcome of its previous run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub clear_result: bool,
    pub clear_error: bool,
}

impl JobUpdate {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn clear_result(mut self) -> Self {
        self.clear_result = true;
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.clear_error = true;
        self
    }

    pub fn apply_to(&self, row: &mut JobRow) {
        if self.clear_result {
            row.result = None;
        }
        if self.clear_error {
            row.error = None;
        }
        if let Some(status) = self.status {
            row.status = status.as_str().to_string();
        }
        if let Some(progress) = self.progress {
            row.progress = i64::from(progress.min(100));
        }
        if let Some(step) = &self.current_step {
            row.current_step = Some(step.clone());
        }
        if let Some(result) = &self.result {
            row.result = Some(result.to_string());
        }
        if let Some(error) = &self.error {
            row.error = Some(error.clone());
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Completed { result: Value },
    Failed { error: String },
}
