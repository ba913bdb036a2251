use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoryforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors surfaced by the job stores, runner and orchestrator.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Item key {key} is outside 1..={max}")]
    InvalidItemKey { key: i64, max: i64 },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Stage failed: {0}")]
    StageFailed(String),
}

impl JobError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Job",
            id: id.into(),
        }
    }

    pub fn project_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Project",
            id: id.into(),
        }
    }
}

/// The external system refused or could not accept a unit of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Submission rejected: {message}")]
pub struct SubmissionError {
    pub message: String,
}

impl SubmissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A synchronous generation call failed for one item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Generation failed: {message}")]
pub struct GenerationError {
    pub message: String,
    /// Correlation id of the failed request, when the remote side gave one.
    pub request_id: Option<String>,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl From<SubmissionError> for GenerationError {
    fn from(e: SubmissionError) -> Self {
        Self::new(e.message)
    }
}

/// The remote job succeeded but relocating its artifact failed.
#[derive(Error, Debug)]
pub enum MaterializationError {
    #[error("Failed to fetch artifact '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to write artifact '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid destination key '{0}'")]
    InvalidKey(String),
}

/// A single status query failed; the sub-job stays submitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Status poll failed: {0}")]
pub struct PollError(pub String);

pub type Result<T> = std::result::Result<T, StoryforgeError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
