//! Narrow interfaces to the systems the orchestration core depends on.

pub mod artifacts;
pub mod http;

pub use artifacts::{destination_key, LocalArtifactStore};
pub use http::{parse_task_status, HttpTaskClient};

use serde_json::Value;

use crate::error::{GenerationError, MaterializationError, PollError, SubmissionError};
use crate::usage::Usage;

/// State of a remote task as reported by the external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    /// Carries the artifact reference when the remote side returned one.
    Succeeded(Option<String>),
    Failed(String),
    /// The response could not be interpreted; treated like `Running`.
    Unknown,
}

/// A remote system that accepts long-running tasks and reports on them.
pub trait RemoteJobClient: Send + Sync {
    /// Submits an opaque payload and returns the remote handle.
    fn submit(&self, payload: &Value) -> Result<String, SubmissionError>;

    fn poll_status(&self, remote_handle: &str) -> Result<RemoteStatus, PollError>;
}

/// Synchronous generation: one call, one artifact.
pub trait GenerationApi: Send + Sync {
    fn generate(&self, payload: &Value) -> (Result<String, GenerationError>, Usage);
}

/// Relocates remote artifacts into durable storage.
pub trait ArtifactStore: Send + Sync {
    /// Returns the stable reference of the stored artifact.
    fn materialize(
        &self,
        remote_ref: &str,
        destination_key: &str,
    ) -> Result<String, MaterializationError>;
}
