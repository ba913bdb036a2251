pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod external;
pub mod fanout;
pub mod jobs;
pub mod orchestrator;
pub mod project;
pub mod scheduler;
pub mod stores;
pub mod usage;

pub use broadcast::{JobUpdateBroadcaster, LogBroadcaster, LogEvent};
pub use cache::{StatusCache, TtlStatusCache};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{
    ConfigError, GenerationError, JobError, MaterializationError, PollError, Result,
    StoryforgeError, SubmissionError,
};
pub use events::{DbEventLog, EventFilter, EventLogStore, EventSink, Severity};
pub use external::{
    ArtifactStore, GenerationApi, HttpTaskClient, LocalArtifactStore, RemoteJobClient, RemoteStatus,
};
pub use fanout::{BatchReport, FanOutExecutor, ItemOutcome, Keyed, ResourceClass};
pub use jobs::{Job, JobKind, JobRunner, JobStatus, StageContext, StageError, StageOutput};
pub use orchestrator::{Collaborators, Orchestrator, RemoteItem, SubmitSummary};
pub use project::{ArtifactList, ItemStage, ItemState, ItemStatus, Project};
pub use scheduler::{ExternalJobPoller, PollerHandle};
pub use stores::Stores;
pub use usage::Usage;
