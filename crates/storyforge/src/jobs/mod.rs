pub mod model;
pub mod runner;
pub mod store;

pub use model::{Job, JobKind, JobStatus, JobUpdate, Terminal};
pub use runner::{JobRunner, StageContext, StageError, StageOutput};
pub use store::JobStore;
