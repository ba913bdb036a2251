//! Tracking and polling of externally submitted long-running work.

pub mod poller;
pub mod reconcile;
pub mod sub_job;

pub use poller::{CycleSummary, ExternalJobPoller, PollerHandle};
pub use reconcile::{aggregate, reconcile_parent};
pub use sub_job::{SubJob, SubJobStatus, SubJobStore};
