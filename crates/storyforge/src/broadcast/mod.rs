//! Broadcasting modules for real-time streaming of job and log updates.
//!
//! Publishing never blocks and never fails the writer: a channel without
//! subscribers, or with lagging ones, simply drops events.

pub mod job_updates;
pub mod log_broadcaster;

pub use job_updates::JobUpdateBroadcaster;
pub use log_broadcaster::{LogBroadcaster, LogEvent};
