//! Write-through status cache for jobs.
//!
//! The cache is never authoritative: every read miss or cache error falls
//! back to the database in [`crate::jobs::JobStore`].

use std::time::Duration;

use moka::sync::Cache;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::jobs::Job;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Status cache unavailable: {0}")]
pub struct CacheError(pub String);

/// A short-lived mirror of job state keyed by job id.
pub trait StatusCache: Send + Sync {
    fn read(&self, job_id: &str) -> Result<Option<Job>, CacheError>;

    /// Stores a snapshot and renews its time-to-live.
    fn write(&self, job: &Job) -> Result<(), CacheError>;
}

/// In-process TTL cache backed by moka.
#[derive(Clone)]
pub struct TtlStatusCache {
    inner: Option<Cache<String, Job>>,
}

impl TtlStatusCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner: Some(cache) }
    }

    /// A cache that never holds anything.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::new(config.ttl(), config.max_capacity)
        } else {
            Self::disabled()
        }
    }
}

impl StatusCache for TtlStatusCache {
    fn read(&self, job_id: &str) -> Result<Option<Job>, CacheError> {
        Ok(self.inner.as_ref().and_then(|c| c.get(job_id)))
    }

    fn write(&self, job: &Job) -> Result<(), CacheError> {
        if let Some(cache) = &self.inner {
            cache.insert(job.id.clone(), job.clone());
        }
        Ok(())
    }
}
