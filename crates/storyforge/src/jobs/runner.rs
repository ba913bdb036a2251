//! Background job runner.
//!
//! Wraps a blocking stage function as a tracked job and executes it on the
//! tokio blocking pool, so the caller gets the job id back immediately.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span};

use crate::db::DatabaseError;
use crate::error::{panic_message, GenerationError, JobError, SubmissionError};
use crate::events::Severity;
use crate::jobs::model::{Job, JobKind, JobStatus, JobUpdate, Terminal};
use crate::stores::Stores;
use crate::usage::Usage;

/// What a stage function hands back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// The stage finished; the job completes with `result`.
    Done { result: Value, usage: Usage },
    /// Remote work is outstanding; the poller will finish the job.
    Deferred { usage: Usage },
}

impl StageOutput {
    pub fn done(result: Value) -> Self {
        Self::Done {
            result,
            usage: Usage::default(),
        }
    }

    fn usage(&self) -> Usage {
        match self {
            Self::Done { usage, .. } | Self::Deferred { usage } => *usage,
        }
    }
}

/// A stage failure, recorded on the job as its error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StageError(pub String);

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<GenerationError> for StageError {
    fn from(e: GenerationError) -> Self {
        Self(e.to_string())
    }
}

impl From<SubmissionError> for StageError {
    fn from(e: SubmissionError) -> Self {
        Self(e.to_string())
    }
}

impl From<JobError> for StageError {
    fn from(e: JobError) -> Self {
        Self(e.to_string())
    }
}

impl From<DatabaseError> for StageError {
    fn from(e: DatabaseError) -> Self {
        Self(e.to_string())
    }
}

/// Handed to stage functions for progress reporting.
pub struct StageContext {
    job: Job,
    stores: Stores,
}

impl StageContext {
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn project_id(&self) -> &str {
        &self.job.project_id
    }

    pub fn kind(&self) -> &JobKind {
        &self.job.kind
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Records progress and the current step. Failures are logged only.
    pub fn progress(&self, progress: u8, step: impl Into<String>) {
        let update = JobUpdate::default().progress(progress).step(step);
        if let Err(e) = self.stores.jobs.update(&self.job.id, update) {
            log::warn!("Progress update for job {} failed: {}", self.job.id, e);
        }
    }

    pub fn step(&self, step: impl Into<String>) {
        let update = JobUpdate::default().step(step);
        if let Err(e) = self.stores.jobs.update(&self.job.id, update) {
            log::warn!("Step update for job {} failed: {}", self.job.id, e);
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    stores: Stores,
    runtime: Handle,
}

impl JobRunner {
    pub fn new(stores: Stores, runtime: Handle) -> Self {
        Self { stores, runtime }
    }

    /// Creates the job, marks it running and schedules `stage` without
    /// waiting for it. Returns the job id.
    pub fn submit<F>(&self, project_id: &str, kind: JobKind, stage: F) -> Result<String, JobError>
    where
        F: FnOnce(&StageContext) -> Result<StageOutput, StageError> + Send + 'static,
    {
        self.spawn(project_id, kind, stage).map(|(job, _)| job.id)
    }

    /// Like [`submit`](Self::submit) but also returns the task handle.
    pub fn spawn<F>(
        &self,
        project_id: &str,
        kind: JobKind,
        stage: F,
    ) -> Result<(Job, JoinHandle<()>), JobError>
    where
        F: FnOnce(&StageContext) -> Result<StageOutput, StageError> + Send + 'static,
    {
        let job = self.stores.jobs.create(project_id, kind)?;
        let job = self
            .stores
            .jobs
            .update(&job.id, JobUpdate::default().status(JobStatus::Running))?;

        self.stores.events.log(
            Some(&job.project_id),
            Some(&job.id),
            Severity::Info,
            &format!("Started {}", job.kind),
            None,
        );

        let ctx = StageContext {
            job: job.clone(),
            stores: self.stores.clone(),
        };
        let handle = self.runtime.spawn_blocking(move || execute(ctx, stage));
        Ok((job, handle))
    }
}

fn execute<F>(ctx: StageContext, stage: F)
where
    F: FnOnce(&StageContext) -> Result<StageOutput, StageError>,
{
    let span = info_span!(
        "job",
        job_id = %ctx.job.id,
        kind = %ctx.job.kind,
        project_id = %ctx.job.project_id
    );
    let _enter = span.enter();

    let outcome = catch_unwind(AssertUnwindSafe(|| stage(&ctx))).unwrap_or_else(|payload| {
        Err(StageError(format!(
            "stage panicked: {}",
            panic_message(payload.as_ref())
        )))
    });

    let stores = &ctx.stores;
    let job = &ctx.job;
    match outcome {
        Ok(output) => {
            let usage = output.usage();
            if !usage.is_empty() {
                if let Err(e) = stores.projects.add_usage(&job.project_id, usage) {
                    log::warn!("Failed to record usage for job {}: {}", job.id, e);
                }
            }
            match output {
                StageOutput::Done { result, .. } => {
                    finish(&ctx, Terminal::Completed { result });
                    stores.events.log(
                        Some(&job.project_id),
                        Some(&job.id),
                        Severity::Info,
                        &format!("{} completed", job.kind),
                        Some(json!({ "usage": usage })),
                    );
                    info!("Job completed");
                }
                StageOutput::Deferred { .. } => {
                    stores.events.log(
                        Some(&job.project_id),
                        Some(&job.id),
                        Severity::Info,
                        &format!("{} submitted, waiting for remote tasks", job.kind),
                        Some(json!({ "usage": usage })),
                    );
                    info!("Job deferred to poller");
                }
            }
        }
        Err(e) => {
            finish(
                &ctx,
                Terminal::Failed {
                    error: e.to_string(),
                },
            );
            stores.events.log(
                Some(&job.project_id),
                Some(&job.id),
                Severity::Error,
                &format!("{} failed: {}", job.kind, e),
                None,
            );
            error!("Job failed: {}", e);
        }
    }
}

fn finish(ctx: &StageContext, outcome: Terminal) {
    match ctx.stores.jobs.finish(&ctx.job.id, outcome) {
        Ok((_, true)) => {}
        Ok((job, false)) => {
            log::debug!("Job {} was already {} when its stage returned", job.id, job.status)
        }
        Err(e) => log::error!("Failed to record outcome of job {}: {}", ctx.job.id, e),
    }
}
