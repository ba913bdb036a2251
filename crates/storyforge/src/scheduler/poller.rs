//! Recurring poll loop that resolves submitted sub-jobs.
//!
//! Each cycle re-reads everything it needs from the database, so the loop
//! keeps no state between cycles and picks up in-flight work after a
//! restart.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Sender};
use serde_json::json;
use tracing::{debug, error, info, info_span, warn};

use crate::config::SchedulerConfig;
use crate::error::{panic_message, JobError};
use crate::events::Severity;
use crate::external::{destination_key, ArtifactStore, RemoteJobClient, RemoteStatus};
use crate::project::ArtifactList;
use crate::scheduler::reconcile::reconcile_parent;
use crate::scheduler::sub_job::SubJob;
use crate::stores::Stores;

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Pending,
    Completed,
    Failed,
    /// Another writer resolved the sub-job first.
    Skipped,
}

pub struct ExternalJobPoller {
    stores: Stores,
    client: Arc<dyn RemoteJobClient>,
    artifacts: Arc<dyn ArtifactStore>,
    config: SchedulerConfig,
}

impl ExternalJobPoller {
    pub fn new(
        stores: Stores,
        client: Arc<dyn RemoteJobClient>,
        artifacts: Arc<dyn ArtifactStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            stores,
            client,
            artifacts,
            config,
        }
    }

    /// Runs one poll cycle over up to `batch_size` submitted sub-jobs.
    ///
    /// Per-sub-job failures are counted, logged and never abort the cycle.
    pub fn poll_once(&self) -> Result<CycleSummary, JobError> {
        let span = info_span!("poll_cycle", batch_size = self.config.batch_size);
        let _enter = span.enter();

        let batch = self.stores.sub_jobs.list_submitted(self.config.batch_size)?;
        let mut summary = CycleSummary {
            checked: batch.len(),
            ..CycleSummary::default()
        };

        for sub in &batch {
            match catch_unwind(AssertUnwindSafe(|| self.process(sub))) {
                Ok(Ok(Resolution::Pending)) => summary.pending += 1,
                Ok(Ok(Resolution::Completed)) => summary.completed += 1,
                Ok(Ok(Resolution::Failed)) => summary.failed += 1,
                Ok(Ok(Resolution::Skipped)) => {}
                Ok(Err(e)) => {
                    summary.errors += 1;
                    error!(sub_job_id = %sub.id, "Failed to process sub-job: {}", e);
                }
                Err(payload) => {
                    summary.errors += 1;
                    error!(
                        sub_job_id = %sub.id,
                        "Sub-job processing panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        if summary.checked > 0 {
            debug!(
                checked = summary.checked,
                completed = summary.completed,
                failed = summary.failed,
                pending = summary.pending,
                "Poll cycle finished"
            );
        }
        Ok(summary)
    }

    fn process(&self, sub: &SubJob) -> Result<Resolution, JobError> {
        let Some(handle) = sub.remote_handle.as_deref() else {
            return self.fail(sub, "Sub-job has no remote handle");
        };

        match self.client.poll_status(handle) {
            Ok(RemoteStatus::Succeeded(Some(remote_ref))) => self.complete(sub, &remote_ref),
            Ok(RemoteStatus::Succeeded(None)) => {
                self.fail(sub, "Remote task succeeded without an artifact reference")
            }
            Ok(RemoteStatus::Failed(reason)) => self.fail(sub, &reason),
            Ok(RemoteStatus::Running | RemoteStatus::Unknown) => self.check_stale(sub),
            Err(e) => {
                warn!(sub_job_id = %sub.id, remote_handle = handle, "Transient poll error: {}", e);
                self.check_stale(sub)
            }
        }
    }

    fn check_stale(&self, sub: &SubJob) -> Result<Resolution, JobError> {
        let Some(limit) = self.config.stale_after() else {
            return Ok(Resolution::Pending);
        };
        let stale = (Utc::now() - sub.created_at)
            .to_std()
            .map(|age| age > limit)
            .unwrap_or(false);
        if !stale {
            return Ok(Resolution::Pending);
        }
        self.fail(
            sub,
            &format!(
                "Timed out: remote task still unfinished after {}s",
                limit.as_secs()
            ),
        )
    }

    fn complete(&self, sub: &SubJob, remote_ref: &str) -> Result<Resolution, JobError> {
        let list = sub.stage.artifact_list().unwrap_or(ArtifactList::Videos);
        let key = destination_key(
            &sub.project_id,
            list,
            sub.item_key,
            Utc::now().timestamp_millis(),
            remote_ref,
        );

        let stored = match self.artifacts.materialize(remote_ref, &key) {
            Ok(stored) => stored,
            Err(e) => return self.fail(sub, &format!("Processing failed: {e}")),
        };
        if !self.stores.sub_jobs.complete(&sub.id, &stored)? {
            return Ok(Resolution::Skipped);
        }

        match self
            .stores
            .projects
            .place_artifact(&sub.project_id, list, sub.item_key, &stored)
        {
            Ok(true) => {}
            Ok(false) => warn!(sub_job_id = %sub.id, item_key = sub.item_key, "Artifact not placed"),
            Err(e) => warn!(sub_job_id = %sub.id, "Failed to place artifact: {}", e),
        }
        if let Err(e) =
            self.stores
                .items
                .mark_completed(&sub.project_id, sub.stage, sub.item_key, Some(&stored))
        {
            warn!(sub_job_id = %sub.id, "Failed to update item status: {}", e);
        }

        info!(
            sub_job_id = %sub.id,
            item_key = sub.item_key,
            artifact = %stored,
            "Sub-job completed"
        );
        self.stores.events.log(
            Some(&sub.project_id),
            sub.parent_job_id.as_deref(),
            Severity::Info,
            &format!("{} {} ready", sub.stage.as_str(), sub.item_key),
            Some(json!({ "sub_job_id": sub.id, "artifact": stored })),
        );

        self.reconcile(sub);
        Ok(Resolution::Completed)
    }

    fn fail(&self, sub: &SubJob, reason: &str) -> Result<Resolution, JobError> {
        if !self.stores.sub_jobs.fail(&sub.id, reason)? {
            return Ok(Resolution::Skipped);
        }
        if let Err(e) = self.stores.items.mark_failed(
            &sub.project_id,
            sub.stage,
            sub.item_key,
            reason,
            sub.remote_handle.as_deref(),
        ) {
            warn!(sub_job_id = %sub.id, "Failed to update item status: {}", e);
        }

        warn!(sub_job_id = %sub.id, item_key = sub.item_key, "Sub-job failed: {}", reason);
        self.stores.events.log(
            Some(&sub.project_id),
            sub.parent_job_id.as_deref(),
            Severity::Error,
            &format!("{} {} failed: {}", sub.stage.as_str(), sub.item_key, reason),
            Some(json!({ "sub_job_id": sub.id })),
        );

        self.reconcile(sub);
        Ok(Resolution::Failed)
    }

    fn reconcile(&self, sub: &SubJob) {
        let Some(parent) = sub.parent_job_id.as_deref() else {
            return;
        };
        if let Err(e) = reconcile_parent(&self.stores.jobs, parent) {
            warn!(job_id = parent, "Failed to reconcile parent job: {}", e);
        }
    }

    /// Starts the poll loop on its own thread. The first cycle runs at once.
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = bounded::<()>(1);
        let interval = self.config.poll_interval();

        let stop_flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("storyforge-poller".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "External job poller started");
                let ticker = tick(interval);
                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = self.poll_once() {
                        error!("Poll cycle failed: {}", e);
                    }

                    select! {
                        recv(ticker) -> _ => {},
                        recv(wake_rx) -> msg => {
                            if msg.is_err() {
                                break;
                            }
                        },
                    }
                }
                info!("External job poller stopped");
            });

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn poller thread: {}", e);
                None
            }
        };

        PollerHandle {
            shutdown,
            wake: wake_tx,
            thread,
        }
    }
}

/// Control handle for a running poll loop.
pub struct PollerHandle {
    shutdown: Arc<AtomicBool>,
    wake: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Requests an extra cycle without waiting for the next tick.
    pub fn trigger(&self) {
        let _ = self.wake.try_send(());
    }

    /// Signals the loop to exit after its current cycle.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the loop and waits for the thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Poller thread panicked");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
