//! The orchestration service: one instance per process, holding the stores,
//! the runner and the external collaborators.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn};

use crate::broadcast::JobUpdateBroadcaster;
use crate::cache::StatusCache;
use crate::config::{ConcurrencyConfig, Config, SchedulerConfig};
use crate::db::project_repo::MAX_ITEM_KEY;
use crate::db::Database;
use crate::error::{GenerationError, JobError};
use crate::events::{EventSink, Severity};
use crate::external::{ArtifactStore, GenerationApi, RemoteJobClient};
use crate::fanout::{
    BatchReport, FanOutExecutor, ItemOutcome, Keyed, NoopObserver, ResourceClass, StoreObserver,
};
use crate::jobs::{Job, JobKind, JobRunner, JobStatus, StageContext, StageError, StageOutput};
use crate::project::ItemStage;
use crate::scheduler::{reconcile_parent, ExternalJobPoller, PollerHandle};
use crate::stores::Stores;
use crate::usage::Usage;

/// External systems the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn RemoteJobClient>,
    pub generation: Arc<dyn GenerationApi>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub events: Arc<dyn EventSink>,
    pub cache: Arc<dyn StatusCache>,
}

/// One item of an asynchronous batch: its key and the opaque payload
/// handed to the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub item_key: i64,
    pub payload: Value,
}

impl Keyed for RemoteItem {
    fn item_key(&self) -> i64 {
        self.item_key
    }
}

/// Rejects batches containing a key that cannot address an artifact slot.
fn check_item_keys<I: Keyed>(items: &[I]) -> Result<(), JobError> {
    match items
        .iter()
        .map(Keyed::item_key)
        .find(|key| !(1..=MAX_ITEM_KEY).contains(key))
    {
        Some(key) => Err(JobError::InvalidItemKey {
            key,
            max: MAX_ITEM_KEY,
        }),
        None => Ok(()),
    }
}

/// Outcome of submitting a set of remote items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    /// Sub-job ids of accepted submissions, in input order.
    pub accepted: Vec<String>,
    /// Item keys the remote side refused.
    pub rejected: Vec<i64>,
}

#[derive(Clone)]
pub struct Orchestrator {
    stores: Stores,
    runner: JobRunner,
    client: Arc<dyn RemoteJobClient>,
    generation: Arc<dyn GenerationApi>,
    artifacts: Arc<dyn ArtifactStore>,
    concurrency: ConcurrencyConfig,
    scheduler: SchedulerConfig,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        db: Database,
        collaborators: Collaborators,
        runtime: Handle,
    ) -> Result<Self, JobError> {
        for class in [ResourceClass::Prompt, ResourceClass::Image, ResourceClass::Video] {
            FanOutExecutor::new(config.concurrency.limit(class))?;
        }

        let stores = Stores::new(
            db,
            collaborators.cache,
            JobUpdateBroadcaster::default(),
            collaborators.events,
        );
        let runner = JobRunner::new(stores.clone(), runtime);

        Ok(Self {
            stores,
            runner,
            client: collaborators.client,
            generation: collaborators.generation,
            artifacts: collaborators.artifacts,
            concurrency: config.concurrency.clone(),
            scheduler: config.scheduler.clone(),
        })
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn subscribe_jobs(&self) -> broadcast::Receiver<Job> {
        self.stores.jobs.updates().subscribe()
    }

    /// Runs `stage` as a background job and returns its id at once.
    pub fn submit_job<F>(&self, project_id: &str, kind: JobKind, stage: F) -> Result<String, JobError>
    where
        F: FnOnce(&StageContext) -> Result<StageOutput, StageError> + Send + 'static,
    {
        self.runner.submit(project_id, kind, stage)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job, JobError> {
        self.stores.jobs.get(job_id)
    }

    pub fn list_jobs(&self, project_id: &str) -> Result<Vec<Job>, JobError> {
        self.stores.jobs.list_by_project(project_id)
    }

    /// Fans `op` out over `items` under the limit of `class`.
    ///
    /// Item statuses, artifacts, events and (when `job_id` is given) job
    /// progress are written as items finish. Item failures stay in the
    /// report; only an out-of-range item key or an unusable worker limit
    /// fails the call, before any item runs.
    pub fn run_item_batch<I, F>(
        &self,
        project_id: &str,
        job_id: Option<&str>,
        stage: ItemStage,
        class: ResourceClass,
        items: &[I],
        op: F,
    ) -> Result<BatchReport, JobError>
    where
        I: Keyed + Sync,
        F: Fn(&I) -> ItemOutcome + Sync,
    {
        check_item_keys(items)?;
        let executor = FanOutExecutor::new(self.concurrency.limit(class))?;
        let observer = StoreObserver::new(
            project_id,
            job_id,
            stage,
            items.len(),
            self.stores.items.clone(),
            self.stores.projects.clone(),
            self.stores.jobs.clone(),
            Arc::clone(&self.stores.events),
        );

        let report = executor.run(items, op, &observer);
        self.record_usage(project_id, report.usage);
        info!(
            project_id,
            stage = stage.as_str(),
            succeeded = report.succeeded(),
            failed = report.failed,
            "Item batch finished"
        );
        Ok(report)
    }

    /// Generates one artifact per item synchronously through the generation
    /// API, as a [`run_item_batch`](Self::run_item_batch).
    pub fn generate_items(
        &self,
        project_id: &str,
        job_id: Option<&str>,
        stage: ItemStage,
        class: ResourceClass,
        items: &[RemoteItem],
    ) -> Result<BatchReport, JobError> {
        let generation = Arc::clone(&self.generation);
        self.run_item_batch(project_id, job_id, stage, class, items, |item: &RemoteItem| {
            let (result, usage) = generation.generate(&item.payload);
            ItemOutcome {
                result: result.map(|artifact| vec![artifact]),
                usage,
            }
        })
    }

    /// Submits every item to the remote system and records one sub-job per
    /// item under `parent_job_id`.
    ///
    /// Submissions run under the video limit. Refused submissions become
    /// failed sub-jobs without a remote handle. The parent is not
    /// reconciled here.
    pub fn submit_remote_items(
        &self,
        project_id: &str,
        parent_job_id: Option<&str>,
        stage: ItemStage,
        items: &[RemoteItem],
    ) -> Result<SubmitSummary, JobError> {
        let span = info_span!("submit_remote", project_id, stage = stage.as_str(), items = items.len());
        let _enter = span.enter();

        check_item_keys(items)?;
        let executor = FanOutExecutor::new(self.concurrency.limit(ResourceClass::Video))?;
        let client = Arc::clone(&self.client);
        let report = executor.run(
            items,
            |item: &RemoteItem| match client.submit(&item.payload) {
                Ok(handle) => ItemOutcome::ok(vec![handle], Usage::call()),
                Err(e) => ItemOutcome::failed(GenerationError::from(e), Usage::call()),
            },
            &NoopObserver,
        );

        let mut summary = SubmitSummary::default();
        for item in &report.results {
            match &item.result {
                Ok(handles) => {
                    let Some(handle) = handles.first() else {
                        continue;
                    };
                    let sub = self.stores.sub_jobs.create(
                        project_id,
                        parent_job_id,
                        stage,
                        item.item_key,
                        handle,
                    )?;
                    if let Err(e) = self.stores.items.mark_processing(project_id, stage, item.item_key) {
                        warn!(item_key = item.item_key, "Failed to mark item processing: {}", e);
                    }
                    self.stores.events.log(
                        Some(project_id),
                        parent_job_id,
                        Severity::Info,
                        &format!("{} {} submitted", stage.as_str(), item.item_key),
                        Some(json!({ "sub_job_id": sub.id, "remote_handle": handle })),
                    );
                    summary.accepted.push(sub.id);
                }
                Err(error) => {
                    self.stores.sub_jobs.create_rejected(
                        project_id,
                        parent_job_id,
                        stage,
                        item.item_key,
                        &error.message,
                    )?;
                    if let Err(e) = self.stores.items.mark_failed(
                        project_id,
                        stage,
                        item.item_key,
                        &error.message,
                        error.request_id.as_deref(),
                    ) {
                        warn!(item_key = item.item_key, "Failed to mark item failed: {}", e);
                    }
                    self.stores.events.log(
                        Some(project_id),
                        parent_job_id,
                        Severity::Error,
                        &format!(
                            "{} {} submission failed: {}",
                            stage.as_str(),
                            item.item_key,
                            error.message
                        ),
                        None,
                    );
                    summary.rejected.push(item.item_key);
                }
            }
        }

        self.record_usage(project_id, report.usage);
        Ok(summary)
    }

    /// Starts an asynchronous multi-item stage and returns the parent job id
    /// without waiting for the remote submissions.
    ///
    /// Submission runs as a background stage. The parent is reconciled once
    /// every item has been submitted, so a batch whose every submission was
    /// refused fails there. Everything else is left to the poller.
    pub fn submit_remote_batch(
        &self,
        project_id: &str,
        kind: JobKind,
        stage: ItemStage,
        items: &[RemoteItem],
    ) -> Result<String, JobError> {
        self.spawn_remote_batch(project_id, kind, stage, items)
            .map(|(job, _)| job.id)
    }

    /// Like [`submit_remote_batch`](Self::submit_remote_batch) but also
    /// returns the handle of the submission task.
    pub fn spawn_remote_batch(
        &self,
        project_id: &str,
        kind: JobKind,
        stage: ItemStage,
        items: &[RemoteItem],
    ) -> Result<(Job, JoinHandle<()>), JobError> {
        check_item_keys(items)?;
        let this = self.clone();
        let items = items.to_vec();
        self.runner.spawn(project_id, kind, move |ctx| {
            this.submit_batch_stage(ctx, stage, &items)
        })
    }

    fn submit_batch_stage(
        &self,
        ctx: &StageContext,
        stage: ItemStage,
        items: &[RemoteItem],
    ) -> Result<StageOutput, StageError> {
        if items.is_empty() {
            return Ok(StageOutput::done(json!({ "completed": 0, "failed": 0 })));
        }

        ctx.step(format!("Submitting {} {} tasks", items.len(), stage.as_str()));
        let summary = self.submit_remote_items(ctx.project_id(), Some(ctx.job_id()), stage, items)?;
        ctx.step(format!("Waiting for {} remote tasks", summary.accepted.len()));

        info!(
            job_id = ctx.job_id(),
            accepted = summary.accepted.len(),
            rejected = summary.rejected.len(),
            "Remote batch submitted"
        );
        match reconcile_parent(&self.stores.jobs, ctx.job_id())? {
            Some(parent) if parent.status == JobStatus::Failed => Err(StageError::new(
                parent.error.unwrap_or_else(|| "All submissions were rejected".to_string()),
            )),
            _ => Ok(StageOutput::Deferred {
                usage: Usage::default(),
            }),
        }
    }

    /// A poller over this orchestrator's stores and collaborators.
    pub fn poller(&self) -> ExternalJobPoller {
        ExternalJobPoller::new(
            self.stores.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.artifacts),
            self.scheduler.clone(),
        )
    }

    /// Starts the process-wide poll loop.
    pub fn start_poller(&self) -> PollerHandle {
        Arc::new(self.poller()).start()
    }

    fn record_usage(&self, project_id: &str, usage: Usage) {
        if usage.is_empty() {
            return;
        }
        if let Err(e) = self.stores.projects.add_usage(project_id, usage) {
            warn!(project_id, "Failed to record usage: {}", e);
        }
    }
}
