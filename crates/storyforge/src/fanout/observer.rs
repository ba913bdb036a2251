use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::events::{EventSink, Severity};
use crate::fanout::executor::ItemReport;
use crate::jobs::{JobStore, JobUpdate};
use crate::project::{ItemStage, ItemStatusStore, ProjectStore};

/// Receives per-item lifecycle notifications from the fan-out executor.
///
/// `on_started` is called for every item before any work is dispatched,
/// `on_finished` exactly once per item. Both run on the calling thread.
pub trait FanOutObserver {
    fn on_started(&self, item_key: i64);
    fn on_finished(&self, report: &ItemReport);
}

/// No-op observer for unit tests and fire-and-forget batches.
pub struct NoopObserver;

impl FanOutObserver for NoopObserver {
    fn on_started(&self, _item_key: i64) {}
    fn on_finished(&self, _report: &ItemReport) {}
}

/// Writes item statuses, places artifacts and advances job progress.
pub struct StoreObserver {
    project_id: String,
    job_id: Option<String>,
    stage: ItemStage,
    total: usize,
    finished: AtomicUsize,
    items: ItemStatusStore,
    projects: ProjectStore,
    jobs: JobStore,
    events: Arc<dyn EventSink>,
}

impl StoreObserver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: &str,
        job_id: Option<&str>,
        stage: ItemStage,
        total: usize,
        items: ItemStatusStore,
        projects: ProjectStore,
        jobs: JobStore,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            job_id: job_id.map(str::to_string),
            stage,
            total,
            finished: AtomicUsize::new(0),
            items,
            projects,
            jobs,
            events,
        }
    }

    fn advance_progress(&self, item_key: i64) {
        let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(job_id) = &self.job_id else {
            return;
        };
        let progress = (done * 100 / self.total.max(1)).min(100) as u8;
        let update = JobUpdate::default().progress(progress).step(format!(
            "{} {}/{} done (last: item {})",
            self.stage.as_str(),
            done,
            self.total,
            item_key
        ));
        if let Err(e) = self.jobs.update(job_id, update) {
            log::debug!("Progress update skipped for job {}: {}", job_id, e);
        }
    }
}

impl FanOutObserver for StoreObserver {
    fn on_started(&self, item_key: i64) {
        if let Err(e) = self
            .items
            .mark_processing(&self.project_id, self.stage, item_key)
        {
            log::warn!(
                "Failed to mark {} item {} processing: {}",
                self.stage.as_str(),
                item_key,
                e
            );
        }
    }

    fn on_finished(&self, report: &ItemReport) {
        let stage = self.stage.as_str();
        match &report.result {
            Ok(artifacts) => {
                let first = artifacts.first().map(String::as_str);
                if let Err(e) =
                    self.items
                        .mark_completed(&self.project_id, self.stage, report.item_key, first)
                {
                    log::warn!("Failed to mark {} item {} completed: {}", stage, report.item_key, e);
                }
                if let (Some(list), Some(url)) = (self.stage.artifact_list(), first) {
                    if let Err(e) =
                        self.projects
                            .place_artifact(&self.project_id, list, report.item_key, url)
                    {
                        log::warn!("Failed to place {} artifact {}: {}", stage, report.item_key, e);
                    }
                }
                self.events.log(
                    Some(&self.project_id),
                    self.job_id.as_deref(),
                    Severity::Info,
                    &format!("{} item {} completed", stage, report.item_key),
                    Some(json!({ "artifacts": artifacts })),
                );
            }
            Err(error) => {
                if let Err(e) = self.items.mark_failed(
                    &self.project_id,
                    self.stage,
                    report.item_key,
                    &error.message,
                    error.request_id.as_deref(),
                ) {
                    log::warn!("Failed to mark {} item {} failed: {}", stage, report.item_key, e);
                }
                self.events.log(
                    Some(&self.project_id),
                    self.job_id.as_deref(),
                    Severity::Error,
                    &format!("{} item {} failed: {}", stage, report.item_key, error.message),
                    error
                        .request_id
                        .as_ref()
                        .map(|id| json!({ "request_id": id })),
                );
            }
        }
        self.advance_progress(report.item_key);
    }
}
