//! Parent job aggregation over sub-job outcomes.

use serde_json::json;

use crate::db::sub_job_repo::{self, ChildCounts};
use crate::error::JobError;
use crate::jobs::{Job, JobStatus, JobStore, JobUpdate};

/// Computes the parent update for the given child counts.
///
/// Once every child is terminal the parent is completed, with the counts as
/// its result, unless every child failed. Until then it stays running with
/// progress `(completed + failed) * 100 / total`. Each branch clears
/// whichever outcome field belongs to a different branch.
pub fn aggregate(counts: ChildCounts) -> Option<JobUpdate> {
    if counts.total == 0 {
        return None;
    }
    let done = counts.completed + counts.failed;
    let progress = (done * 100 / counts.total).min(100) as u8;

    let update = if done < counts.total {
        JobUpdate::default()
            .status(JobStatus::Running)
            .progress(progress)
            .clear_result()
            .clear_error()
    } else if counts.failed == counts.total {
        JobUpdate::default()
            .status(JobStatus::Failed)
            .progress(100)
            .clear_result()
            .error(format!("All {} sub-jobs failed", counts.total))
    } else {
        JobUpdate::default()
            .status(JobStatus::Completed)
            .progress(100)
            .clear_error()
            .result(json!({
                "completed": counts.completed,
                "failed": counts.failed,
            }))
    };
    Some(update)
}

/// Re-counts the children of `parent_job_id` and writes the aggregate.
///
/// The count and the write share one unit of work, so the last reconcile to
/// run always reflects every child inserted before it.
pub fn reconcile_parent(jobs: &JobStore, parent_job_id: &str) -> Result<Option<Job>, JobError> {
    let mut counts = ChildCounts::default();
    let job = jobs.reconcile_with(parent_job_id, |conn| {
        counts = sub_job_repo::count_children(conn, parent_job_id)?;
        Ok(aggregate(counts))
    })?;
    if let Some(job) = &job {
        tracing::debug!(
            job_id = parent_job_id,
            completed = counts.completed,
            failed = counts.failed,
            total = counts.total,
            status = %job.status,
            "Reconciled parent job"
        );
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobUpdateBroadcaster;
    use crate::cache::TtlStatusCache;
    use crate::db::Database;
    use crate::jobs::JobKind;
    use crate::project::ItemStage;
    use crate::scheduler::sub_job::SubJobStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn stores() -> (JobStore, SubJobStore) {
        let db = Database::open_in_memory().unwrap();
        let jobs = JobStore::new(
            db.clone(),
            Arc::new(TtlStatusCache::new(Duration::from_secs(3600), 100)),
            JobUpdateBroadcaster::default(),
        );
        (jobs, SubJobStore::new(db))
    }

    fn counts(total: u64, completed: u64, failed: u64) -> ChildCounts {
        ChildCounts {
            total,
            completed,
            failed,
        }
    }

    #[test]
    fn test_partial_progress_stays_running() {
        let update = aggregate(counts(4, 2, 1)).unwrap();
        assert_eq!(update.status, Some(JobStatus::Running));
        assert_eq!(update.progress, Some(75));
        assert!(update.result.is_none());
    }

    #[test]
    fn test_mixed_outcome_completes() {
        let update = aggregate(counts(4, 2, 2)).unwrap();
        assert_eq!(update.status, Some(JobStatus::Completed));
        assert_eq!(update.progress, Some(100));
        assert_eq!(update.result, Some(json!({"completed": 2, "failed": 2})));
    }

    #[test]
    fn test_all_failed_fails_parent() {
        let update = aggregate(counts(3, 0, 3)).unwrap();
        assert_eq!(update.status, Some(JobStatus::Failed));
        assert_eq!(update.error.as_deref(), Some("All 3 sub-jobs failed"));
    }

    #[test]
    fn test_single_success_is_success() {
        let update = aggregate(counts(10, 1, 9)).unwrap();
        assert_eq!(update.status, Some(JobStatus::Completed));
    }

    #[test]
    fn test_no_children() {
        assert!(aggregate(ChildCounts::default()).is_none());
    }

    #[test]
    fn test_redriven_failed_parent_drops_stale_error() {
        let (jobs, subs) = stores();
        let parent = jobs.create("p", JobKind::VideoGeneration).unwrap();
        subs.create_rejected("p", Some(&parent.id), ItemStage::Video, 1, "quota")
            .unwrap();

        let failed = reconcile_parent(&jobs, &parent.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("All 1 sub-jobs failed"));

        let retry = subs
            .create("p", Some(&parent.id), ItemStage::Video, 1, "task-retry")
            .unwrap();
        let running = reconcile_parent(&jobs, &parent.id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.progress, 50);
        assert!(running.error.is_none());

        subs.complete(&retry.id, "stored/v1.mp4").unwrap();
        let done = reconcile_parent(&jobs, &parent.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(json!({"completed": 1, "failed": 1})));
        assert!(done.error.is_none());
        assert_eq!(jobs.get(&parent.id).unwrap(), done);
    }

    #[test]
    fn test_redriven_completed_parent_drops_stale_result() {
        let (jobs, subs) = stores();
        let parent = jobs.create("p", JobKind::VideoGeneration).unwrap();
        let first = subs
            .create("p", Some(&parent.id), ItemStage::Video, 1, "task-1")
            .unwrap();
        subs.complete(&first.id, "stored/v1.mp4").unwrap();
        let done = reconcile_parent(&jobs, &parent.id).unwrap().unwrap();
        assert_eq!(done.result, Some(json!({"completed": 1, "failed": 0})));

        subs.create("p", Some(&parent.id), ItemStage::Video, 2, "task-2")
            .unwrap();
        let running = reconcile_parent(&jobs, &parent.id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.result.is_none());
    }

    #[test]
    fn test_reconcile_without_children_leaves_parent_alone() {
        let (jobs, _) = stores();
        let parent = jobs.create("p", JobKind::VideoGeneration).unwrap();
        assert!(reconcile_parent(&jobs, &parent.id).unwrap().is_none());
        assert_eq!(jobs.get(&parent.id).unwrap().status, JobStatus::Pending);
        assert!(reconcile_parent(&jobs, "missing").is_err());
    }

    #[test]
    fn test_children_inserted_during_reconcile_wait_for_it() {
        let (jobs, subs) = stores();
        let parent = jobs.create("p", JobKind::VideoGeneration).unwrap();
        let first = subs
            .create("p", Some(&parent.id), ItemStage::Video, 1, "task-1")
            .unwrap();
        subs.complete(&first.id, "stored/v1.mp4").unwrap();

        let (counted_tx, counted_rx) = crossbeam_channel::bounded(1);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                jobs.reconcile_with(&parent.id, |conn| {
                    let counts = sub_job_repo::count_children(conn, &parent.id)?;
                    counted_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(aggregate(counts))
                })
                .unwrap();
            });
            scope.spawn(|| {
                counted_rx.recv().unwrap();
                subs.create_rejected("p", Some(&parent.id), ItemStage::Video, 2, "quota")
                    .unwrap();
                reconcile_parent(&jobs, &parent.id).unwrap();
            });
        });

        let job = jobs.get(&parent.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"completed": 1, "failed": 1})));
    }
}
