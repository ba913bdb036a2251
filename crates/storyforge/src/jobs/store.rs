//! Job record store: SQLite is authoritative, the status cache is a
//! write-through mirror, and every write is rebroadcast.
//!
//! Cache writes and broadcasts happen while the database unit of work that
//! produced them is still held, so they are observed in write order.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::broadcast::JobUpdateBroadcaster;
use crate::cache::StatusCache;
use crate::db::job_repo::{self, JobRow};
use crate::db::{format_timestamp, now_timestamp, project_repo, Database, DatabaseError};
use crate::error::JobError;
use crate::jobs::model::{Job, JobKind, JobStatus, JobUpdate, Terminal};

fn status_of(row: &JobRow) -> JobStatus {
    JobStatus::parse(&row.status).unwrap_or(JobStatus::Failed)
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
    cache: Arc<dyn StatusCache>,
    updates: JobUpdateBroadcaster,
}

impl JobStore {
    pub fn new(db: Database, cache: Arc<dyn StatusCache>, updates: JobUpdateBroadcaster) -> Self {
        Self { db, cache, updates }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn updates(&self) -> &JobUpdateBroadcaster {
        &self.updates
    }

    /// Creates a pending job, creating a placeholder project if the owner
    /// is not known yet.
    pub fn create(&self, project_id: &str, kind: JobKind) -> Result<Job, JobError> {
        let now = Utc::now();
        if project_repo::ensure_exists(&self.db, project_id, &format_timestamp(now))? {
            log::info!("Created placeholder project {}", project_id);
        }

        let job = Job {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        job_repo::insert(&self.db, &job.to_row())?;
        log::debug!("Created job {} ({}) for project {}", job.id, job.kind, project_id);

        self.publish(&job);
        Ok(job)
    }

    /// Applies a partial update. Status changes must move forward and
    /// terminal jobs reject all further updates.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let mut rejected = None;
        let (job, _) = self.write_locked(job_id, |_, row| {
            let current = status_of(row);
            let next = update.status.unwrap_or(current);
            if !current.can_transition_to(next) {
                rejected = Some((current, next));
                return Ok(false);
            }
            update.apply_to(row);
            row.updated_at = now_timestamp();
            Ok(true)
        })?;

        if let Some((from, to)) = rejected {
            return Err(JobError::InvalidTransition {
                id: job_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(job)
    }

    /// Moves a job to its terminal state exactly once.
    ///
    /// Returns the job and whether this call performed the transition. A
    /// job that is already terminal is returned unchanged.
    pub fn finish(&self, job_id: &str, outcome: Terminal) -> Result<(Job, bool), JobError> {
        let (job, applied) = self.write_locked(job_id, |_, row| {
            if status_of(row).is_terminal() {
                return Ok(false);
            }
            match &outcome {
                Terminal::Completed { result } => {
                    row.status = JobStatus::Completed.as_str().to_string();
                    row.progress = 100;
                    row.result = Some(result.to_string());
                }
                Terminal::Failed { error } => {
                    row.status = JobStatus::Failed.as_str().to_string();
                    row.error = Some(error.clone());
                }
            }
            row.updated_at = now_timestamp();
            Ok(true)
        })?;

        if !applied {
            log::debug!("Job {} already {}, ignoring terminal write", job_id, job.status);
        }
        Ok((job, applied))
    }

    /// Writes an aggregate computed from a job's children.
    ///
    /// Unlike [`update`](Self::update) this may move a terminal parent back
    /// to running when a re-submitted child is still outstanding. Rows are
    /// only written when something actually changed.
    pub fn reconcile(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError> {
        self.reconcile_with(job_id, |_| Ok(Some(update)))?
            .ok_or_else(|| JobError::job_not_found(job_id))
    }

    /// Like [`reconcile`](Self::reconcile), but the update is computed by
    /// `compute` inside the same unit of work as the write. `None` from
    /// `compute` leaves the job untouched and is returned as `None`.
    pub fn reconcile_with<F>(&self, job_id: &str, compute: F) -> Result<Option<Job>, JobError>
    where
        F: FnOnce(&Connection) -> Result<Option<JobUpdate>, DatabaseError>,
    {
        let mut computed = false;
        let (job, _) = self.write_locked(job_id, |conn, row| {
            let Some(update) = compute(conn)? else {
                return Ok(false);
            };
            computed = true;
            let before = row.clone();
            update.apply_to(row);
            if *row == before {
                return Ok(false);
            }
            row.updated_at = now_timestamp();
            Ok(true)
        })?;
        Ok(computed.then_some(job))
    }

    /// Cache-aside read. Cache misses and cache errors fall through to the
    /// database and repopulate the cache.
    pub fn get(&self, job_id: &str) -> Result<Job, JobError> {
        match self.cache.read(job_id) {
            Ok(Some(job)) => return Ok(job),
            Ok(None) => {}
            Err(e) => log::warn!("Status cache read failed for job {}: {}", job_id, e),
        }

        let job = self.db.with_conn(|conn| {
            Ok(job_repo::select_by_id(conn, job_id)?.map(|row| {
                let job = Job::from_row(&row);
                self.write_cache(&job);
                job
            }))
        })?;
        job.ok_or_else(|| JobError::job_not_found(job_id))
    }

    /// Jobs of a project, newest first.
    pub fn list_by_project(&self, project_id: &str) -> Result<Vec<Job>, JobError> {
        Ok(job_repo::list_by_project(&self.db, project_id)?
            .iter()
            .map(Job::from_row)
            .collect())
    }

    /// Reads the row, lets `f` mutate it and, when `f` asks for it, writes
    /// and publishes the result before the connection is released.
    fn write_locked<F>(&self, job_id: &str, f: F) -> Result<(Job, bool), JobError>
    where
        F: FnOnce(&Connection, &mut JobRow) -> Result<bool, DatabaseError>,
    {
        let written = self.db.with_conn(|conn| {
            let Some(mut row) = job_repo::select_by_id(conn, job_id)? else {
                return Ok(None);
            };
            let write = f(conn, &mut row)?;
            if write {
                job_repo::update_row(conn, &row)?;
            }
            let job = Job::from_row(&row);
            if write {
                self.publish(&job);
            }
            Ok(Some((job, write)))
        })?;
        written.ok_or_else(|| JobError::job_not_found(job_id))
    }

    fn publish(&self, job: &Job) {
        self.write_cache(job);
        self.updates.send(job.clone());
    }

    fn write_cache(&self, job: &Job) {
        if let Err(e) = self.cache.write(job) {
            log::warn!("Status cache write failed for job {}: {}", job.id, e);
        }
    }
}
