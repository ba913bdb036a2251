//! Test harness: an orchestrator with scripted collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use storyforge::db::format_timestamp;
use storyforge::{
    Collaborators, Config, Database, DbEventLog, ItemStage, Job, JobKind, LogBroadcaster,
    Orchestrator, RemoteItem, TtlStatusCache,
};

use super::fakes::{CountingArtifactStore, ScriptedClient};

pub struct TestHarness {
    pub db: Database,
    pub client: Arc<ScriptedClient>,
    pub artifacts: Arc<CountingArtifactStore>,
    pub orchestrator: Orchestrator,
    runtime: Runtime,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        let db = Database::open_in_memory().expect("Failed to open database");
        let client = Arc::new(ScriptedClient::new());
        let artifacts = Arc::new(CountingArtifactStore::new());

        let collaborators = Collaborators {
            client: client.clone(),
            generation: client.clone(),
            artifacts: artifacts.clone(),
            events: Arc::new(DbEventLog::new(db.clone(), LogBroadcaster::default())),
            cache: Arc::new(TtlStatusCache::new(Duration::from_secs(3600), 1000)),
        };
        let orchestrator =
            Orchestrator::new(&config, db.clone(), collaborators, runtime.handle().clone())
                .expect("Failed to build orchestrator");

        Self {
            db,
            client,
            artifacts,
            orchestrator,
            runtime,
        }
    }

    /// Polls `get_job` until the job leaves `running` or the timeout hits.
    pub fn wait_for_terminal(&self, job_id: &str) -> Job {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.orchestrator.get_job(job_id).expect("job exists");
            if job.status.is_terminal() || Instant::now() > deadline {
                return job;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits for a background task started by the orchestrator.
    pub fn join(&self, handle: JoinHandle<()>) {
        self.runtime.block_on(handle).expect("background task");
    }

    /// Submits a remote batch and waits until every submission is recorded.
    pub fn submit_remote_batch(
        &self,
        project_id: &str,
        kind: JobKind,
        stage: ItemStage,
        items: &[RemoteItem],
    ) -> String {
        let (job, handle) = self
            .orchestrator
            .spawn_remote_batch(project_id, kind, stage, items)
            .expect("batch accepted");
        self.join(handle);
        job.id
    }

    /// Pretends a sub-job was submitted `age` ago.
    pub fn backdate_sub_job(&self, sub_job_id: &str, age: Duration) {
        let created = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let created = format_timestamp(created);
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE sub_jobs SET created_at = ?1 WHERE id = ?2",
                    [created.as_str(), sub_job_id],
                )?;
                Ok(())
            })
            .unwrap();
    }
}
