//! Scripted collaborators with call counters.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use storyforge::external::{ArtifactStore, GenerationApi, RemoteJobClient, RemoteStatus};
use storyforge::{GenerationError, MaterializationError, PollError, SubmissionError, Usage};

/// Remote client whose poll answers are queued per handle.
///
/// `submit` hands out `task-1`, `task-2`, ... and refuses payloads carrying
/// `"reject": true`. A handle with an empty queue reports `Running`.
#[derive(Default)]
pub struct ScriptedClient {
    next_id: AtomicUsize,
    submit_delay_ms: AtomicU64,
    scripts: Mutex<HashMap<String, VecDeque<Result<RemoteStatus, PollError>>>>,
    polls: Mutex<HashMap<String, usize>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues answers for `handle`, returned in order.
    pub fn script(&self, handle: &str, answers: Vec<Result<RemoteStatus, PollError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(handle.to_string())
            .or_default()
            .extend(answers);
    }

    /// Makes every later `submit` take at least `delay`.
    pub fn set_submit_delay(&self, delay: Duration) {
        self.submit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn polls(&self, handle: &str) -> usize {
        self.polls.lock().unwrap().get(handle).copied().unwrap_or(0)
    }

    pub fn submitted(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }
}

impl RemoteJobClient for ScriptedClient {
    fn submit(&self, payload: &Value) -> Result<String, SubmissionError> {
        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if payload.get("reject").and_then(Value::as_bool).unwrap_or(false) {
            return Err(SubmissionError::new("quota exceeded"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("task-{n}"))
    }

    fn poll_status(&self, remote_handle: &str) -> Result<RemoteStatus, PollError> {
        *self
            .polls
            .lock()
            .unwrap()
            .entry(remote_handle.to_string())
            .or_default() += 1;
        self.scripts
            .lock()
            .unwrap()
            .get_mut(remote_handle)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(RemoteStatus::Running))
    }
}

impl GenerationApi for ScriptedClient {
    /// Answers at once with `gen/<shot>.png`, or fails like `submit` does.
    fn generate(&self, payload: &Value) -> (Result<String, GenerationError>, Usage) {
        let usage = Usage {
            images: 1,
            ..Usage::call()
        };
        if payload.get("reject").and_then(Value::as_bool).unwrap_or(false) {
            let error = GenerationError::new("content policy").with_request_id("req-rejected");
            return (Err(error), usage);
        }
        let shot = payload.get("shot").and_then(Value::as_i64).unwrap_or(0);
        (Ok(format!("gen/{shot}.png")), usage)
    }
}

/// Records every materialization. References starting with `broken`
/// fail to download.
#[derive(Default)]
pub struct CountingArtifactStore {
    calls: Mutex<Vec<(String, String)>>,
}

impl CountingArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArtifactStore for CountingArtifactStore {
    fn materialize(
        &self,
        remote_ref: &str,
        destination_key: &str,
    ) -> Result<String, MaterializationError> {
        self.calls
            .lock()
            .unwrap()
            .push((remote_ref.to_string(), destination_key.to_string()));
        if remote_ref.starts_with("broken") {
            return Err(MaterializationError::Fetch {
                url: remote_ref.to_string(),
                reason: "HTTP 404".to_string(),
            });
        }
        Ok(format!("stored/{destination_key}"))
    }
}
