//! Job update broadcaster.

use tokio::sync::broadcast;

use crate::jobs::Job;

/// Publishes every durable job write to live subscribers.
#[derive(Clone)]
pub struct JobUpdateBroadcaster {
    sender: broadcast::Sender<Job>,
}

impl JobUpdateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, job: Job) {
        // No receivers is fine
        let _ = self.sender.send(job);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.sender.subscribe()
    }
}

impl Default for JobUpdateBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, JobStatus};
    use chrono::Utc;

    fn job(progress: u8) -> Job {
        Job {
            id: "j".to_string(),
            project_id: "p".to_string(),
            kind: JobKind::VideoGeneration,
            status: JobStatus::Running,
            progress,
            current_step: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobUpdateBroadcaster::new(4);
        broadcaster.send(job(1));
    }

    #[test]
    fn test_lagging_subscriber_does_not_block() {
        let broadcaster = JobUpdateBroadcaster::new(2);
        let mut rx = broadcaster.subscribe();
        for p in 0..5 {
            broadcaster.send(job(p));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        assert_eq!(rx.try_recv().unwrap().progress, 3);
    }
}
