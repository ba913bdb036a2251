//! The set of stores shared by the runner, fan-out observers and poller.

use std::sync::Arc;

use crate::broadcast::JobUpdateBroadcaster;
use crate::cache::StatusCache;
use crate::db::Database;
use crate::events::EventSink;
use crate::jobs::JobStore;
use crate::project::{ItemStatusStore, ProjectStore};
use crate::scheduler::SubJobStore;

/// Cheap-to-clone handles over one database.
#[derive(Clone)]
pub struct Stores {
    pub jobs: JobStore,
    pub sub_jobs: SubJobStore,
    pub projects: ProjectStore,
    pub items: ItemStatusStore,
    pub events: Arc<dyn EventSink>,
}

impl Stores {
    pub fn new(
        db: Database,
        cache: Arc<dyn StatusCache>,
        updates: JobUpdateBroadcaster,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            jobs: JobStore::new(db.clone(), cache, updates),
            sub_jobs: SubJobStore::new(db.clone()),
            projects: ProjectStore::new(db.clone()),
            items: ItemStatusStore::new(db),
            events,
        }
    }
}
