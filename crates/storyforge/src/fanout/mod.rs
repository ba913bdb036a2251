//! Bounded-concurrency fan-out of independent per-item operations.

pub mod executor;
pub mod observer;
pub mod references;

pub use executor::{BatchReport, FanOutExecutor, ItemOutcome, ItemReport, Keyed};
pub use observer::{FanOutObserver, NoopObserver, StoreObserver};
pub use references::{resolve_references, CharacterRef, SceneRef, ShotText};

use serde::{Deserialize, Serialize};

/// External resource an item operation consumes; each has its own
/// worker limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Prompt,
    Image,
    Video,
}
