//! Project aggregate and per-item status.

pub mod model;
pub mod store;

pub use model::{ArtifactList, ItemStage, ItemState, ItemStatus, Project};
pub use store::{ItemStatusStore, ProjectStore};
