//! Shared utilities for storyforge integration tests.
//!
//! - `TestHarness` wires an orchestrator over an in-memory database
//! - scripted fakes stand in for the remote task API and artifact storage

pub mod fakes;
pub mod harness;

pub use fakes::{CountingArtifactStore, ScriptedClient};
pub use harness::TestHarness;
