//! # Catalog Sync Pipeline
//!
//! Moves listings from a source marketplace into a destination PIM through a
//! fixed, resumable sequence of phases.
//!
//! ## Overview
//!
//! A run walks `Extract → Transform → Match → LoadPrimary → LoadMedia →
//! LoadHierarchy → LoadLinking`. Every phase boundary is checkpointed, and
//! the data a later phase needs is persisted as a run artifact, so a run
//! interrupted anywhere resumes at the phase it stopped in without calling
//! the source again.
//!
//! ## Components
//!
//! - **Phases** (`phase`): the state machine and its transition rules
//! - **Checkpoints** (`checkpoint`): atomic, backed-up run state
//! - **Artifacts** (`artifacts`): per-run intermediate data
//! - **Reports** (`report`): counters, phase outcomes and categorized failures
//! - **Orchestrator** (`orchestrator`): drives a run from request to report

pub mod artifacts;
pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod report;

mod context;
mod extract;
mod load;
mod matching;
mod transform;

pub use artifacts::{Artifact, ArtifactStore};
pub use checkpoint::{
    CheckpointManager, CheckpointPaths, CheckpointState, CheckpointStats, DeferredEntry,
    RetryQueue,
};
pub use error::{Result, SyncError};
pub use orchestrator::{RunRequest, SyncOrchestrator};
pub use phase::SyncPhase;
pub use report::{
    FailureCategory, FailureRecord, PhaseOutcome, PhaseStatus, RunCounters, SyncReport,
};
