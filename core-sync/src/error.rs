use bridge_traits::BridgeError;
use core_catalog::CatalogError;
use core_matching::MatchingError;
use core_throttle::ThrottleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{0}")]
    Throttle(#[from] ThrottleError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact '{artifact}' of run {run_id} is missing; {phase} cannot resume without it")]
    ArtifactMissing {
        run_id: String,
        artifact: String,
        phase: String,
    },

    #[error("Destination has no '{0}' relationship type")]
    MissingRelationship(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: String, message: String },

    #[error("Report {report_id} not finished after {waited_secs}s")]
    ReportTimeout { report_id: String, waited_secs: u64 },

    #[error("Report {report_id} ended without data: {reason}")]
    ReportFailed { report_id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
