//! Typed error hierarchy for the waypoint core.
//!
//! Two top-level enums cover the two failure surfaces that escape this
//! crate:
//! - `CheckpointError` — persistence and lifecycle-contract failures
//! - `RunError` — terminal run outcomes surfaced to the operator
//!
//! Stage failures themselves are not errors at this level; they are routed
//! through the supervisor and either resolve, become skips, or end up as
//! `RunError::ManualInterventionRequired`.

use thiserror::Error;

/// Errors from the checkpoint store and manager.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The persistence medium cannot be reached. Fatal to the run: a
    /// checkpoint that cannot be durably recorded must not be treated as
    /// recorded.
    #[error("Checkpoint storage unavailable: {source}")]
    StorageUnavailable {
        #[source]
        source: std::io::Error,
    },

    #[error("A checkpoint for run {run_id} already exists")]
    AlreadyExists { run_id: String },

    #[error("Run {run_id} is not resumable")]
    NotResumable { run_id: String },

    #[error("No checkpoint found for run {run_id}")]
    RunNotFound { run_id: String },

    /// A completed stage is immutable; redoing it requires deleting the
    /// run checkpoint and starting a new run.
    #[error("Stage {stage} of run {run_id} is already completed and cannot be overwritten")]
    StageImmutable { run_id: String, stage: String },

    #[error("Checkpoint record for run {run_id} is corrupt: {source}")]
    Corrupt {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Terminal run failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum RunError {
    /// Every automated recovery avenue was exhausted. The summary names
    /// the original failure and each strategy that was attempted.
    #[error("Manual intervention required at stage {stage}: {summary}")]
    ManualInterventionRequired { stage: String, summary: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
