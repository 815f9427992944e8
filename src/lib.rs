//! waypoint — resumable checkpointing and resilient stage orchestration
//! for multi-stage automated workflows.
//!
//! ## Architecture
//!
//! - **Checkpoint store** (`checkpoint::store`): durable one-record-per-run
//!   persistence with atomic writes.
//! - **Checkpoint manager** (`checkpoint::manager`): the only component
//!   that mutates checkpoint records; decides resumability and caches
//!   expensive external side artifacts across resumes.
//! - **Stage executor** (`executor`): drives stages strictly in order,
//!   skipping stages already completed in an earlier session and
//!   persisting progress after every attempt.
//! - **Supervisor** (`supervisor`): on stage failure, consults an
//!   advisory reasoning service and then walks a layered recovery chain
//!   (retry, defaulting, skipping) before escalating to an operator.
//! - **Runner** (`run`): the control surface — start, resume, status,
//!   abandon.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod executor;
pub mod run;
pub mod stage;
pub mod supervisor;

pub use checkpoint::{
    CheckpointManager, CheckpointStore, FailureDetail, FailureKind, FileStore, MemoryStore,
    RunCheckpoint, RunStatus, StageCheckpoint, StageStatus, fingerprint,
};
pub use config::WaypointConfig;
pub use errors::{CheckpointError, RunError};
pub use executor::{ExecutorOutcome, StageExecutor};
pub use run::{RunOutcome, RunSummary, Runner, StageSummary};
pub use stage::{RunContext, Stage, StageFailure, StageOutcome};
pub use supervisor::{
    Advisor, AdvisorDirective, AdvisorRequest, DefaultingStrategy, HttpAdvisor, NullAdvisor,
    RecoveryAction, RecoveryOutcome, RecoveryReport, RecoveryState, RecoveryStrategy,
    RetryStrategy, SkippingStrategy, StrategyDecision, Supervisor,
};
