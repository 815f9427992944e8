//! Checkpointing: the data model, the durable store, and the manager
//! facade that owns all checkpoint mutation.

pub mod manager;
pub mod model;
pub mod store;

pub use manager::{CheckpointManager, fingerprint};
pub use model::{
    FailureDetail, FailureKind, RunCheckpoint, RunStatus, StageCheckpoint, StageStatus,
};
pub use store::{CheckpointStore, FileStore, MemoryStore};
