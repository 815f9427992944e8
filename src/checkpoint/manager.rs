//! Facade over the checkpoint store and model.
//!
//! The manager exclusively owns mutation of checkpoint records: the stage
//! executor and the supervisor request changes through this interface and
//! never touch the store directly. Every mutating call persists
//! synchronously before returning, so callers may assume durability on
//! success.

use crate::checkpoint::model::{RunCheckpoint, RunStatus, StageCheckpoint, StageStatus};
use crate::checkpoint::store::CheckpointStore;
use crate::errors::CheckpointError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Create a fresh checkpoint for `run_id`.
    ///
    /// Fails with `AlreadyExists` if a non-abandoned checkpoint for the
    /// run already exists; an abandoned record is replaced.
    pub async fn create(
        &self,
        run_id: &str,
        stage_names: &[String],
    ) -> Result<RunCheckpoint, CheckpointError> {
        if let Some(existing) = self.store.get(run_id).await?
            && existing.status != RunStatus::Abandoned
        {
            return Err(CheckpointError::AlreadyExists {
                run_id: run_id.to_string(),
            });
        }

        let checkpoint = RunCheckpoint::new(run_id, stage_names.to_vec());
        self.store.put(&checkpoint).await?;
        info!(run_id, stages = stage_names.len(), "Created run checkpoint");
        Ok(checkpoint)
    }

    /// True iff an active checkpoint exists with at least one terminal
    /// stage.
    pub async fn can_resume(&self, run_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.store.get(run_id).await?.is_some_and(|cp| {
            cp.status == RunStatus::Active && cp.stages.iter().any(|s| s.is_terminal())
        }))
    }

    /// Load the checkpoint, increment and persist the resume counter, and
    /// return the refreshed record.
    pub async fn resume(&self, run_id: &str) -> Result<RunCheckpoint, CheckpointError> {
        if !self.can_resume(run_id).await? {
            return Err(CheckpointError::NotResumable {
                run_id: run_id.to_string(),
            });
        }

        let mut checkpoint = self.load(run_id).await?;
        checkpoint.resumes += 1;
        checkpoint.touch();
        self.store.put(&checkpoint).await?;
        info!(
            run_id,
            resumes = checkpoint.resumes,
            completed = checkpoint.completed_stage_names().len(),
            "Resuming run from checkpoint"
        );
        Ok(checkpoint)
    }

    /// Upsert one stage checkpoint and persist the run record.
    ///
    /// A stage already recorded as `Completed` is immutable; attempting to
    /// overwrite it is rejected. When every configured stage is terminal
    /// and none failed, the run transitions to `Completed`.
    pub async fn save_stage(
        &self,
        run_id: &str,
        stage: StageCheckpoint,
    ) -> Result<RunCheckpoint, CheckpointError> {
        let mut checkpoint = self.load(run_id).await?;

        if checkpoint
            .stage(&stage.name)
            .is_some_and(|existing| existing.status == StageStatus::Completed)
        {
            return Err(CheckpointError::StageImmutable {
                run_id: run_id.to_string(),
                stage: stage.name,
            });
        }

        debug!(run_id, stage = %stage.name, status = ?stage.status, "Saving stage checkpoint");
        checkpoint.upsert_stage(stage);
        checkpoint.touch();

        if checkpoint.all_stages_terminal() && !checkpoint.any_stage_failed() {
            checkpoint.status = RunStatus::Completed;
            info!(run_id, "All stages terminal; run completed");
        }

        self.store.put(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Stage names with status `Completed` or `Skipped`, used to compute
    /// the executor's skip set.
    pub async fn completed_stage_names(
        &self,
        run_id: &str,
    ) -> Result<HashSet<String>, CheckpointError> {
        let checkpoint = self.load(run_id).await?;
        Ok(checkpoint.completed_stage_names().into_iter().collect())
    }

    /// Record the answer to an expensive external query so a resume does
    /// not re-issue it.
    pub async fn cache_side_artifact(
        &self,
        run_id: &str,
        fingerprint: &str,
        value: serde_json::Value,
    ) -> Result<(), CheckpointError> {
        let mut checkpoint = self.load(run_id).await?;
        checkpoint
            .side_artifacts
            .insert(fingerprint.to_string(), value);
        checkpoint.touch();
        self.store.put(&checkpoint).await
    }

    pub async fn cached_side_artifact(
        &self,
        run_id: &str,
        fingerprint: &str,
    ) -> Result<Option<serde_json::Value>, CheckpointError> {
        let checkpoint = self.load(run_id).await?;
        Ok(checkpoint.side_artifacts.get(fingerprint).cloned())
    }

    /// Explicitly discard a run. The record stays on disk, marked
    /// `Abandoned`, so the run id can be reused with `create`.
    pub async fn abandon(&self, run_id: &str) -> Result<RunCheckpoint, CheckpointError> {
        let mut checkpoint = self.load(run_id).await?;
        checkpoint.status = RunStatus::Abandoned;
        checkpoint.touch();
        self.store.put(&checkpoint).await?;
        info!(run_id, "Run abandoned");
        Ok(checkpoint)
    }

    /// Transition the run to `Failed` after recovery was exhausted.
    pub async fn mark_failed(&self, run_id: &str) -> Result<RunCheckpoint, CheckpointError> {
        let mut checkpoint = self.load(run_id).await?;
        checkpoint.status = RunStatus::Failed;
        checkpoint.touch();
        self.store.put(&checkpoint).await?;
        Ok(checkpoint)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError> {
        self.store.get(run_id).await
    }

    /// Delete the run checkpoint entirely. This is the only way to redo a
    /// completed stage.
    pub async fn delete(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.store.delete(run_id).await
    }

    async fn load(&self, run_id: &str) -> Result<RunCheckpoint, CheckpointError> {
        self.store
            .get(run_id)
            .await?
            .ok_or_else(|| CheckpointError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }
}

/// Deterministic fingerprint over the semantic inputs of an external
/// query. Parts are length-delimited so `["ab", "c"]` and `["a", "bc"]`
/// hash differently; callers must not feed in unrelated context such as
/// timestamps.
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}
