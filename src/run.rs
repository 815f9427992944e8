//! Run control surface: start, resume, status, abandon.
//!
//! `Runner` wires the configuration, checkpoint manager, supervisor, and
//! stage executor together with explicit dependency passing; there is no
//! process-wide implicit state.

use crate::checkpoint::manager::CheckpointManager;
use crate::checkpoint::model::{RunStatus, StageStatus};
use crate::checkpoint::store::{CheckpointStore, FileStore};
use crate::config::WaypointConfig;
use crate::errors::{CheckpointError, RunError};
use crate::executor::{ExecutorOutcome, StageExecutor};
use crate::stage::Stage;
use crate::supervisor::{Advisor, HttpAdvisor, NullAdvisor, Supervisor};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal outcome of driving a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// A stage exhausted recovery; the escalation message summarizes the
    /// original failure and every strategy attempted.
    Failed { escalation: String },
    Abandoned,
    /// Stopped at a stage boundary on request; the checkpoint stays
    /// active and the run can be resumed.
    Cancelled,
}

/// Read-only snapshot of a run's checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub resumes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: String,
    pub status: StageStatus,
    pub recovered: bool,
}

pub struct Runner {
    manager: Arc<CheckpointManager>,
    executor: StageExecutor,
    cancel_tx: watch::Sender<bool>,
}

impl Runner {
    /// Assemble a runner over an explicit store and advisor.
    pub fn new(
        config: &WaypointConfig,
        store: Arc<dyn CheckpointStore>,
        advisor: Arc<dyn Advisor>,
    ) -> Self {
        let manager = Arc::new(CheckpointManager::new(store));
        let supervisor = Arc::new(Supervisor::new(config, advisor));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let executor =
            StageExecutor::new(manager.clone(), supervisor, config.max_attempts_per_stage)
                .with_cancel(cancel_rx);
        Self {
            manager,
            executor,
            cancel_tx,
        }
    }

    /// Assemble a runner from configuration alone: file-backed store and,
    /// when an endpoint is configured, an HTTP advisor.
    pub fn from_config(config: &WaypointConfig) -> Result<Self> {
        let store: Arc<dyn CheckpointStore> = Arc::new(
            FileStore::new(&config.checkpoint_dir)
                .context("Failed to open checkpoint directory")?,
        );
        let advisor: Arc<dyn Advisor> = match &config.advisor_endpoint {
            Some(endpoint) => Arc::new(HttpAdvisor::new(endpoint, config.advisor_timeout())?),
            None => Arc::new(NullAdvisor),
        };
        Ok(Self::new(config, store, advisor))
    }

    /// Create a checkpoint for `run_id` and drive every stage in order.
    pub async fn start(
        &self,
        run_id: &str,
        stages: &[Arc<dyn Stage>],
    ) -> Result<RunOutcome, RunError> {
        let names: Vec<String> = stages.iter().map(|s| s.name().to_string()).collect();
        self.manager.create(run_id, &names).await?;
        self.drive(run_id, stages, false).await
    }

    /// Resume a previously interrupted run, skipping terminal stages.
    pub async fn resume(
        &self,
        run_id: &str,
        stages: &[Arc<dyn Stage>],
    ) -> Result<RunOutcome, RunError> {
        self.manager.resume(run_id).await?;
        self.drive(run_id, stages, true).await
    }

    /// Snapshot the run's checkpoint without mutating anything.
    pub async fn status(&self, run_id: &str) -> Result<RunSummary, CheckpointError> {
        let checkpoint = self.manager.get(run_id).await?.ok_or_else(|| {
            CheckpointError::RunNotFound {
                run_id: run_id.to_string(),
            }
        })?;
        Ok(RunSummary {
            run_id: checkpoint.run_id.clone(),
            status: checkpoint.status,
            resumes: checkpoint.resumes,
            created_at: checkpoint.created_at,
            updated_at: checkpoint.updated_at,
            stages: checkpoint
                .stages
                .iter()
                .map(|s| StageSummary {
                    name: s.name.clone(),
                    status: s.status,
                    recovered: s.recovered,
                })
                .collect(),
        })
    }

    /// Explicitly discard a run.
    pub async fn abandon(&self, run_id: &str) -> Result<RunOutcome, CheckpointError> {
        self.manager.abandon(run_id).await?;
        Ok(RunOutcome::Abandoned)
    }

    /// Request cancellation; honored at the next stage boundary.
    pub fn request_cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Access to the checkpoint manager, e.g. for side-artifact caching
    /// by the code that owns the stages.
    pub fn manager(&self) -> &Arc<CheckpointManager> {
        &self.manager
    }

    async fn drive(
        &self,
        run_id: &str,
        stages: &[Arc<dyn Stage>],
        resume: bool,
    ) -> Result<RunOutcome, RunError> {
        match self.executor.run(run_id, stages, resume).await {
            Ok(ExecutorOutcome::Completed) => Ok(RunOutcome::Completed),
            Ok(ExecutorOutcome::Cancelled) => Ok(RunOutcome::Cancelled),
            Err(RunError::ManualInterventionRequired { summary, .. }) => {
                Ok(RunOutcome::Failed { escalation: summary })
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::store::MemoryStore;
    use crate::stage::{RunContext, StageOutcome};
    use async_trait::async_trait;
    use serde_json::json;

    struct OkStage(&'static str);

    #[async_trait]
    impl Stage for OkStage {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _context: &RunContext) -> anyhow::Result<StageOutcome> {
            Ok(StageOutcome::success("done", json!({"out": self.0})))
        }
    }

    fn runner() -> Runner {
        Runner::new(
            &WaypointConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullAdvisor),
        )
    }

    #[tokio::test]
    async fn start_runs_to_completion_and_status_reflects_it() {
        let runner = runner();
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(OkStage("a")), Arc::new(OkStage("b"))];

        let outcome = runner.start("run-1", &stages).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let summary = runner.status("run-1").await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.resumes, 0);
        assert_eq!(summary.stages.len(), 2);
        assert!(summary.stages.iter().all(|s| s.status == StageStatus::Completed));
    }

    #[tokio::test]
    async fn start_twice_surfaces_already_exists() {
        let runner = runner();
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(OkStage("a"))];
        runner.start("run-1", &stages).await.unwrap();

        let err = runner.start("run-1", &stages).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Checkpoint(CheckpointError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn abandon_then_start_reuses_the_run_id() {
        let runner = runner();
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(OkStage("a"))];
        runner.start("run-1", &stages).await.unwrap();

        assert_eq!(
            runner.abandon("run-1").await.unwrap(),
            RunOutcome::Abandoned
        );
        assert_eq!(
            runner.status("run-1").await.unwrap().status,
            RunStatus::Abandoned
        );

        let outcome = runner.start("run-1", &stages).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn status_for_unknown_run_fails() {
        let runner = runner();
        let err = runner.status("ghost").await.unwrap_err();
        assert!(matches!(err, CheckpointError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_before_start_leaves_an_active_record() {
        let runner = runner();
        runner.request_cancel();
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(OkStage("a"))];

        let outcome = runner.start("run-1", &stages).await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(
            runner.status("run-1").await.unwrap().status,
            RunStatus::Active
        );
    }
}
