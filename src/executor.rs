//! Sequential stage executor.
//!
//! Drives an ordered list of stages against the shared run context,
//! consulting the checkpoint manager to skip already-completed stages and
//! persisting progress after every attempt. Failures are handed to the
//! supervisor; its verdict decides whether the stage is substituted,
//! retried, skipped, or the run halts.

use crate::checkpoint::manager::CheckpointManager;
use crate::checkpoint::model::{FailureKind, StageCheckpoint};
use crate::errors::{CheckpointError, RunError};
use crate::stage::{RunContext, Stage, StageOutcome};
use crate::supervisor::{RecoveryOutcome, Supervisor};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How an executor run ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorOutcome {
    /// Every stage reached a terminal non-failed status.
    Completed,
    /// Cancellation was requested; the run stopped at a stage boundary
    /// and the checkpoint is left in its last persisted state.
    Cancelled,
}

enum StageDisposition {
    Continue,
    Halt { stage: String, summary: String },
}

pub struct StageExecutor {
    manager: Arc<CheckpointManager>,
    supervisor: Arc<Supervisor>,
    max_attempts: u32,
    cancel: Option<watch::Receiver<bool>>,
}

impl StageExecutor {
    pub fn new(
        manager: Arc<CheckpointManager>,
        supervisor: Arc<Supervisor>,
        max_attempts: u32,
    ) -> Self {
        Self {
            manager,
            supervisor,
            max_attempts,
            cancel: None,
        }
    }

    /// Attach a cancellation signal, honored between stage boundaries.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Drive the given stages in order for `run_id`.
    ///
    /// With `resume = true`, stages whose checkpoints are already
    /// `Completed` or `Skipped` are never re-executed; a completed
    /// stage's recorded result is injected into the shared context as if
    /// it had just run.
    pub async fn run(
        &self,
        run_id: &str,
        stages: &[Arc<dyn Stage>],
        resume: bool,
    ) -> Result<ExecutorOutcome, RunError> {
        let skip: HashSet<String> = if resume {
            self.manager.completed_stage_names(run_id).await?
        } else {
            HashSet::new()
        };

        let mut context = RunContext::new();
        if resume && !skip.is_empty() {
            let checkpoint = self.manager.get(run_id).await?.ok_or_else(|| {
                CheckpointError::RunNotFound {
                    run_id: run_id.to_string(),
                }
            })?;
            for name in &skip {
                // Supervisor-skipped stages recorded no result; their
                // context slot stays absent.
                if let Some(stage) = checkpoint.stage(name)
                    && let Some(result) = &stage.result
                {
                    context.insert(name, result.clone());
                }
            }
        }

        for stage in stages {
            if self.cancel_requested() {
                info!(run_id, stage = stage.name(), "Cancellation requested; stopping at stage boundary");
                return Ok(ExecutorOutcome::Cancelled);
            }

            let name = stage.name();
            if skip.contains(name) {
                debug!(run_id, stage = name, "Stage already terminal; skipping");
                continue;
            }

            match self.drive_stage(run_id, stage.as_ref(), &mut context).await? {
                StageDisposition::Continue => {}
                StageDisposition::Halt { stage, summary } => {
                    self.manager.mark_failed(run_id).await?;
                    return Err(RunError::ManualInterventionRequired { stage, summary });
                }
            }
        }

        Ok(ExecutorOutcome::Completed)
    }

    /// Execute one stage to a terminal status, retrying as directed by
    /// the supervisor up to the attempt cap.
    async fn drive_stage(
        &self,
        run_id: &str,
        stage: &dyn Stage,
        context: &mut RunContext,
    ) -> Result<StageDisposition, RunError> {
        let name = stage.name();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let started = Utc::now();
            self.manager
                .save_stage(run_id, StageCheckpoint::running(name, started))
                .await?;
            info!(run_id, stage = name, attempt = attempts, "Executing stage");

            let outcome = match stage.execute(context).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    StageOutcome::failure("error", FailureKind::Other, format!("{e:#}"))
                }
            };

            if outcome.success {
                if outcome.failure.is_some() {
                    // Stage-authoring defect: status and success disagree.
                    warn!(
                        run_id,
                        stage = name,
                        status = %outcome.status,
                        "Stage reported success together with failure detail; trusting the success flag"
                    );
                }
                let finished = Utc::now();
                self.manager
                    .save_stage(
                        run_id,
                        StageCheckpoint::completed(name, outcome.result.clone(), started, finished),
                    )
                    .await?;
                context.insert(name, outcome.result);
                return Ok(StageDisposition::Continue);
            }

            let mut failure = outcome.failure_detail(attempts);
            info!(
                run_id,
                stage = name,
                attempt = attempts,
                message = %failure.message,
                "Stage failed; invoking supervisor"
            );
            let report = self
                .supervisor
                .recover(run_id, name, &failure, context)
                .await;
            failure.strategies_tried = report.strategies_tried;
            let finished = Utc::now();

            match report.outcome {
                RecoveryOutcome::Substitute { result } => {
                    self.manager
                        .save_stage(
                            run_id,
                            StageCheckpoint::completed(name, result.clone(), started, finished)
                                .with_recovered(true),
                        )
                        .await?;
                    context.insert(name, result);
                    return Ok(StageDisposition::Continue);
                }
                RecoveryOutcome::Retry => {
                    if attempts >= self.max_attempts {
                        // The supervisor's own strategies respect the
                        // cap; this guards against a replacement chain
                        // that retries unconditionally.
                        let summary = format!(
                            "stage '{name}' failed after {attempts} attempts and the retry budget is exhausted: {}",
                            failure.message
                        );
                        self.manager
                            .save_stage(
                                run_id,
                                StageCheckpoint::failed(name, failure, started, finished),
                            )
                            .await?;
                        return Ok(StageDisposition::Halt {
                            stage: name.to_string(),
                            summary,
                        });
                    }
                    debug!(run_id, stage = name, "Retrying stage");
                }
                RecoveryOutcome::Skip => {
                    self.manager
                        .save_stage(run_id, StageCheckpoint::skipped(name, started, finished))
                        .await?;
                    // A skipped stage contributes nothing to the context.
                    return Ok(StageDisposition::Continue);
                }
                RecoveryOutcome::ManualInterventionRequired { summary } => {
                    self.manager
                        .save_stage(
                            run_id,
                            StageCheckpoint::failed(name, failure, started, finished),
                        )
                        .await?;
                    return Ok(StageDisposition::Halt {
                        stage: name.to_string(),
                        summary,
                    });
                }
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
