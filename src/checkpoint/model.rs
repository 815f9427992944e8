//! Checkpoint data model: run and stage records, status enums, and their
//! lifecycle invariants.
//!
//! One `RunCheckpoint` exists per logical run. Stage entries are recorded
//! in execution order and only once a stage has actually been attempted;
//! the configured stage list lives separately so completion can be decided
//! against stages that were never reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is in progress or stopped mid-way; resumable.
    Active,
    /// Every configured stage reached a terminal non-failed status.
    Completed,
    /// A stage exhausted recovery without resolution.
    Failed,
    /// Explicitly discarded by the caller.
    Abandoned,
}

/// Status of a single stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Recorded but not yet started.
    Pending,
    /// Execution in flight. A crash leaves the record here, which resume
    /// treats as not done.
    Running,
    /// Finished successfully; immutable from here on.
    Completed,
    /// Failed after recovery was exhausted.
    Failed,
    /// Deliberately skipped by the supervisor's skip strategy.
    Skipped,
}

impl StageStatus {
    /// Whether this status ends the stage's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

/// Classification of a stage failure, used by the recovery strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage's output was missing a required field. Carries the field
    /// name so the defaulting strategy can consult its policy table.
    MissingField { field: String },
    /// Likely to succeed on a retry (network blip, flaky dependency).
    Transient,
    /// Will not succeed no matter how often it is retried.
    Fatal,
    /// Anything else.
    Other,
}

/// Failure record attached to a `Failed` stage checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    /// Attempts already made for this stage during the current run.
    #[serde(default)]
    pub attempts: u32,
    /// Names of recovery strategies already applied, in order.
    #[serde(default)]
    pub strategies_tried: Vec<String>,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
            strategies_tried: Vec::new(),
        }
    }
}

/// Snapshot of one stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCheckpoint {
    /// Stage name, unique within the run.
    pub name: String,
    pub status: StageStatus,
    /// Result payload; present only for `Completed` (and for `Skipped`
    /// stages that recorded one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// True when the result came from the supervisor's recovery rather
    /// than the stage itself.
    #[serde(default)]
    pub recovered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl StageCheckpoint {
    /// A stage that has just started executing.
    pub fn running(name: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Running,
            result: None,
            recovered: false,
            started_at: Some(started_at),
            finished_at: None,
            failure: None,
        }
    }

    /// A successfully completed stage.
    pub fn completed(
        name: &str,
        result: serde_json::Value,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(finished_at >= started_at);
        Self {
            name: name.to_string(),
            status: StageStatus::Completed,
            result: Some(result),
            recovered: false,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            failure: None,
        }
    }

    /// Mark the result as supervisor-recovered (substitute result).
    pub fn with_recovered(mut self, recovered: bool) -> Self {
        self.recovered = recovered;
        self
    }

    /// A stage skipped by the supervisor.
    pub fn skipped(name: &str, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Skipped,
            result: None,
            recovered: false,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            failure: None,
        }
    }

    /// A stage that failed terminally.
    pub fn failed(
        name: &str,
        failure: FailureDetail,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Failed,
            result: None,
            recovered: false,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            failure: Some(failure),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Durable record of one run: status, ordered stage checkpoints, resume
/// counter, timestamps, and the side-artifact cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub status: RunStatus,
    /// Stage names in configured execution order. Completion is decided
    /// against this list, not against attempted stages.
    #[serde(default)]
    pub stage_names: Vec<String>,
    /// Checkpoints for attempted stages, in the order they were first
    /// attempted. An entry exists iff the stage has been attempted.
    #[serde(default)]
    pub stages: Vec<StageCheckpoint>,
    /// Incremented on every resume; never reset for a given run id.
    #[serde(default)]
    pub resumes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fingerprint of an external query → previously obtained result,
    /// used to avoid re-issuing already-answered queries on resume.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub side_artifacts: HashMap<String, serde_json::Value>,
}

impl RunCheckpoint {
    /// A fresh, active run with no stage attempted yet.
    pub fn new(run_id: &str, stage_names: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Active,
            stage_names,
            stages: Vec::new(),
            resumes: 0,
            created_at: now,
            updated_at: now,
            side_artifacts: HashMap::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageCheckpoint> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Insert or replace the checkpoint for one stage, preserving the
    /// position of an existing entry.
    pub fn upsert_stage(&mut self, stage: StageCheckpoint) {
        match self.stages.iter_mut().find(|s| s.name == stage.name) {
            Some(existing) => *existing = stage,
            None => self.stages.push(stage),
        }
    }

    /// Stage names with status `Completed` or `Skipped`, in attempt order.
    pub fn completed_stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Completed | StageStatus::Skipped))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Whether every configured stage has reached a terminal status.
    pub fn all_stages_terminal(&self) -> bool {
        !self.stage_names.is_empty()
            && self
                .stage_names
                .iter()
                .all(|name| self.stage(name).is_some_and(|s| s.is_terminal()))
    }

    pub fn any_stage_failed(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }

    /// Refresh the last-updated timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
