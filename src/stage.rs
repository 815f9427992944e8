//! The stage contract and the shared run context.
//!
//! A stage is a named unit of work consumed through a narrow interface:
//! `execute(context)` returns a domain-specific status label, a success
//! flag, and an opaque result payload. The executor merges successful
//! results into the shared `RunContext` for downstream stages.

use crate::checkpoint::model::{FailureDetail, FailureKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shared execution context passed between stages.
///
/// Mutated only by the executor (merging stage outputs); stages and the
/// supervisor read it. Entries are keyed by the stage that produced them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    values: HashMap<String, serde_json::Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output of a previously completed stage, if any. Downstream stages
    /// must tolerate an absent slot: a supervisor-skipped stage leaves
    /// its slot empty.
    pub fn get(&self, stage_name: &str) -> Option<&serde_json::Value> {
        self.values.get(stage_name)
    }

    pub fn insert(&mut self, stage_name: &str, value: serde_json::Value) {
        self.values.insert(stage_name.to_string(), value);
    }

    pub fn contains(&self, stage_name: &str) -> bool {
        self.values.contains_key(stage_name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What a stage failed with, as reported by the stage itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one stage execution.
///
/// `status` is a domain-specific label; `success` decides the executor's
/// success/failure branch. A stage must report `success = false` whenever
/// its status indicates incomplete or invalid work; a disagreement is a
/// stage-authoring defect and is logged, not repaired.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub status: String,
    pub success: bool,
    pub result: serde_json::Value,
    /// Present when `success` is false.
    pub failure: Option<StageFailure>,
}

impl StageOutcome {
    pub fn success(status: &str, result: serde_json::Value) -> Self {
        Self {
            status: status.to_string(),
            success: true,
            result,
            failure: None,
        }
    }

    pub fn failure(status: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            success: false,
            result: serde_json::Value::Null,
            failure: Some(StageFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Convert the failure side of this outcome into a checkpointable
    /// detail record. Falls back to `Other` when the stage reported
    /// failure without detail.
    pub fn failure_detail(&self, attempts: u32) -> FailureDetail {
        let (kind, message) = match &self.failure {
            Some(f) => (f.kind.clone(), f.message.clone()),
            None => (
                FailureKind::Other,
                format!("stage reported status '{}' without detail", self.status),
            ),
        };
        let mut detail = FailureDetail::new(kind, message);
        detail.attempts = attempts;
        detail
    }
}

/// A named unit of work driven by the stage executor.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Execute against the shared context. `Err` is treated as a failure
    /// with kind `Other`; stages that can classify their failures should
    /// return `Ok` with a failure outcome instead.
    async fn execute(&self, context: &RunContext) -> anyhow::Result<StageOutcome>;
}
