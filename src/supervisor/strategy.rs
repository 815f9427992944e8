//! Layered recovery strategies.
//!
//! Each strategy is a small polymorphic object: `applies` gates on the
//! failure, `attempt` produces a decision. The supervisor walks a fixed
//! ordered chain (retry, defaulting, skipping) and stops at the first
//! strategy that resolves the failure; new strategies slot in without
//! touching the supervisor loop.

use crate::checkpoint::model::{FailureDetail, FailureKind};
use crate::stage::RunContext;
use crate::supervisor::RecoveryState;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// How a resolved failure is acted upon.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Re-execute the same stage.
    Retry,
    /// Treat the stage as succeeded with this substitute result.
    Substitute { result: serde_json::Value },
    /// Record the stage as skipped and continue.
    Skip,
}

/// Decision from one strategy attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyDecision {
    Resolved(RecoveryAction),
    NotApplicable { reason: String },
}

pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// State machine position this strategy occupies while attempting.
    fn state(&self) -> RecoveryState;

    /// Cheap applicability gate; `attempt` re-checks and explains.
    fn applies(&self, stage_name: &str, failure: &FailureDetail) -> bool;

    fn attempt(
        &self,
        stage_name: &str,
        failure: &FailureDetail,
        context: &RunContext,
    ) -> StrategyDecision;
}

/// Retry: applicable while the stage's attempt count is below the cap.
/// Assumes the failure is transient.
pub struct RetryStrategy {
    max_attempts: u32,
}

impl RetryStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl RecoveryStrategy for RetryStrategy {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn state(&self) -> RecoveryState {
        RecoveryState::Retrying
    }

    fn applies(&self, _stage_name: &str, failure: &FailureDetail) -> bool {
        failure.attempts < self.max_attempts
    }

    fn attempt(
        &self,
        stage_name: &str,
        failure: &FailureDetail,
        _context: &RunContext,
    ) -> StrategyDecision {
        if !self.applies(stage_name, failure) {
            return StrategyDecision::NotApplicable {
                reason: format!(
                    "attempt {} reached the maximum of {}",
                    failure.attempts, self.max_attempts
                ),
            };
        }
        StrategyDecision::Resolved(RecoveryAction::Retry)
    }
}

/// Defaulting: applicable only to missing-field failures. Looks up a
/// policy table of field name → safe default; fails closed for fields
/// without a policy entry, never guessing a value.
pub struct DefaultingStrategy {
    policy: HashMap<String, serde_json::Value>,
}

impl DefaultingStrategy {
    pub fn new(policy: HashMap<String, serde_json::Value>) -> Self {
        Self { policy }
    }
}

impl RecoveryStrategy for DefaultingStrategy {
    fn name(&self) -> &'static str {
        "defaulting"
    }

    fn state(&self) -> RecoveryState {
        RecoveryState::Defaulting
    }

    fn applies(&self, _stage_name: &str, failure: &FailureDetail) -> bool {
        matches!(failure.kind, FailureKind::MissingField { .. })
    }

    fn attempt(
        &self,
        _stage_name: &str,
        failure: &FailureDetail,
        _context: &RunContext,
    ) -> StrategyDecision {
        let field = match &failure.kind {
            FailureKind::MissingField { field } => field,
            _ => {
                return StrategyDecision::NotApplicable {
                    reason: "failure is not a missing-field condition".to_string(),
                };
            }
        };

        match self.policy.get(field) {
            Some(value) => {
                let mut result = serde_json::Map::new();
                result.insert(field.clone(), value.clone());
                result.insert("default_derived".to_string(), json!(true));
                StrategyDecision::Resolved(RecoveryAction::Substitute {
                    result: serde_json::Value::Object(result),
                })
            }
            None => StrategyDecision::NotApplicable {
                reason: format!("no default policy entry for field '{field}'"),
            },
        }
    }
}

/// Skipping: applicable only to stages on the configured allow-list of
/// non-critical stages.
pub struct SkippingStrategy {
    skippable: HashSet<String>,
}

impl SkippingStrategy {
    pub fn new<I, S>(skippable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skippable: skippable.into_iter().map(Into::into).collect(),
        }
    }
}

impl RecoveryStrategy for SkippingStrategy {
    fn name(&self) -> &'static str {
        "skipping"
    }

    fn state(&self) -> RecoveryState {
        RecoveryState::Skipping
    }

    fn applies(&self, stage_name: &str, _failure: &FailureDetail) -> bool {
        self.skippable.contains(stage_name)
    }

    fn attempt(
        &self,
        stage_name: &str,
        _failure: &FailureDetail,
        _context: &RunContext,
    ) -> StrategyDecision {
        if !self.skippable.contains(stage_name) {
            return StrategyDecision::NotApplicable {
                reason: format!("stage '{stage_name}' is not on the skippable allow-list"),
            };
        }
        StrategyDecision::Resolved(RecoveryAction::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: FailureKind, attempts: u32) -> FailureDetail {
        let mut detail = FailureDetail::new(kind, "test failure");
        detail.attempts = attempts;
        detail
    }

    #[test]
    fn retry_applies_below_cap_only() {
        let strategy = RetryStrategy::new(3);
        let ctx = RunContext::new();

        let early = failure(FailureKind::Transient, 1);
        assert!(strategy.applies("build", &early));
        assert_eq!(
            strategy.attempt("build", &early, &ctx),
            StrategyDecision::Resolved(RecoveryAction::Retry)
        );

        let exhausted = failure(FailureKind::Transient, 3);
        assert!(!strategy.applies("build", &exhausted));
        match strategy.attempt("build", &exhausted, &ctx) {
            StrategyDecision::NotApplicable { reason } => {
                assert!(reason.contains("maximum of 3"));
            }
            other => panic!("Expected NotApplicable, got {other:?}"),
        }
    }

    #[test]
    fn defaulting_substitutes_known_field_with_flag() {
        let mut policy = HashMap::new();
        policy.insert("artifact_url".to_string(), json!(""));
        let strategy = DefaultingStrategy::new(policy);
        let ctx = RunContext::new();

        let detail = failure(
            FailureKind::MissingField {
                field: "artifact_url".into(),
            },
            1,
        );
        assert!(strategy.applies("build", &detail));
        match strategy.attempt("build", &detail, &ctx) {
            StrategyDecision::Resolved(RecoveryAction::Substitute { result }) => {
                assert_eq!(result["artifact_url"], json!(""));
                assert_eq!(result["default_derived"], json!(true));
            }
            other => panic!("Expected Substitute, got {other:?}"),
        }
    }

    #[test]
    fn defaulting_fails_closed_for_unknown_field() {
        let strategy = DefaultingStrategy::new(HashMap::new());
        let ctx = RunContext::new();
        let detail = failure(
            FailureKind::MissingField {
                field: "mystery".into(),
            },
            1,
        );
        // Applicable by kind, but the table has no entry: never guess.
        assert!(strategy.applies("build", &detail));
        match strategy.attempt("build", &detail, &ctx) {
            StrategyDecision::NotApplicable { reason } => {
                assert!(reason.contains("mystery"));
            }
            other => panic!("Expected NotApplicable, got {other:?}"),
        }
    }

    #[test]
    fn defaulting_rejects_non_missing_field_failures() {
        let mut policy = HashMap::new();
        policy.insert("artifact_url".to_string(), json!(""));
        let strategy = DefaultingStrategy::new(policy);
        let detail = failure(FailureKind::Transient, 1);
        assert!(!strategy.applies("build", &detail));
    }

    #[test]
    fn skipping_honors_allow_list() {
        let strategy = SkippingStrategy::new(["lint", "docs"]);
        let ctx = RunContext::new();
        let detail = failure(FailureKind::Fatal, 1);

        assert!(strategy.applies("lint", &detail));
        assert_eq!(
            strategy.attempt("lint", &detail, &ctx),
            StrategyDecision::Resolved(RecoveryAction::Skip)
        );

        assert!(!strategy.applies("deploy", &detail));
        match strategy.attempt("deploy", &detail, &ctx) {
            StrategyDecision::NotApplicable { reason } => {
                assert!(reason.contains("deploy"));
            }
            other => panic!("Expected NotApplicable, got {other:?}"),
        }
    }
}
