//! Supervisor: the bounded recovery state machine driven on stage
//! failure.
//!
//! States run `Detected → Consulting → (Retry | Defaulting | Skipping) →
//! Resolved | Escalated`. Consultation comes first because the advisory
//! service has the best information; the mechanical strategies follow in
//! increasing order of risk. Failures internal to a strategy (advisor
//! timeout, transport error) are converted to "not applicable" and never
//! propagate past this module.

pub mod advisor;
pub mod strategy;

pub use advisor::{Advisor, AdvisorDirective, AdvisorRequest, HttpAdvisor, NullAdvisor};
pub use strategy::{
    DefaultingStrategy, RecoveryAction, RecoveryStrategy, RetryStrategy, SkippingStrategy,
    StrategyDecision,
};

use crate::checkpoint::model::FailureDetail;
use crate::config::WaypointConfig;
use crate::stage::RunContext;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Position in the recovery state machine, recorded for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Detected,
    Consulting,
    Retrying,
    Defaulting,
    Skipping,
    Resolved,
    Escalated,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecoveryState::Detected => "detected",
            RecoveryState::Consulting => "consulting",
            RecoveryState::Retrying => "retrying",
            RecoveryState::Defaulting => "defaulting",
            RecoveryState::Skipping => "skipping",
            RecoveryState::Resolved => "resolved",
            RecoveryState::Escalated => "escalated",
        };
        write!(f, "{label}")
    }
}

/// What the executor should do with the failed stage.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Persist the stage as completed with this substitute result.
    Substitute { result: serde_json::Value },
    /// Re-execute the same stage.
    Retry,
    /// Persist the stage as skipped and continue.
    Skip,
    /// Recovery exhausted; halt the run.
    ManualInterventionRequired { summary: String },
}

/// Full account of one recovery pass.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub outcome: RecoveryOutcome,
    /// Strategy names attempted, in order ("consult" included).
    pub strategies_tried: Vec<String>,
    pub final_state: RecoveryState,
}

pub struct Supervisor {
    advisor: Arc<dyn Advisor>,
    advisor_timeout: Duration,
    max_attempts: u32,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Supervisor {
    /// Build the standard chain (retry, defaulting, skipping) from the
    /// configuration.
    pub fn new(config: &WaypointConfig, advisor: Arc<dyn Advisor>) -> Self {
        let strategies: Vec<Box<dyn RecoveryStrategy>> = vec![
            Box::new(RetryStrategy::new(config.max_attempts_per_stage)),
            Box::new(DefaultingStrategy::new(config.default_policy.clone())),
            Box::new(SkippingStrategy::new(config.skippable_stages.clone())),
        ];
        Self {
            advisor,
            advisor_timeout: config.advisor_timeout(),
            max_attempts: config.max_attempts_per_stage,
            strategies,
        }
    }

    /// Replace the strategy chain. The chain order is the attempt order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Drive the recovery state machine for one stage failure.
    pub async fn recover(
        &self,
        run_id: &str,
        stage_name: &str,
        failure: &FailureDetail,
        context: &RunContext,
    ) -> RecoveryReport {
        debug!(run_id, stage = stage_name, state = %RecoveryState::Detected, "Stage failure detected");

        let mut tried: Vec<String> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();

        // Consultation first: best information, least mechanical.
        debug!(run_id, stage = stage_name, state = %RecoveryState::Consulting, "Consulting advisor");
        tried.push("consult".to_string());
        match self.consult(run_id, stage_name, failure, context).await {
            ConsultResult::Directive(AdvisorDirective::Substitute { result }) => {
                return RecoveryReport {
                    outcome: RecoveryOutcome::Substitute { result },
                    strategies_tried: tried,
                    final_state: RecoveryState::Resolved,
                };
            }
            ConsultResult::Directive(AdvisorDirective::Retry) => {
                // The attempt cap binds advisor directives too; past it
                // the failure falls through to the rest of the chain so
                // an escalation reports every avenue uniformly.
                if failure.attempts < self.max_attempts {
                    return RecoveryReport {
                        outcome: RecoveryOutcome::Retry,
                        strategies_tried: tried,
                        final_state: RecoveryState::Resolved,
                    };
                }
                reasons.push(format!(
                    "consult: advisor directed a retry but attempt {} reached the maximum of {}",
                    failure.attempts, self.max_attempts
                ));
            }
            ConsultResult::Directive(AdvisorDirective::Skip) => {
                return RecoveryReport {
                    outcome: RecoveryOutcome::Skip,
                    strategies_tried: tried,
                    final_state: RecoveryState::Resolved,
                };
            }
            ConsultResult::Directive(AdvisorDirective::NoDirective) => {
                reasons.push("consult: advisor returned no directive".to_string());
            }
            ConsultResult::Unavailable(reason) => {
                reasons.push(format!("consult: {reason}"));
            }
        }

        // Fixed chain, stopping at the first strategy that resolves.
        for strategy in &self.strategies {
            if !strategy.applies(stage_name, failure) {
                // attempt() explains why it does not apply.
                if let StrategyDecision::NotApplicable { reason } =
                    strategy.attempt(stage_name, failure, context)
                {
                    reasons.push(format!("{}: {reason}", strategy.name()));
                }
                continue;
            }

            debug!(
                run_id,
                stage = stage_name,
                state = %strategy.state(),
                strategy = strategy.name(),
                "Attempting recovery strategy"
            );
            tried.push(strategy.name().to_string());

            match strategy.attempt(stage_name, failure, context) {
                StrategyDecision::Resolved(RecoveryAction::Retry) => {
                    return RecoveryReport {
                        outcome: RecoveryOutcome::Retry,
                        strategies_tried: tried,
                        final_state: RecoveryState::Resolved,
                    };
                }
                StrategyDecision::Resolved(RecoveryAction::Substitute { result }) => {
                    return RecoveryReport {
                        outcome: RecoveryOutcome::Substitute { result },
                        strategies_tried: tried,
                        final_state: RecoveryState::Resolved,
                    };
                }
                StrategyDecision::Resolved(RecoveryAction::Skip) => {
                    return RecoveryReport {
                        outcome: RecoveryOutcome::Skip,
                        strategies_tried: tried,
                        final_state: RecoveryState::Resolved,
                    };
                }
                StrategyDecision::NotApplicable { reason } => {
                    reasons.push(format!("{}: {reason}", strategy.name()));
                }
            }
        }

        let summary = format!(
            "stage '{}' failed ({}); no recovery strategy resolved it: {}",
            stage_name,
            failure.message,
            reasons.join("; ")
        );
        warn!(run_id, stage = stage_name, state = %RecoveryState::Escalated, %summary, "Recovery exhausted");
        RecoveryReport {
            outcome: RecoveryOutcome::ManualInterventionRequired { summary },
            strategies_tried: tried,
            final_state: RecoveryState::Escalated,
        }
    }

    async fn consult(
        &self,
        run_id: &str,
        stage_name: &str,
        failure: &FailureDetail,
        context: &RunContext,
    ) -> ConsultResult {
        let request = AdvisorRequest {
            run_id: run_id.to_string(),
            stage: stage_name.to_string(),
            failure: failure.clone(),
            context: context.clone(),
        };

        match tokio::time::timeout(self.advisor_timeout, self.advisor.consult(&request)).await {
            Ok(Ok(directive)) => ConsultResult::Directive(directive),
            Ok(Err(e)) => {
                warn!(run_id, stage = stage_name, error = %e, "Advisor consultation failed");
                ConsultResult::Unavailable(format!("advisor unavailable ({e:#})"))
            }
            Err(_) => {
                warn!(
                    run_id,
                    stage = stage_name,
                    timeout_secs = self.advisor_timeout.as_secs(),
                    "Advisor consultation timed out"
                );
                ConsultResult::Unavailable("advisor timed out".to_string())
            }
        }
    }
}

enum ConsultResult {
    Directive(AdvisorDirective),
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::model::FailureKind;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedAdvisor(AdvisorDirective);

    #[async_trait]
    impl Advisor for FixedAdvisor {
        async fn consult(&self, _request: &AdvisorRequest) -> anyhow::Result<AdvisorDirective> {
            Ok(self.0.clone())
        }
    }

    struct BrokenAdvisor;

    #[async_trait]
    impl Advisor for BrokenAdvisor {
        async fn consult(&self, _request: &AdvisorRequest) -> anyhow::Result<AdvisorDirective> {
            Err(anyhow!("connection refused"))
        }
    }

    struct SlowAdvisor;

    #[async_trait]
    impl Advisor for SlowAdvisor {
        async fn consult(&self, _request: &AdvisorRequest) -> anyhow::Result<AdvisorDirective> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(AdvisorDirective::Retry)
        }
    }

    fn config() -> WaypointConfig {
        let mut config = WaypointConfig::default();
        config.max_attempts_per_stage = 3;
        config
            .default_policy
            .insert("verdict".to_string(), json!("approve"));
        config.skippable_stages = vec!["lint".to_string()];
        config.advisor_timeout_secs = 1;
        config
    }

    fn failure(kind: FailureKind, attempts: u32) -> FailureDetail {
        let mut detail = FailureDetail::new(kind, "test failure");
        detail.attempts = attempts;
        detail
    }

    #[tokio::test]
    async fn advisor_directive_short_circuits_the_chain() {
        let supervisor = Supervisor::new(
            &config(),
            Arc::new(FixedAdvisor(AdvisorDirective::Substitute {
                result: json!({"fixed": true}),
            })),
        );
        let report = supervisor
            .recover(
                "run-1",
                "build",
                &failure(FailureKind::Transient, 1),
                &RunContext::new(),
            )
            .await;

        assert_eq!(
            report.outcome,
            RecoveryOutcome::Substitute {
                result: json!({"fixed": true})
            }
        );
        assert_eq!(report.strategies_tried, vec!["consult"]);
        assert_eq!(report.final_state, RecoveryState::Resolved);
    }

    #[tokio::test]
    async fn retry_is_attempted_before_defaulting() {
        // Failure is both retryable (attempts below cap) and
        // default-eligible (missing field with a policy entry): retry
        // must win.
        let supervisor = Supervisor::new(&config(), Arc::new(NullAdvisor));
        let report = supervisor
            .recover(
                "run-1",
                "review",
                &failure(
                    FailureKind::MissingField {
                        field: "verdict".into(),
                    },
                    1,
                ),
                &RunContext::new(),
            )
            .await;

        assert_eq!(report.outcome, RecoveryOutcome::Retry);
        assert_eq!(report.strategies_tried, vec!["consult", "retry"]);
    }

    #[tokio::test]
    async fn defaulting_is_attempted_before_skipping() {
        // Attempts exhausted, stage is skippable, and the missing field
        // has a policy entry: defaulting must win over skipping.
        let mut config = config();
        config.skippable_stages = vec!["review".to_string()];
        let supervisor = Supervisor::new(&config, Arc::new(NullAdvisor));

        let report = supervisor
            .recover(
                "run-1",
                "review",
                &failure(
                    FailureKind::MissingField {
                        field: "verdict".into(),
                    },
                    3,
                ),
                &RunContext::new(),
            )
            .await;

        match report.outcome {
            RecoveryOutcome::Substitute { result } => {
                assert_eq!(result["verdict"], json!("approve"));
                assert_eq!(result["default_derived"], json!(true));
            }
            other => panic!("Expected Substitute, got {other:?}"),
        }
        assert_eq!(report.strategies_tried, vec!["consult", "defaulting"]);
    }

    #[tokio::test]
    async fn unknown_field_falls_through_to_skipping() {
        let mut config = config();
        config.skippable_stages = vec!["review".to_string()];
        let supervisor = Supervisor::new(&config, Arc::new(NullAdvisor));

        let report = supervisor
            .recover(
                "run-1",
                "review",
                &failure(
                    FailureKind::MissingField {
                        field: "unknown_field".into(),
                    },
                    3,
                ),
                &RunContext::new(),
            )
            .await;

        assert_eq!(report.outcome, RecoveryOutcome::Skip);
        assert_eq!(
            report.strategies_tried,
            vec!["consult", "defaulting", "skipping"]
        );
    }

    #[tokio::test]
    async fn escalation_summary_names_every_strategy() {
        let supervisor = Supervisor::new(&config(), Arc::new(NullAdvisor));
        // Attempts exhausted, not a missing field, stage not skippable.
        let report = supervisor
            .recover(
                "run-1",
                "deploy",
                &failure(FailureKind::Fatal, 3),
                &RunContext::new(),
            )
            .await;

        let summary = match &report.outcome {
            RecoveryOutcome::ManualInterventionRequired { summary } => summary.clone(),
            other => panic!("Expected escalation, got {other:?}"),
        };
        assert_eq!(report.final_state, RecoveryState::Escalated);
        assert!(summary.contains("consult"));
        assert!(summary.contains("retry"));
        assert!(summary.contains("defaulting"));
        assert!(summary.contains("skipping"));
        assert!(summary.contains("test failure"));
    }

    #[tokio::test]
    async fn advisor_retry_directive_is_honored_below_the_cap() {
        let supervisor = Supervisor::new(
            &config(),
            Arc::new(FixedAdvisor(AdvisorDirective::Retry)),
        );
        let report = supervisor
            .recover(
                "run-1",
                "build",
                &failure(FailureKind::Fatal, 2),
                &RunContext::new(),
            )
            .await;
        assert_eq!(report.outcome, RecoveryOutcome::Retry);
        assert_eq!(report.strategies_tried, vec!["consult"]);
    }

    #[tokio::test]
    async fn advisor_retry_directive_past_the_cap_escalates_uniformly() {
        // Attempts exhausted, not a missing field, stage not skippable;
        // the advisor keeps directing retries regardless.
        let supervisor = Supervisor::new(
            &config(),
            Arc::new(FixedAdvisor(AdvisorDirective::Retry)),
        );
        let report = supervisor
            .recover(
                "run-1",
                "deploy",
                &failure(FailureKind::Fatal, 3),
                &RunContext::new(),
            )
            .await;

        let summary = match &report.outcome {
            RecoveryOutcome::ManualInterventionRequired { summary } => summary.clone(),
            other => panic!("Expected escalation, got {other:?}"),
        };
        assert_eq!(report.final_state, RecoveryState::Escalated);
        assert!(summary.contains("advisor directed a retry"));
        assert!(summary.contains("retry"));
        assert!(summary.contains("defaulting"));
        assert!(summary.contains("skipping"));
    }

    #[tokio::test]
    async fn custom_strategy_chain_reports_its_own_name_and_state() {
        struct PatchStrategy;

        impl RecoveryStrategy for PatchStrategy {
            fn name(&self) -> &'static str {
                "patching"
            }

            fn state(&self) -> RecoveryState {
                RecoveryState::Defaulting
            }

            fn applies(&self, _stage_name: &str, _failure: &FailureDetail) -> bool {
                true
            }

            fn attempt(
                &self,
                _stage_name: &str,
                _failure: &FailureDetail,
                _context: &RunContext,
            ) -> StrategyDecision {
                StrategyDecision::Resolved(RecoveryAction::Substitute {
                    result: json!({"patched": true}),
                })
            }
        }

        let supervisor = Supervisor::new(&config(), Arc::new(NullAdvisor))
            .with_strategies(vec![Box::new(PatchStrategy)]);
        assert_eq!(PatchStrategy.state(), RecoveryState::Defaulting);

        let report = supervisor
            .recover(
                "run-1",
                "build",
                &failure(FailureKind::Fatal, 3),
                &RunContext::new(),
            )
            .await;
        assert_eq!(
            report.outcome,
            RecoveryOutcome::Substitute {
                result: json!({"patched": true})
            }
        );
        assert_eq!(report.strategies_tried, vec!["consult", "patching"]);
    }

    #[tokio::test]
    async fn broken_advisor_degrades_to_the_chain() {
        let supervisor = Supervisor::new(&config(), Arc::new(BrokenAdvisor));
        let report = supervisor
            .recover(
                "run-1",
                "build",
                &failure(FailureKind::Transient, 1),
                &RunContext::new(),
            )
            .await;
        // The transport failure never propagates; retry resolves.
        assert_eq!(report.outcome, RecoveryOutcome::Retry);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_advisor_times_out_and_degrades() {
        let supervisor = Supervisor::new(&config(), Arc::new(SlowAdvisor));
        let report = supervisor
            .recover(
                "run-1",
                "build",
                &failure(FailureKind::Transient, 1),
                &RunContext::new(),
            )
            .await;
        assert_eq!(report.outcome, RecoveryOutcome::Retry);
    }
}
