//! Advisory reasoning service interface.
//!
//! The supervisor consults an external reasoning endpoint for a diagnosis
//! and a proposed fix before falling back to its mechanical strategies.
//! The service is consumed through one idempotent request/response
//! operation; the supervisor bounds the call with a timeout, so an
//! implementation here only needs to be honest about transport failures.

use crate::checkpoint::model::FailureDetail;
use crate::stage::RunContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure description sent to the advisory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorRequest {
    pub run_id: String,
    pub stage: String,
    pub failure: FailureDetail,
    /// Relevant shared context at the time of failure.
    pub context: RunContext,
}

/// Directive returned by the advisory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum AdvisorDirective {
    /// Treat the stage as succeeded with this result.
    Substitute { result: serde_json::Value },
    /// Re-execute the stage.
    Retry,
    /// Skip the stage.
    Skip,
    /// The service had nothing usable to offer.
    NoDirective,
}

/// One request/response consultation. Must be idempotent: calling twice
/// with the same input yields the same directive.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn consult(&self, request: &AdvisorRequest) -> Result<AdvisorDirective>;
}

/// Advisor that never has a directive; used when no endpoint is
/// configured.
pub struct NullAdvisor;

#[async_trait]
impl Advisor for NullAdvisor {
    async fn consult(&self, _request: &AdvisorRequest) -> Result<AdvisorDirective> {
        Ok(AdvisorDirective::NoDirective)
    }
}

/// HTTP-backed advisor: POSTs the failure description as JSON and parses
/// the directive from the response body.
pub struct HttpAdvisor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAdvisor {
    /// `timeout` caps the whole request on the client side as well; the
    /// supervisor applies its own bound on top.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build advisor HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn consult(&self, request: &AdvisorRequest) -> Result<AdvisorDirective> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Advisor request to {} failed", self.endpoint))?;

        let response = response
            .error_for_status()
            .with_context(|| format!("Advisor at {} returned an error status", self.endpoint))?;

        response
            .json::<AdvisorDirective>()
            .await
            .context("Failed to parse advisor directive")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::model::FailureKind;
    use serde_json::json;

    #[tokio::test]
    async fn null_advisor_returns_no_directive() {
        let advisor = NullAdvisor;
        let request = AdvisorRequest {
            run_id: "run-1".into(),
            stage: "build".into(),
            failure: FailureDetail::new(FailureKind::Transient, "boom"),
            context: RunContext::new(),
        };
        assert_eq!(
            advisor.consult(&request).await.unwrap(),
            AdvisorDirective::NoDirective
        );
    }

    #[test]
    fn directive_wire_format() {
        let raw = r#"{"directive": "substitute", "result": {"verdict": "approve"}}"#;
        let directive: AdvisorDirective = serde_json::from_str(raw).unwrap();
        assert_eq!(
            directive,
            AdvisorDirective::Substitute {
                result: json!({"verdict": "approve"})
            }
        );

        let raw = r#"{"directive": "no_directive"}"#;
        let directive: AdvisorDirective = serde_json::from_str(raw).unwrap();
        assert_eq!(directive, AdvisorDirective::NoDirective);

        let raw = r#"{"directive": "retry"}"#;
        assert_eq!(
            serde_json::from_str::<AdvisorDirective>(raw).unwrap(),
            AdvisorDirective::Retry
        );
    }

    #[test]
    fn request_serializes_with_failure_detail() {
        let request = AdvisorRequest {
            run_id: "run-1".into(),
            stage: "review".into(),
            failure: FailureDetail::new(
                FailureKind::MissingField {
                    field: "verdict".into(),
                },
                "missing verdict",
            ),
            context: RunContext::new(),
        };
        let raw = serde_json::to_value(&request).unwrap();
        assert_eq!(raw["stage"], json!("review"));
        assert_eq!(raw["failure"]["kind"]["type"], json!("missing_field"));
    }
}
