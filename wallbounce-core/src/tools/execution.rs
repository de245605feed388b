//! Tool execution service — runs approved invocations.
//!
//! Execution requires a live approval: the referenced request must be in
//! an approving terminal state and match the `(tool_label, operation)`
//! pair being run. Precondition violations fail fast; backend failures
//! are captured into the result record and never propagate.

use super::approval::ApprovalManager;
use super::ToolDescriptor;
use crate::error::ToolError;
use crate::metrics::MetricsSurface;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub request_id: Uuid,
    pub tool_label: String,
    pub operation: String,
    pub success: bool,
    pub output: Value,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// The opaque backend a tool call runs against.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn run(
        &self,
        tool: &ToolDescriptor,
        operation: &str,
        parameters: &Value,
    ) -> Result<Value, String>;
}

/// Executes approved tool invocations and records outcomes.
pub struct ToolExecutionService {
    approvals: Arc<ApprovalManager>,
    backend: Arc<dyn ToolBackend>,
    metrics: Arc<MetricsSurface>,
}

impl ToolExecutionService {
    pub fn new(
        approvals: Arc<ApprovalManager>,
        backend: Arc<dyn ToolBackend>,
        metrics: Arc<MetricsSurface>,
    ) -> Self {
        Self {
            approvals,
            backend,
            metrics,
        }
    }

    /// Run one approved operation. Fails fast when the approval is
    /// missing, unresolved, expired, or bound to a different
    /// `(tool_label, operation)`. Backend failures come back as
    /// `success = false` results.
    pub async fn execute(
        &self,
        tool: &ToolDescriptor,
        operation: &str,
        parameters: &Value,
        approval_id: Uuid,
    ) -> Result<ToolExecutionResult, ToolError> {
        if !tool.allows(operation) {
            return Err(ToolError::OperationNotAllowed {
                label: tool.label.clone(),
                operation: operation.to_string(),
            });
        }

        let Some(approval) = self.approvals.get(approval_id) else {
            return Err(ToolError::NotApproved {
                approval_id,
                reason: "no such approval request".to_string(),
            });
        };
        if !approval.state.is_approving() {
            return Err(ToolError::NotApproved {
                approval_id,
                reason: format!("approval is {}", approval.state.as_str()),
            });
        }
        if approval.tool_label != tool.label || approval.operation != operation {
            return Err(ToolError::NotApproved {
                approval_id,
                reason: format!(
                    "approval covers {}/{}, not {}/{}",
                    approval.tool_label, approval.operation, tool.label, operation
                ),
            });
        }

        let start = Instant::now();
        let outcome = self.backend.run(tool, operation, parameters).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        // Tool pricing is per cost tier; one call spends one weight.
        let cost_usd = tool.cost_tier.weight() * 0.01;

        let result = match outcome {
            Ok(output) => {
                info!(tool = %tool.label, operation, latency_ms, "tool executed");
                ToolExecutionResult {
                    request_id: approval_id,
                    tool_label: tool.label.clone(),
                    operation: operation.to_string(),
                    success: true,
                    output,
                    cost_usd,
                    latency_ms,
                    error: None,
                    executed_at: Utc::now(),
                }
            }
            Err(message) => {
                warn!(tool = %tool.label, operation, error = %message, "tool failed");
                self.metrics.record_error(&tool.label, "tool_backend");
                ToolExecutionResult {
                    request_id: approval_id,
                    tool_label: tool.label.clone(),
                    operation: operation.to_string(),
                    success: false,
                    output: Value::Null,
                    cost_usd,
                    latency_ms,
                    error: Some(message),
                    executed_at: Utc::now(),
                }
            }
        };
        Ok(result)
    }
}

/// A canned backend for tests and offline runs: fixed outputs per
/// `(label, operation)` pair, with optional failure injection.
#[derive(Default)]
pub struct StaticToolBackend {
    outputs: Mutex<HashMap<(String, String), Value>>,
    failures: Mutex<HashMap<(String, String), String>>,
}

impl StaticToolBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(
        self,
        label: impl Into<String>,
        operation: impl Into<String>,
        output: Value,
    ) -> Self {
        self.outputs
            .lock()
            .expect("static backend poisoned")
            .insert((label.into(), operation.into()), output);
        self
    }

    pub fn with_failure(
        self,
        label: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.failures
            .lock()
            .expect("static backend poisoned")
            .insert((label.into(), operation.into()), message.into());
        self
    }
}

#[async_trait]
impl ToolBackend for StaticToolBackend {
    async fn run(
        &self,
        tool: &ToolDescriptor,
        operation: &str,
        _parameters: &Value,
    ) -> Result<Value, String> {
        let key = (tool.label.clone(), operation.to_string());
        if let Some(message) = self.failures.lock().expect("static backend poisoned").get(&key) {
            return Err(message.clone());
        }
        Ok(self
            .outputs
            .lock()
            .expect("static backend poisoned")
            .get(&key)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ApprovalPolicy, CostTier, Risk, SecurityTier};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn tool(policy: ApprovalPolicy) -> ToolDescriptor {
        ToolDescriptor {
            label: "send_email".into(),
            transport_url: "https://mail.example".into(),
            auth_token: None,
            cost_tier: CostTier::Standard,
            security_tier: SecurityTier::Internal,
            allowed_operations: BTreeSet::from(["send".to_string()]),
            approval_policy: policy,
        }
    }

    fn service(ttl_secs: u64) -> (ToolExecutionService, Arc<ApprovalManager>) {
        let metrics = Arc::new(MetricsSurface::new());
        let approvals = Arc::new(ApprovalManager::new(
            Duration::from_secs(ttl_secs),
            Arc::clone(&metrics),
        ));
        let backend = Arc::new(
            StaticToolBackend::new()
                .with_output("send_email", "send", json!({"message_id": "m-1"})),
        );
        (
            ToolExecutionService::new(Arc::clone(&approvals), backend, metrics),
            approvals,
        )
    }

    #[tokio::test]
    async fn test_execute_before_approval_is_rejected() {
        let (service, approvals) = service(1800);
        let tool = tool(ApprovalPolicy::Always);
        let id = approvals.request(&tool, "send", json!({}), Risk::High, "orchestrator");

        let err = service
            .execute(&tool, "send", &json!({}), id)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotApproved { .. }));

        // Approve, then the same execution succeeds.
        assert!(approvals.process(id, true, "sec:alice", None));
        let result = service.execute(&tool, "send", &json!({}), id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["message_id"], "m-1");

        // Audit trail shows pending -> manually_approved.
        let trail = approvals.audit_trail();
        assert_eq!(trail[1].from_state, Some(super::super::ApprovalState::Pending));
        assert_eq!(
            trail[1].to_state,
            super::super::ApprovalState::ManuallyApproved
        );
    }

    #[tokio::test]
    async fn test_execute_with_auto_approval() {
        let (service, approvals) = service(1800);
        let tool = tool(ApprovalPolicy::Never);
        let id = approvals.request(&tool, "send", json!({}), Risk::Low, "orchestrator");
        let result = service.execute(&tool, "send", &json!({}), id).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_execute_unknown_approval_is_rejected() {
        let (service, _approvals) = service(1800);
        let err = service
            .execute(&tool(ApprovalPolicy::Never), "send", &json!({}), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotApproved { .. }));
    }

    #[tokio::test]
    async fn test_execute_expired_approval_is_rejected() {
        let (service, approvals) = service(0);
        let tool = tool(ApprovalPolicy::Always);
        let id = approvals.request(&tool, "send", json!({}), Risk::High, "orchestrator");
        std::thread::sleep(Duration::from_millis(5));

        let err = service
            .execute(&tool, "send", &json!({}), id)
            .await
            .unwrap_err();
        match err {
            ToolError::NotApproved { reason, .. } => assert!(reason.contains("expired")),
            other => panic!("expected NotApproved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_mismatched_operation_is_rejected() {
        let (service, approvals) = service(1800);
        let mut tool = tool(ApprovalPolicy::Never);
        tool.allowed_operations.insert("archive".to_string());
        let id = approvals.request(&tool, "send", json!({}), Risk::Low, "orchestrator");

        // Approved for "send", attempted as "archive".
        let err = service
            .execute(&tool, "archive", &json!({}), id)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotApproved { .. }));
    }

    #[tokio::test]
    async fn test_execute_disallowed_operation_fails_fast() {
        let (service, approvals) = service(1800);
        let tool = tool(ApprovalPolicy::Never);
        let id = approvals.request(&tool, "send", json!({}), Risk::Low, "orchestrator");
        let err = service
            .execute(&tool, "wipe_mailbox", &json!({}), id)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::OperationNotAllowed { .. }));
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_failed_result() {
        let metrics = Arc::new(MetricsSurface::new());
        let approvals = Arc::new(ApprovalManager::new(
            Duration::from_secs(1800),
            Arc::clone(&metrics),
        ));
        let backend = Arc::new(
            StaticToolBackend::new().with_failure("send_email", "send", "smtp unreachable"),
        );
        let service =
            ToolExecutionService::new(Arc::clone(&approvals), backend, Arc::clone(&metrics));

        let tool = tool(ApprovalPolicy::Never);
        let id = approvals.request(&tool, "send", json!({}), Risk::Low, "orchestrator");
        let result = service.execute(&tool, "send", &json!({}), id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("smtp unreachable"));
        assert_eq!(metrics.errors_by_kind("tool_backend"), 1);
    }
}
