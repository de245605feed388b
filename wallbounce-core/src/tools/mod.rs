//! Tool-use governance: configuration, approval, and execution.
//!
//! Three cooperating pieces gate every external tool call:
//! 1. [`ToolConfigManager`] decides which tools a request may see at all
//!    (cost and security tiers, budget).
//! 2. [`ApprovalManager`] risk-grades each proposed invocation and either
//!    auto-approves it or parks it for a human decision.
//! 3. [`ToolExecutionService`] runs approved invocations and records the
//!    outcome; it refuses anything without a live approval.

pub mod approval;
pub mod config;
pub mod execution;

pub use approval::{ApprovalManager, ApprovalRequest, ApprovalState, ApprovalStats, AuditRecord};
pub use config::{ToolConfigManager, ToolContext};
pub use execution::{StaticToolBackend, ToolBackend, ToolExecutionResult, ToolExecutionService};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Price class of a tool, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Free,
    Standard,
    Premium,
}

impl CostTier {
    /// Weight used by the projected-cost estimator.
    pub fn weight(self) -> f64 {
        match self {
            CostTier::Free => 0.0,
            CostTier::Standard => 1.0,
            CostTier::Premium => 5.0,
        }
    }
}

/// Sensitivity class of a tool, most public first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityTier {
    Public,
    Internal,
    Sensitive,
    Critical,
}

/// Per-tool approval rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    /// Low-risk operations auto-approve.
    Never,
    /// A caller-supplied predicate decides.
    Conditional,
    /// Every operation waits for a human.
    Always,
}

/// Risk grade of one proposed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Risk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Risk::Low => write!(f, "low"),
            Risk::Medium => write!(f, "medium"),
            Risk::High => write!(f, "high"),
            Risk::Critical => write!(f, "critical"),
        }
    }
}

/// Static description of one external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub label: String,
    pub transport_url: String,
    pub auth_token: Option<String>,
    pub cost_tier: CostTier,
    pub security_tier: SecurityTier,
    pub allowed_operations: BTreeSet<String>,
    pub approval_policy: ApprovalPolicy,
}

impl ToolDescriptor {
    pub fn allows(&self, operation: &str) -> bool {
        self.allowed_operations.contains(operation)
    }
}
