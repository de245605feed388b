//! Fundamental types shared across the engine.
//!
//! Defines the request/vote/consensus data model: a prompt is bounced off
//! several providers, each produces a [`Vote`], and the consensus engine
//! aggregates the votes into a single [`Consensus`].

use crate::error::VoteFailure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Difficulty/criticality of a request. Influences provider selection,
/// deadlines, and confidence thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskTier {
    Basic,
    Premium,
    Critical,
}

impl TaskTier {
    /// Parse from the wire representation ("basic" | "premium" | "critical").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(TaskTier::Basic),
            "premium" => Some(TaskTier::Premium),
            "critical" => Some(TaskTier::Critical),
            _ => None,
        }
    }

    /// The next tier up, if any. `Critical` has nowhere to escalate to.
    pub fn escalated(self) -> Option<Self> {
        match self {
            TaskTier::Basic => Some(TaskTier::Premium),
            TaskTier::Premium => Some(TaskTier::Critical),
            TaskTier::Critical => None,
        }
    }

    /// Global per-request deadline for this tier.
    pub fn global_deadline(self) -> Duration {
        match self {
            TaskTier::Basic => Duration::from_secs(30),
            TaskTier::Premium => Duration::from_secs(60),
            TaskTier::Critical => Duration::from_secs(120),
        }
    }

    /// Minimum providers consulted when the caller does not say.
    pub fn default_min_providers(self) -> usize {
        match self {
            TaskTier::Basic => 2,
            TaskTier::Premium => 3,
            TaskTier::Critical => 4,
        }
    }

    /// Confidence below which the orchestrator escalates.
    pub fn default_confidence_threshold(self) -> f64 {
        match self {
            TaskTier::Basic => 0.7,
            TaskTier::Premium => 0.8,
            TaskTier::Critical => 0.9,
        }
    }
}

impl std::fmt::Display for TaskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskTier::Basic => write!(f, "basic"),
            TaskTier::Premium => write!(f, "premium"),
            TaskTier::Critical => write!(f, "critical"),
        }
    }
}

/// Dispatch strategy for provider invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceMode {
    /// All selected providers are invoked concurrently.
    Parallel,
    /// Providers are invoked one by one, each seeing a digest of prior votes.
    Sequential,
}

impl BounceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parallel" => Some(BounceMode::Parallel),
            "sequential" => Some(BounceMode::Sequential),
            _ => None,
        }
    }
}

impl std::fmt::Display for BounceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BounceMode::Parallel => write!(f, "parallel"),
            BounceMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// Token usage for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One tool invocation proposed by the caller alongside a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub label: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub risk: crate::tools::Risk,
}

/// Tool plan attached to a request: the governance context plus the
/// invocations the caller wants executed before the provider round.
#[derive(Debug, Clone)]
pub struct ToolPlan {
    pub context: crate::tools::ToolContext,
    pub invocations: Vec<ToolInvocation>,
}

/// An analysis request. Immutable once `analyze` begins.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub task_tier: TaskTier,
    pub mode: BounceMode,
    /// Number of sequential steps, in `[3..=5]`. Unused in parallel mode.
    pub depth: u8,
    pub min_providers: usize,
    pub max_providers: Option<usize>,
    pub confidence_threshold: f64,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub tool_plan: Option<ToolPlan>,
}

impl AnalysisRequest {
    /// A request with tier-dependent defaults for everything but the prompt.
    pub fn new(prompt: impl Into<String>, task_tier: TaskTier) -> Self {
        Self {
            prompt: prompt.into(),
            task_tier,
            mode: BounceMode::Parallel,
            depth: 3,
            min_providers: task_tier.default_min_providers(),
            max_providers: None,
            confidence_threshold: task_tier.default_confidence_threshold(),
            session_id: None,
            user_id: None,
            tool_plan: None,
        }
    }

    pub fn with_mode(mut self, mode: BounceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_min_providers(mut self, min: usize) -> Self {
        self.min_providers = min;
        self
    }

    pub fn with_max_providers(mut self, max: usize) -> Self {
        self.max_providers = Some(max);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_tool_plan(mut self, plan: ToolPlan) -> Self {
        self.tool_plan = Some(plan);
        self
    }

    /// Check the caller-controlled fields. Runs before any provider call.
    pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
        use crate::error::ValidationError;
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::MissingPrompt);
        }
        if self.mode == BounceMode::Sequential && !(3..=5).contains(&self.depth) {
            return Err(ValidationError::InvalidDepth { depth: self.depth });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ValidationError::InvalidConfidenceThreshold {
                value: self.confidence_threshold,
            });
        }
        Ok(())
    }
}

/// One provider's answer to a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub provider_name: String,
    pub vendor: String,
    pub model: String,
    pub content: String,
    /// In `[0, 1]`. Always 0 when `error` is set.
    pub confidence: f64,
    pub reasoning: String,
    pub cost_usd: f64,
    pub tokens: TokenUsage,
    pub latency_ms: u64,
    /// Mean similarity to the other valid votes. Filled by the consensus
    /// engine after collection; 0 until then and for error votes.
    pub agreement_score: f64,
    pub error: Option<VoteFailure>,
}

impl Vote {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// An error vote for a provider that failed to answer.
    pub fn failed(
        provider_name: impl Into<String>,
        vendor: impl Into<String>,
        model: impl Into<String>,
        failure: VoteFailure,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            vendor: vendor.into(),
            model: model.into(),
            content: String::new(),
            confidence: 0.0,
            reasoning: failure.to_string(),
            cost_usd: 0.0,
            tokens: TokenUsage::default(),
            latency_ms,
            agreement_score: 0.0,
            error: Some(failure),
        }
    }
}

/// Reported consensus quality. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    High,
    Medium,
    Low,
}

/// The orchestrator's single aggregated answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    pub content: String,
    /// The winner's composite score, clamped to `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    /// Valid (non-error) votes, in collection order.
    pub contributing_votes: Vec<Vote>,
    /// Every vote collected, error votes included. Debug surface.
    pub all_votes: Vec<Vote>,
    pub quality: QualityBand,
    pub tier_escalated: bool,
    pub providers_used: BTreeSet<String>,
    pub total_cost_usd: f64,
    pub total_latency_ms: u64,
    /// True iff at least two distinct vendors produced non-error votes.
    pub wall_bounce_verified: bool,
}
