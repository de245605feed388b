//! # WallBounce Core
//!
//! Engine for multi-provider LLM consensus ("wall-bounce"): a prompt is
//! bounced off several model providers, the answers are cross-scored, and
//! a single consensus answer comes back with per-provider debug traces.
//! Provides the provider registry and adapters, the consensus engine,
//! tool-use governance (config, approval, execution), the orchestrator,
//! and the shared metrics surface.

pub mod config;
pub mod consensus;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod tools;
pub mod trace;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{EngineConfig, TierDefaults, TierTable};
pub use consensus::{build_consensus, score_agreement, similarity};
pub use error::{ConfigError, EngineError, Result, ToolError, ValidationError, VoteFailure};
pub use metrics::MetricsSurface;
pub use orchestrator::{ToolSuite, WallBounceOrchestrator};
pub use provider::{
    heuristic_confidence, BackendError, BackendResponse, InvokeOptions, MockBackend, MockReply,
    ProviderAdapter, ProviderBackend, ProviderDescriptor, Transport,
};
pub use registry::{CircuitBreaker, CircuitState, ProviderRegistry, ProviderRegistryBuilder};
pub use tools::{
    ApprovalManager, ApprovalPolicy, ApprovalRequest, ApprovalState, ApprovalStats, AuditRecord,
    CostTier, Risk, SecurityTier, StaticToolBackend, ToolBackend, ToolConfigManager, ToolContext,
    ToolDescriptor, ToolExecutionResult, ToolExecutionService,
};
pub use trace::{FlowActor, FlowEvent, FlowRecorder, FlowTrace};
pub use types::{
    AnalysisRequest, BounceMode, Consensus, QualityBand, TaskTier, TokenUsage, ToolInvocation,
    ToolPlan, Vote,
};

pub use tokio_util::sync::CancellationToken;
