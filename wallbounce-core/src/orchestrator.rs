//! Wall-bounce orchestrator — drives providers, consensus, and tools.
//!
//! One `analyze` call: resolve providers, bounce the prompt off them
//! (concurrently or as a sequential chain), cross-score the votes, and
//! return the consensus. When consensus confidence misses the caller's
//! threshold the analysis re-runs once at the next tier with a wider
//! quorum. Provider and tool failures degrade into error votes and failed
//! outcomes; the request itself only fails on validation, an empty
//! registry, an all-error round with no escalation left, or cancellation.

use crate::config::EngineConfig;
use crate::consensus::build_consensus;
use crate::error::EngineError;
use crate::metrics::MetricsSurface;
use crate::provider::{InvokeOptions, ProviderAdapter};
use crate::registry::ProviderRegistry;
use crate::tools::{ApprovalManager, ToolConfigManager, ToolExecutionService};
use crate::trace::{FlowActor, FlowRecorder, FlowTrace};
use crate::types::{AnalysisRequest, BounceMode, Consensus, TaskTier, ToolPlan, Vote};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Slack between the per-call deadlines and the whole-request cap, so
/// provider timeouts always resolve into error votes first.
const GLOBAL_DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// The tool governance stack handed to the orchestrator at start-up.
pub struct ToolSuite {
    pub manager: ToolConfigManager,
    pub approvals: Arc<ApprovalManager>,
    pub execution: ToolExecutionService,
}

/// Decrements the active-requests gauge on every exit path.
struct ActiveGuard<'a>(&'a MetricsSurface);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.dec_active_requests();
    }
}

/// Owns the request lifecycle; everything else is
/// injected.
pub struct WallBounceOrchestrator {
    registry: Arc<ProviderRegistry>,
    config: EngineConfig,
    metrics: Arc<MetricsSurface>,
    admission: Arc<Semaphore>,
    tools: Option<ToolSuite>,
}

impl WallBounceOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        config: EngineConfig,
        metrics: Arc<MetricsSurface>,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_requests));
        Self {
            registry,
            config,
            metrics,
            admission,
            tools: None,
        }
    }

    /// Attach the tool governance stack.
    pub fn with_tools(mut self, tools: ToolSuite) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Analyze a prompt and return the consensus.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<Consensus, EngineError> {
        self.analyze_traced(request, CancellationToken::new())
            .await
            .map(|(consensus, _)| consensus)
    }

    /// Analyze with an externally controlled cancellation token, returning
    /// the flow trace alongside the consensus.
    pub async fn analyze_traced(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> Result<(Consensus, FlowTrace), EngineError> {
        request.validate()?;

        // Admission control: queue briefly, then shed load.
        let _permit = match tokio::time::timeout(
            self.config.admission_wait(),
            Arc::clone(&self.admission).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                self.metrics.record_error("orchestrator", "overloaded");
                return Err(EngineError::Overloaded);
            }
        };

        let tier = request.task_tier;
        self.metrics.record_request(&tier.to_string());
        self.metrics.inc_active_requests();
        let _active = ActiveGuard(&self.metrics);

        let trace = FlowRecorder::new();
        trace.record(
            FlowActor::Orchestrator,
            "request_started",
            json!({
                "tier": tier.to_string(),
                "mode": request.mode.to_string(),
                "min_providers": request.min_providers,
            }),
        );
        let start = Instant::now();

        // Hard wall-clock cap on the whole work phase: the first round's
        // deadline plus the escalated round's, with grace so the per-call
        // deadlines always fire first. Provider rounds are bounded by
        // those per-call deadlines; this trips only when something
        // outside them stalls, e.g. a hung tool backend.
        let hard_cap = self.config.tier_deadline(tier)
            + tier
                .escalated()
                .map(|next| self.config.tier_deadline(next))
                .unwrap_or(Duration::ZERO)
            + GLOBAL_DEADLINE_GRACE;

        let work = self.run_request(&request, &cancel, &trace);
        let (mut consensus, escalated) = match tokio::time::timeout(hard_cap, work).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                cancel.cancel();
                self.metrics.record_error("orchestrator", "deadline");
                warn!(deadline_ms = hard_cap.as_millis() as u64, "global deadline exceeded");
                return Err(EngineError::DeadlineExceeded {
                    deadline_ms: hard_cap.as_millis() as u64,
                });
            }
        };

        consensus.tier_escalated = escalated;
        consensus.total_latency_ms = start.elapsed().as_millis() as u64;

        self.metrics.observe_confidence(consensus.confidence);
        self.metrics
            .observe_request_latency(consensus.total_latency_ms);
        self.metrics
            .observe_cost(&tier.to_string(), consensus.total_cost_usd);
        trace.record(
            FlowActor::Orchestrator,
            "consensus_built",
            json!({
                "confidence": consensus.confidence,
                "providers": consensus.providers_used,
                "escalated": escalated,
            }),
        );
        info!(
            confidence = consensus.confidence,
            providers = consensus.providers_used.len(),
            escalated,
            latency_ms = consensus.total_latency_ms,
            "analysis complete"
        );

        Ok((consensus, trace.into_trace()))
    }

    /// Tool path plus the provider rounds, with at most one escalation.
    async fn run_request(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
        trace: &FlowRecorder,
    ) -> Result<(Consensus, bool), EngineError> {
        let tier = request.task_tier;

        // Tool path runs before the provider rounds; outputs join the
        // prompt context under the byte cap.
        let mut prompt_text = request.prompt.clone();
        if let Some(plan) = &request.tool_plan {
            if let Some(context_block) = self.run_tool_path(plan, trace).await {
                prompt_text.push_str("\n\nTool context:\n");
                prompt_text.push_str(&context_block);
            }
        }

        let first = self
            .run_round(
                tier,
                request.min_providers,
                request,
                &prompt_text,
                cancel,
                trace,
            )
            .await;

        // At most one escalation per request: a low-confidence (or
        // all-error) round retries once at the next tier with a wider
        // quorum.
        match first {
            Ok(consensus)
                if consensus.confidence < request.confidence_threshold
                    && tier.escalated().is_some() =>
            {
                let next = tier.escalated().expect("checked above");
                info!(
                    confidence = consensus.confidence,
                    threshold = request.confidence_threshold,
                    from = %tier,
                    to = %next,
                    "escalating tier"
                );
                trace.record(
                    FlowActor::Orchestrator,
                    "tier_escalated",
                    json!({"from": tier.to_string(), "to": next.to_string()}),
                );
                match self
                    .run_round(
                        next,
                        request.min_providers + 1,
                        request,
                        &prompt_text,
                        cancel,
                        trace,
                    )
                    .await
                {
                    Ok(second) if second.confidence > consensus.confidence => Ok((second, true)),
                    Ok(_) | Err(_) => Ok((consensus, true)),
                }
            }
            Ok(consensus) => Ok((consensus, false)),
            Err(EngineError::AllProvidersFailed) if tier.escalated().is_some() => {
                let next = tier.escalated().expect("checked above");
                warn!(from = %tier, to = %next, "all providers failed, escalating tier");
                trace.record(
                    FlowActor::Orchestrator,
                    "tier_escalated",
                    json!({"from": tier.to_string(), "to": next.to_string()}),
                );
                let second = self
                    .run_round(
                        next,
                        request.min_providers + 1,
                        request,
                        &prompt_text,
                        cancel,
                        trace,
                    )
                    .await?;
                Ok((second, true))
            }
            Err(e) => Err(e),
        }
    }

    /// One provider round at one tier: select, dispatch, score.
    async fn run_round(
        &self,
        tier: TaskTier,
        min_providers: usize,
        request: &AnalysisRequest,
        prompt_text: &str,
        cancel: &CancellationToken,
        trace: &FlowRecorder,
    ) -> Result<Consensus, EngineError> {
        let mut providers = self.registry.providers_for(tier, min_providers)?;
        if providers.is_empty() {
            return Err(EngineError::NoProvidersAvailable {
                tier: tier.to_string(),
            });
        }
        if let Some(max) = request.max_providers {
            providers.truncate(max.max(1));
        }

        let global_deadline = self.config.tier_deadline(tier);
        let votes = match request.mode {
            BounceMode::Parallel => {
                self.dispatch_parallel(&providers, tier, prompt_text, global_deadline, cancel, trace)
                    .await
            }
            BounceMode::Sequential => {
                self.dispatch_sequential(
                    &providers,
                    tier,
                    prompt_text,
                    request.depth,
                    global_deadline,
                    cancel,
                    trace,
                )
                .await
            }
        };

        for vote in &votes {
            self.registry
                .record_outcome(&vote.provider_name, vote.is_valid());
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        build_consensus(votes, false).map_err(|e| match e {
            EngineError::NoValidVotes => EngineError::AllProvidersFailed,
            other => other,
        })
    }

    /// Fan out to every provider concurrently; collect votes in
    /// completion order under a shared deadline.
    async fn dispatch_parallel(
        &self,
        providers: &[Arc<ProviderAdapter>],
        tier: TaskTier,
        prompt_text: &str,
        global_deadline: Duration,
        cancel: &CancellationToken,
        trace: &FlowRecorder,
    ) -> Vec<Vote> {
        let toolset = self.toolset_reference();
        let mut in_flight = FuturesUnordered::new();
        for adapter in providers {
            let adapter = Arc::clone(adapter);
            let per_call = global_deadline.min(self.provider_timeout(&adapter));
            let options = InvokeOptions {
                tier,
                timeout: per_call,
                cancel: cancel.child_token(),
                toolset: toolset.clone(),
            };
            in_flight.push(async move { adapter.invoke(prompt_text, &options, trace).await });
        }

        let mut votes = Vec::with_capacity(providers.len());
        while let Some(vote) = in_flight.next().await {
            votes.push(vote);
        }
        votes
    }

    /// Invoke providers one at a time for `depth` steps; each step sees
    /// the original prompt plus a digest of the votes so far. Providers
    /// repeat round-robin when the pool is smaller than the depth.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_sequential(
        &self,
        providers: &[Arc<ProviderAdapter>],
        tier: TaskTier,
        prompt_text: &str,
        depth: u8,
        global_deadline: Duration,
        cancel: &CancellationToken,
        trace: &FlowRecorder,
    ) -> Vec<Vote> {
        let toolset = self.toolset_reference();
        let round_start = Instant::now();
        let mut votes: Vec<Vote> = Vec::with_capacity(depth as usize);

        for step in 0..depth as usize {
            let adapter = &providers[step % providers.len()];
            let remaining = global_deadline
                .checked_sub(round_start.elapsed())
                .unwrap_or(Duration::ZERO);
            let per_call = remaining.min(self.provider_timeout(adapter));
            let options = InvokeOptions {
                tier,
                timeout: per_call,
                cancel: cancel.child_token(),
                toolset: toolset.clone(),
            };

            let text = if votes.is_empty() {
                prompt_text.to_string()
            } else {
                format!("{prompt_text}\n\n{}", vote_digest(&votes))
            };
            debug!(step, provider = adapter.name(), "sequential step");
            let vote = adapter.invoke(&text, &options, trace).await;
            votes.push(vote);

            if cancel.is_cancelled() {
                break;
            }
        }
        votes
    }

    /// Per-call deadline for a provider, falling back to the configured
    /// default when the descriptor leaves its timeout at zero.
    fn provider_timeout(&self, adapter: &ProviderAdapter) -> Duration {
        let configured = adapter.descriptor().timeout();
        if configured.is_zero() {
            self.config.default_call_deadline()
        } else {
            configured
        }
    }

    fn toolset_reference(&self) -> Option<String> {
        self.tools.as_ref().map(|_| "wallbounce".to_string())
    }

    /// Run the caller's tool plan through config, approval, and execution
    /// context block. Failures become failed outcomes in the trace; the
    /// request proceeds regardless.
    async fn run_tool_path(&self, plan: &ToolPlan, trace: &FlowRecorder) -> Option<String> {
        let suite = self.tools.as_ref()?;
        let allowed = suite.manager.tools_for(&plan.context);
        trace.record(
            FlowActor::Tool,
            "toolset_resolved",
            json!({"allowed": allowed.iter().map(|t| t.label.clone()).collect::<Vec<_>>()}),
        );

        let mut outputs: Vec<String> = Vec::new();
        for invocation in &plan.invocations {
            let Some(tool) = allowed.iter().find(|t| t.label == invocation.label) else {
                trace.record(
                    FlowActor::Tool,
                    "tool_filtered",
                    json!({"label": invocation.label}),
                );
                continue;
            };

            let approval_id = suite.approvals.request(
                tool,
                &invocation.operation,
                invocation.parameters.clone(),
                invocation.risk,
                "orchestrator",
            );
            let state = suite
                .approvals
                .get(approval_id)
                .map(|r| r.state)
                .expect("request just filed");
            trace.record(
                FlowActor::Approval,
                state.as_str(),
                json!({"label": invocation.label, "operation": invocation.operation}),
            );
            if !state.is_approving() {
                continue;
            }

            match suite
                .execution
                .execute(tool, &invocation.operation, &invocation.parameters, approval_id)
                .await
            {
                Ok(result) if result.success => {
                    trace.record(
                        FlowActor::Tool,
                        "tool_executed",
                        json!({"label": result.tool_label, "latency_ms": result.latency_ms}),
                    );
                    outputs.push(format!(
                        "[{}:{}] {}",
                        result.tool_label, result.operation, result.output
                    ));
                }
                Ok(result) => {
                    trace.record(
                        FlowActor::Tool,
                        "tool_failed",
                        json!({"label": result.tool_label, "error": result.error}),
                    );
                }
                Err(e) => {
                    warn!(label = %invocation.label, error = %e, "tool execution refused");
                    trace.record(
                        FlowActor::Tool,
                        "tool_rejected",
                        json!({"label": invocation.label, "code": e.code()}),
                    );
                }
            }
        }

        // Byte cap on the assembled context: drop oldest outputs first.
        let cap = self.config.tool_context_byte_cap;
        let mut total: usize = outputs.iter().map(String::len).sum();
        while total > cap && !outputs.is_empty() {
            let dropped = outputs.remove(0);
            total -= dropped.len();
            trace.record(
                FlowActor::Tool,
                "context_truncated",
                json!({"dropped_bytes": dropped.len()}),
            );
        }

        if outputs.is_empty() {
            None
        } else {
            Some(outputs.join("\n"))
        }
    }
}

/// Compact digest of prior votes for sequential steps: provider,
/// confidence, and the first 280 characters of the answer.
fn vote_digest(votes: &[Vote]) -> String {
    let mut out = String::from("Earlier answers:\n");
    for vote in votes.iter().filter(|v| v.is_valid()) {
        let content: String = vote.content.chars().take(280).collect();
        out.push_str(&format!(
            "- {} (confidence {:.2}): {}\n",
            vote.provider_name, vote.confidence, content
        ));
    }
    out
}
