//! Provider adapters — the uniform invocation surface over LLM backends.
//!
//! A [`ProviderBackend`] is one opaque capability: text in, completion
//! out, bound to exactly one transport. The [`ProviderAdapter`] wraps a
//! backend with its descriptor and the metrics surface and upholds the
//! adapter contract: `invoke` returns exactly one [`Vote`], converting
//! every failure (backend error, deadline, cancellation) into an error
//! vote with zero confidence instead of propagating it.

use crate::error::VoteFailure;
use crate::metrics::MetricsSurface;
use crate::trace::{FlowActor, FlowRecorder};
use crate::types::{TaskTier, TokenUsage, Vote};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a provider is reached. Exactly one transport may be registered per
/// `(vendor, model)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Subprocess invocation: prompt on stdin, JSON completion on stdout.
    Cli,
    /// JSON-RPC tool server over a persistent connection.
    Mcp,
    /// Direct vendor SDK/REST call.
    SdkDirect,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Cli => write!(f, "cli"),
            Transport::Mcp => write!(f, "mcp"),
            Transport::SdkDirect => write!(f, "sdk-direct"),
        }
    }
}

/// Static description of one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique registry name, e.g. `"gpt5-sdk"`.
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub transport: Transport,
    pub cost_per_input_token: f64,
    pub cost_per_output_token: f64,
    pub supported_tiers: Vec<TaskTier>,
    /// Relative answer quality, higher is better. Drives critical-tier
    /// ranking.
    pub quality_rank: u8,
    /// Per-call timeout configured for this provider.
    pub timeout_ms: u64,
}

impl ProviderDescriptor {
    pub fn supports(&self, tier: TaskTier) -> bool {
        self.supported_tiers.contains(&tier)
    }

    /// Single cost figure used for ranking and tie-breaks. Output tokens
    /// dominate in practice, so they weigh heavier.
    pub fn blended_cost(&self) -> f64 {
        self.cost_per_input_token + 3.0 * self.cost_per_output_token
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-call options carried into a backend.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub tier: TaskTier,
    /// Per-call deadline: min(global remaining, provider timeout).
    pub timeout: Duration,
    pub cancel: CancellationToken,
    /// Opaque toolset reference, forwarded to backends that understand it.
    pub toolset: Option<String>,
}

impl InvokeOptions {
    pub fn new(tier: TaskTier, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            tier,
            timeout,
            cancel,
            toolset: None,
        }
    }
}

/// What a transport hands back on success.
#[derive(Debug, Clone, Default)]
pub struct BackendResponse {
    pub content: String,
    /// Backend-supplied confidence, if the transport carries one.
    pub confidence: Option<f64>,
    pub usage: TokenUsage,
}

/// Transport-level failure. Converted to a [`VoteFailure`] by the adapter;
/// never crosses the orchestrator boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("malformed completion: {message}")]
    Malformed { message: String },
}

impl BackendError {
    fn into_vote_failure(self) -> VoteFailure {
        match self {
            BackendError::Transport { message } => VoteFailure::Backend { message },
            BackendError::Malformed { message } => VoteFailure::InvalidResponse { message },
        }
    }
}

/// One opaque completion capability. Implemented per transport.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    async fn complete(
        &self,
        text: &str,
        options: &InvokeOptions,
    ) -> Result<BackendResponse, BackendError>;
}

// ---------------------------------------------------------------------------
// Confidence heuristic
// ---------------------------------------------------------------------------

/// Answers shorter than this read as non-answers.
const MIN_ANSWER_LEN: usize = 40;

const REFUSAL_PHRASES: &[&str] = &[
    "i cannot help",
    "i can't help",
    "i'm unable to",
    "i am unable to",
    "i cannot assist",
    "as an ai",
];

const DISCLAIMER_OPENERS: &[&str] = &["disclaimer:", "note: this is not", "i am not a"];

/// Confidence estimate for backends that do not report one. Starts at 0.8
/// and loses 0.1 per weakness signal, clamped to `[0.1, 0.95]`.
pub fn heuristic_confidence(content: &str) -> f64 {
    let trimmed = content.trim();
    let lower = trimmed.to_lowercase();
    let mut confidence: f64 = 0.8;

    if trimmed.is_empty() {
        confidence -= 0.1;
    }
    if REFUSAL_PHRASES.iter().any(|p| lower.contains(p)) {
        confidence -= 0.1;
    }
    if !trimmed.is_empty() && trimmed.len() < MIN_ANSWER_LEN {
        confidence -= 0.1;
    }
    if DISCLAIMER_OPENERS.iter().any(|p| lower.starts_with(p)) {
        confidence -= 0.1;
    }

    confidence.clamp(0.1, 0.95)
}

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Uniform invoker for one registered provider.
pub struct ProviderAdapter {
    descriptor: ProviderDescriptor,
    backend: Arc<dyn ProviderBackend>,
    metrics: Arc<MetricsSurface>,
}

impl ProviderAdapter {
    pub fn new(
        descriptor: ProviderDescriptor,
        backend: Arc<dyn ProviderBackend>,
        metrics: Arc<MetricsSurface>,
    ) -> Self {
        Self {
            descriptor,
            backend,
            metrics,
        }
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Invoke the backend, producing exactly one vote. Failures of any
    /// kind become error votes with `confidence = 0`.
    pub async fn invoke(
        &self,
        text: &str,
        options: &InvokeOptions,
        trace: &FlowRecorder,
    ) -> Vote {
        let start = Instant::now();
        let deadline_ms = options.timeout.as_millis() as u64;

        let outcome = tokio::select! {
            _ = options.cancel.cancelled() => Err(VoteFailure::Cancelled),
            completed = tokio::time::timeout(options.timeout, self.backend.complete(text, options)) => {
                match completed {
                    Err(_) => Err(VoteFailure::Timeout { deadline_ms }),
                    Ok(Err(e)) => Err(e.into_vote_failure()),
                    Ok(Ok(response)) => Ok(response),
                }
            }
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                let confidence = response
                    .confidence
                    .map(|c| c.clamp(0.0, 1.0))
                    .unwrap_or_else(|| heuristic_confidence(&response.content));
                let cost_usd = response.usage.input_tokens as f64
                    * self.descriptor.cost_per_input_token
                    + response.usage.output_tokens as f64 * self.descriptor.cost_per_output_token;

                self.metrics.record_vote(
                    &self.descriptor.name,
                    &self.descriptor.vendor,
                    &options.tier.to_string(),
                );
                self.metrics.record_tokens(
                    &self.descriptor.name,
                    response.usage.input_tokens,
                    response.usage.output_tokens,
                );
                self.metrics
                    .observe_provider_latency(&self.descriptor.name, latency_ms);
                trace.record(
                    FlowActor::Provider,
                    "vote_collected",
                    json!({
                        "provider": self.descriptor.name,
                        "latency_ms": latency_ms,
                        "confidence": confidence,
                    }),
                );
                debug!(
                    provider = %self.descriptor.name,
                    latency_ms,
                    confidence,
                    "vote collected"
                );

                Vote {
                    provider_name: self.descriptor.name.clone(),
                    vendor: self.descriptor.vendor.clone(),
                    model: self.descriptor.model.clone(),
                    content: response.content,
                    confidence,
                    reasoning: format!(
                        "{} via {} transport",
                        self.descriptor.model, self.descriptor.transport
                    ),
                    cost_usd,
                    tokens: response.usage,
                    latency_ms,
                    agreement_score: 0.0,
                    error: None,
                }
            }
            Err(failure) => {
                // Cancelled work is discarded: it only bumps the cancelled
                // counter, never the error families.
                if failure == VoteFailure::Cancelled {
                    self.metrics.record_cancelled();
                } else {
                    self.metrics
                        .record_error(&self.descriptor.name, failure.kind());
                }
                trace.record(
                    FlowActor::Provider,
                    "vote_failed",
                    json!({
                        "provider": self.descriptor.name,
                        "kind": failure.kind(),
                        "latency_ms": latency_ms,
                    }),
                );
                warn!(
                    provider = %self.descriptor.name,
                    kind = failure.kind(),
                    latency_ms,
                    "provider call failed"
                );

                Vote::failed(
                    &self.descriptor.name,
                    &self.descriptor.vendor,
                    &self.descriptor.model,
                    failure,
                    latency_ms,
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// A scripted reply for [`MockBackend`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Text {
        content: String,
        confidence: Option<f64>,
    },
    Failure {
        message: String,
    },
    Delayed {
        content: String,
        confidence: Option<f64>,
        delay: Duration,
    },
}

/// An in-process backend for tests, the CLI's offline mode, and local
/// development. Queued replies are consumed first; the fallback reply
/// answers every call after the queue drains.
pub struct MockBackend {
    queued: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
}

impl MockBackend {
    /// Always answer with the given text and confidence.
    pub fn with_text(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: MockReply::Text {
                content: content.into(),
                confidence: Some(confidence),
            },
        }
    }

    /// Always answer with the given text, leaving confidence to the
    /// adapter's heuristic.
    pub fn with_unscored_text(content: impl Into<String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: MockReply::Text {
                content: content.into(),
                confidence: None,
            },
        }
    }

    /// Always fail with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: MockReply::Failure {
                message: message.into(),
            },
        }
    }

    /// Always answer after the given delay. Pairs with short per-call
    /// deadlines to exercise timeout paths.
    pub fn delayed(content: impl Into<String>, confidence: f64, delay: Duration) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: MockReply::Delayed {
                content: content.into(),
                confidence: Some(confidence),
                delay,
            },
        }
    }

    /// Queue a one-shot reply consumed before the fallback.
    pub fn queue(&self, reply: MockReply) {
        self.queued.lock().expect("mock queue poisoned").push_back(reply);
    }

    fn next_reply(&self) -> MockReply {
        self.queued
            .lock()
            .expect("mock queue poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    async fn complete(
        &self,
        text: &str,
        _options: &InvokeOptions,
    ) -> Result<BackendResponse, BackendError> {
        let reply = self.next_reply();
        let (content, confidence) = match reply {
            MockReply::Text {
                content,
                confidence,
            } => (content, confidence),
            MockReply::Failure { message } => {
                return Err(BackendError::Transport { message });
            }
            MockReply::Delayed {
                content,
                confidence,
                delay,
            } => {
                tokio::time::sleep(delay).await;
                (content, confidence)
            }
        };

        // ~4 chars per token, the usual rough estimate.
        let usage = TokenUsage {
            input_tokens: (text.len() / 4) as u64,
            output_tokens: (content.len() / 4) as u64,
        };
        Ok(BackendResponse {
            content,
            confidence,
            usage,
        })
    }
}
