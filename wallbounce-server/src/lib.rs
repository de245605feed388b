//! HTTP boundary for the WallBounce engine.
//!
//! Three routes: `POST /api/analyze` runs a consensus analysis, `GET
//! /metrics` serves the Prometheus text exposition, and `GET /healthz`
//! reports liveness. Everything else (sessions, persistence, UI) lives in
//! external collaborators.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::error;
use wallbounce_core::{
    AnalysisRequest, BounceMode, Consensus, EngineError, FlowTrace, MetricsSurface,
    ProviderRegistry, TaskTier, ValidationError, WallBounceOrchestrator,
};

/// Shared server state.
pub struct AppState {
    pub orchestrator: WallBounceOrchestrator,
    pub metrics: Arc<MetricsSurface>,
    pub registry: Arc<ProviderRegistry>,
    pub started: Instant,
}

pub type SharedState = Arc<AppState>;

/// Inbound analysis request body.
#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub depth: Option<u8>,
    #[serde(default)]
    pub min_providers: Option<usize>,
    #[serde(default)]
    pub max_providers: Option<usize>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Build an axum Router for the engine boundary.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn the inbound body into a validated [`AnalysisRequest`].
fn build_request(body: &AnalyzeBody) -> Result<AnalysisRequest, EngineError> {
    let prompt = body
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(ValidationError::MissingPrompt)?;

    let tier = match body.task_type.as_deref() {
        None => TaskTier::Basic,
        Some(raw) => TaskTier::parse(raw).ok_or_else(|| ValidationError::InvalidTaskType {
            value: raw.to_string(),
        })?,
    };
    let mode = match body.mode.as_deref() {
        None => BounceMode::Parallel,
        Some(raw) => BounceMode::parse(raw).ok_or_else(|| ValidationError::InvalidMode {
            value: raw.to_string(),
        })?,
    };
    if mode == BounceMode::Sequential {
        let depth = body.depth.unwrap_or(3);
        if !(3..=5).contains(&depth) {
            return Err(ValidationError::InvalidDepth { depth }.into());
        }
    }

    let mut request = AnalysisRequest::new(prompt, tier).with_mode(mode);
    if let Some(depth) = body.depth {
        request = request.with_depth(depth);
    }
    if let Some(min) = body.min_providers {
        request = request.with_min_providers(min);
    }
    if let Some(max) = body.max_providers {
        request = request.with_max_providers(max);
    }
    if let Some(threshold) = body.confidence_threshold {
        request = request.with_confidence_threshold(threshold);
    }
    request.session_id = body.session_id.clone();
    request.user_id = body.user_id.clone();
    request.validate()?;
    Ok(request)
}

/// Map a stable machine code to its HTTP status.
fn status_for(code: &str) -> StatusCode {
    match code {
        "missing_prompt" | "invalid_task_type" | "invalid_mode" | "invalid_depth"
        | "invalid_confidence_threshold" => StatusCode::BAD_REQUEST,
        "overloaded" => StatusCode::CONFLICT,
        "deadline_exceeded" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &EngineError) -> Value {
    json!({
        "error": err.to_string(),
        "code": err.code(),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn success_body(body: &AnalyzeBody, consensus: &Consensus, flow: &FlowTrace) -> Value {
    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let task_type = body.task_type.clone().unwrap_or_else(|| "basic".to_string());

    let llm_votes: Vec<Value> = consensus
        .all_votes
        .iter()
        .map(|vote| {
            json!({
                "provider": vote.provider_name,
                "model": vote.model,
                "confidence": vote.confidence,
                "agreement_score": vote.agreement_score,
                "error": vote.error.as_ref().map(|e| e.kind()),
            })
        })
        .collect();

    json!({
        "response": consensus.content,
        "confidence": consensus.confidence,
        "reasoning": consensus.reasoning,
        "session_id": session_id,
        "task_type": task_type,
        "wall_bounce_analysis": {
            "providers_used": consensus.providers_used,
            "llm_votes": llm_votes,
            "total_cost": consensus.total_cost_usd,
            "processing_time_ms": consensus.total_latency_ms,
            "tier_escalated": consensus.tier_escalated,
        },
        "flow_details": flow,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Core of the analyze route, factored out so tests can call it without
/// HTTP plumbing.
pub async fn run_analyze(state: &AppState, body: AnalyzeBody) -> (StatusCode, Value) {
    let request = match build_request(&body) {
        Ok(request) => request,
        Err(err) => return (status_for(err.code()), error_body(&err)),
    };

    match state
        .orchestrator
        .analyze_traced(request, wallbounce_core::CancellationToken::new())
        .await
    {
        Ok((consensus, flow)) => (StatusCode::OK, success_body(&body, &consensus, &flow)),
        Err(err) => {
            error!(code = err.code(), error = %err, "analysis failed");
            (status_for(err.code()), error_body(&err))
        }
    }
}

async fn analyze_handler(
    State(state): State<SharedState>,
    Json(body): Json<AnalyzeBody>,
) -> impl IntoResponse {
    let (status, value) = run_analyze(&state, body).await;
    (status, Json(value))
}

async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn healthz_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "providers": state.registry.len(),
        "active_requests": state.metrics.active_requests(),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallbounce_core::EngineConfig;

    fn state() -> SharedState {
        let metrics = Arc::new(MetricsSurface::new());
        let config = EngineConfig::default();
        let registry =
            Arc::new(ProviderRegistry::from_config(&config, Arc::clone(&metrics)).unwrap());
        let orchestrator =
            WallBounceOrchestrator::new(Arc::clone(&registry), config, Arc::clone(&metrics));
        Arc::new(AppState {
            orchestrator,
            metrics,
            registry,
            started: Instant::now(),
        })
    }

    fn body(value: Value) -> AnalyzeBody {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_defaults_to_basic_parallel() {
        let state = state();
        let (status, json) = run_analyze(
            &state,
            body(json!({"prompt": "why is the api returning 502s"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["response"].as_str().unwrap().len() > 0);
        assert_eq!(json["task_type"], "basic");
        assert!(json["wall_bounce_analysis"]["providers_used"].is_array());
        assert!(json["session_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_missing_prompt_is_400() {
        let state = state();
        let (status, json) = run_analyze(&state, body(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "missing_prompt");
        assert!(json["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_invalid_task_type_is_400() {
        let state = state();
        let (status, json) = run_analyze(
            &state,
            body(json!({"prompt": "p", "task_type": "urgent"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_task_type");
    }

    #[tokio::test]
    async fn test_invalid_mode_is_400() {
        let state = state();
        let (status, json) =
            run_analyze(&state, body(json!({"prompt": "p", "mode": "chaos"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_mode");
    }

    #[tokio::test]
    async fn test_invalid_depth_is_400() {
        let state = state();
        let (status, json) = run_analyze(
            &state,
            body(json!({"prompt": "p", "mode": "sequential", "depth": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_depth");
    }

    #[tokio::test]
    async fn test_session_id_round_trips() {
        let state = state();
        let (status, json) = run_analyze(
            &state,
            body(json!({"prompt": "p", "session_id": "sess-42"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["session_id"], "sess-42");
    }

    #[tokio::test]
    async fn test_votes_carry_agreement_scores() {
        let state = state();
        let (_, json) = run_analyze(&state, body(json!({"prompt": "disk full on db host"}))).await;
        let votes = json["wall_bounce_analysis"]["llm_votes"].as_array().unwrap();
        assert!(votes.len() >= 2);
        for vote in votes {
            assert!(vote["confidence"].as_f64().is_some());
            assert!(vote["agreement_score"].as_f64().is_some());
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for("missing_prompt"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("invalid_depth"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("overloaded"), StatusCode::CONFLICT);
        assert_eq!(status_for("deadline_exceeded"), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for("all_providers_failed"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for("config_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
