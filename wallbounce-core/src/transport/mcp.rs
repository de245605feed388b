//! JSON-RPC tool-server transport.
//!
//! Speaks a minimal JSON-RPC 2.0 dialect to a completion server over a
//! persistent HTTP connection (reqwest keeps the connection pooled).
//! Request: `{"jsonrpc": "2.0", "id": n, "method": "complete", "params":
//! {"prompt": ..., "tier": ..., "toolset": ...}}`. The result object
//! mirrors [`BackendResponse`].

use crate::provider::{BackendError, BackendResponse, InvokeOptions, ProviderBackend};
use crate::types::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Provider backend bound to a JSON-RPC completion server.
pub struct McpTransport {
    endpoint: String,
    auth_token: Option<String>,
    client: Client,
    next_id: AtomicU64,
}

impl McpTransport {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token,
            client: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn parse_result(body: &Value) -> Result<BackendResponse, BackendError> {
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error");
            return Err(BackendError::Transport {
                message: message.to_string(),
            });
        }

        let result = body.get("result").ok_or_else(|| BackendError::Malformed {
            message: "response has neither result nor error".to_string(),
        })?;
        let content = result
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Malformed {
                message: "result has no content field".to_string(),
            })?
            .to_string();
        let confidence = result.get("confidence").and_then(Value::as_f64);
        let usage = result
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(BackendResponse {
            content,
            confidence,
            usage,
        })
    }
}

#[async_trait]
impl ProviderBackend for McpTransport {
    async fn complete(
        &self,
        text: &str,
        options: &InvokeOptions,
    ) -> Result<BackendResponse, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "complete",
            "params": {
                "prompt": text,
                "tier": options.tier.to_string(),
                "toolset": options.toolset,
            },
        });
        debug!(endpoint = %self.endpoint, id, "dispatching JSON-RPC completion");

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| BackendError::Transport {
            message: format!("request failed: {e}"),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Transport {
                message: format!("server returned {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| BackendError::Malformed {
            message: format!("response is not JSON: {e}"),
        })?;
        Self::parse_result(&body)
    }
}
