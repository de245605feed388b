//! Direct vendor SDK transport.
//!
//! Calls a chat-completions style REST endpoint directly: `POST
//! {base_url}/chat/completions` with a bearer key resolved from the
//! environment at construction time. Covers OpenAI-compatible vendor
//! APIs, which is what every supported SDK-direct provider speaks.

use crate::error::ConfigError;
use crate::provider::{BackendError, BackendResponse, InvokeOptions, ProviderBackend};
use crate::types::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Provider backend that calls a vendor REST API directly.
pub struct SdkTransport {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl SdkTransport {
    /// Resolve the API key from `api_key_env` now so a missing key fails
    /// at start-up rather than on the first request.
    pub fn new(
        base_url: impl Into<String>,
        api_key_env: &str,
        model: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = std::env::var(api_key_env).map_err(|_| ConfigError::Invalid {
            message: format!("environment variable {api_key_env} is not set"),
        })?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            client: Client::new(),
        })
    }

    fn parse_response(body: &Value) -> Result<BackendResponse, BackendError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| BackendError::Malformed {
                message: "no choices in response".to_string(),
            })?;
        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Malformed {
                message: "no message content in choice".to_string(),
            })?
            .to_string();
        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                output_tokens: u
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            })
            .unwrap_or_default();

        // Chat-completions APIs carry no confidence; the adapter's
        // heuristic fills it in.
        Ok(BackendResponse {
            content,
            confidence: None,
            usage,
        })
    }
}

#[async_trait]
impl ProviderBackend for SdkTransport {
    async fn complete(
        &self,
        text: &str,
        _options: &InvokeOptions,
    ) -> Result<BackendResponse, BackendError> {
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": text}],
        });
        debug!(model = %self.model, "dispatching SDK completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport {
                message: format!("API returned {status}: {detail}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| BackendError::Malformed {
            message: format!("response is not JSON: {e}"),
        })?;
        Self::parse_response(&body)
    }
}
