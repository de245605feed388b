//! Subprocess CLI transport.
//!
//! Spawns the configured command, writes the prompt to its stdin, and
//! expects a single JSON completion object on stdout:
//! `{"content": "...", "confidence": 0.8, "input_tokens": 120, "output_tokens": 40}`.
//! Only `content` is required.

use crate::provider::{BackendError, BackendResponse, InvokeOptions, ProviderBackend};
use crate::types::TokenUsage;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Provider backend that shells out to a vendor CLI.
pub struct CliTransport {
    command: String,
    args: Vec<String>,
}

impl CliTransport {
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn parse_completion(stdout: &str) -> Result<BackendResponse, BackendError> {
        let body: Value =
            serde_json::from_str(stdout.trim()).map_err(|e| BackendError::Malformed {
                message: format!("stdout is not JSON: {e}"),
            })?;
        let content = body
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Malformed {
                message: "completion has no content field".to_string(),
            })?
            .to_string();
        let confidence = body.get("confidence").and_then(Value::as_f64);
        let usage = TokenUsage {
            input_tokens: body
                .get("input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: body
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        Ok(BackendResponse {
            content,
            confidence,
            usage,
        })
    }
}

#[async_trait]
impl ProviderBackend for CliTransport {
    async fn complete(
        &self,
        text: &str,
        _options: &InvokeOptions,
    ) -> Result<BackendResponse, BackendError> {
        debug!(command = %self.command, "spawning CLI provider");
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Transport {
                message: format!("failed to spawn {}: {e}", self.command),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| BackendError::Transport {
            message: "child stdin unavailable".to_string(),
        })?;
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| BackendError::Transport {
                message: format!("failed to write prompt: {e}"),
            })?;
        drop(stdin); // close stdin so the child sees EOF

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::Transport {
                message: format!("failed to collect output: {e}"),
            })?;

        if !output.status.success() {
            return Err(BackendError::Transport {
                message: format!("{} exited with {}", self.command, output.status),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_completion(&stdout)
    }
}
