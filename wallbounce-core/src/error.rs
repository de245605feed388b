//! Error types for the WallBounce engine core.
//!
//! Uses `thiserror` for public API error types. Provider- and tool-level
//! failures are captured into their result records ([`VoteFailure`],
//! failed tool outcomes) and never unwound past the orchestrator boundary;
//! only the variants of [`EngineError`] reach callers. Every surfaced error
//! carries a stable machine code via [`EngineError::code`].

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No providers available for tier {tier}")]
    NoProvidersAvailable { tier: String },

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("No valid votes were produced")]
    NoValidVotes,

    #[error("All providers failed to produce a valid vote")]
    AllProvidersFailed,

    #[error("Request exceeded the global deadline of {deadline_ms}ms")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("Engine is at capacity, request rejected")]
    Overloaded,

    #[error("Request was cancelled by the caller")]
    Cancelled,
}

impl EngineError {
    /// Stable machine tag for the wire error body. These strings are part
    /// of the public contract and must not change between versions.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(v) => v.code(),
            EngineError::Config(_) => "config_error",
            EngineError::NoProvidersAvailable { .. } => "no_providers_available",
            EngineError::Tool(t) => t.code(),
            EngineError::NoValidVotes => "no_valid_votes",
            EngineError::AllProvidersFailed => "all_providers_failed",
            EngineError::DeadlineExceeded { .. } => "deadline_exceeded",
            EngineError::Overloaded => "overloaded",
            EngineError::Cancelled => "cancelled",
        }
    }
}

/// Caller faults, surfaced verbatim before any provider call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Request is missing a prompt")]
    MissingPrompt,

    #[error("Unknown task type: {value}")]
    InvalidTaskType { value: String },

    #[error("Unknown mode: {value}")]
    InvalidMode { value: String },

    #[error("Sequential depth must be in [3..5], got {depth}")]
    InvalidDepth { depth: u8 },

    #[error("Confidence threshold must be in [0..1], got {value}")]
    InvalidConfidenceThreshold { value: f64 },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingPrompt => "missing_prompt",
            ValidationError::InvalidTaskType { .. } => "invalid_task_type",
            ValidationError::InvalidMode { .. } => "invalid_mode",
            ValidationError::InvalidDepth { .. } => "invalid_depth",
            ValidationError::InvalidConfidenceThreshold { .. } => "invalid_confidence_threshold",
        }
    }
}

/// Start-up configuration faults. The only error class allowed to abort
/// the process.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Transport conflict for {vendor}/{model}: {existing} already registered, \
         refusing {attempted}"
    )]
    TransportConflict {
        vendor: String,
        model: String,
        existing: String,
        attempted: String,
    },

    #[error("Provider already registered: {name}")]
    DuplicateProvider { name: String },

    #[error("Unknown provider in PROVIDERS_ENABLED: {name}")]
    UnknownProvider { name: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Tool governance faults surfaced to the orchestrator as failed tool
/// outcomes, never as aborted requests.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Execution not approved (approval {approval_id}): {reason}")]
    NotApproved {
        approval_id: uuid::Uuid,
        reason: String,
    },

    #[error("Operation '{operation}' is not allowed for tool '{label}'")]
    OperationNotAllowed { label: String, operation: String },

    #[error("Unknown tool: {label}")]
    UnknownTool { label: String },
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NotApproved { .. } => "not_approved",
            ToolError::OperationNotAllowed { .. } => "not_approved",
            ToolError::UnknownTool { .. } => "unknown_tool",
        }
    }
}

/// Why a provider call produced no answer. Carried inside the [`Vote`]
/// rather than propagated, so one failing provider never aborts a request.
///
/// [`Vote`]: crate::types::Vote
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoteFailure {
    #[error("Provider backend failed: {message}")]
    Backend { message: String },

    #[error("Provider response could not be parsed: {message}")]
    InvalidResponse { message: String },

    #[error("Provider call exceeded its deadline of {deadline_ms}ms")]
    Timeout { deadline_ms: u64 },

    #[error("Provider call was cancelled")]
    Cancelled,
}

impl VoteFailure {
    /// Metric label for the `errors` counter family.
    pub fn kind(&self) -> &'static str {
        match self {
            VoteFailure::Backend { .. } => "backend",
            VoteFailure::InvalidResponse { .. } => "invalid_response",
            VoteFailure::Timeout { .. } => "deadline",
            VoteFailure::Cancelled => "cancelled",
        }
    }
}

/// A type alias for results using the top-level [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_codes_are_stable() {
        assert_eq!(ValidationError::MissingPrompt.code(), "missing_prompt");
        assert_eq!(
            ValidationError::InvalidTaskType {
                value: "urgent".into()
            }
            .code(),
            "invalid_task_type"
        );
        assert_eq!(
            ValidationError::InvalidMode {
                value: "chaos".into()
            }
            .code(),
            "invalid_mode"
        );
        assert_eq!(
            ValidationError::InvalidDepth { depth: 7 }.code(),
            "invalid_depth"
        );
    }

    #[test]
    fn test_engine_codes_are_stable() {
        assert_eq!(EngineError::Overloaded.code(), "overloaded");
        assert_eq!(
            EngineError::DeadlineExceeded { deadline_ms: 1000 }.code(),
            "deadline_exceeded"
        );
        assert_eq!(EngineError::NoValidVotes.code(), "no_valid_votes");
        assert_eq!(EngineError::AllProvidersFailed.code(), "all_providers_failed");
        assert_eq!(
            EngineError::NoProvidersAvailable {
                tier: "basic".into()
            }
            .code(),
            "no_providers_available"
        );
    }

    #[test]
    fn test_engine_error_from_validation() {
        let err: EngineError = ValidationError::MissingPrompt.into();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.code(), "missing_prompt");
        assert_eq!(
            err.to_string(),
            "Validation error: Request is missing a prompt"
        );
    }

    #[test]
    fn test_transport_conflict_display() {
        let err = ConfigError::TransportConflict {
            vendor: "openai".into(),
            model: "gpt-5".into(),
            existing: "cli".into(),
            attempted: "sdk-direct".into(),
        };
        assert!(err.to_string().contains("openai/gpt-5"));
        assert!(err.to_string().contains("cli"));
    }

    #[test]
    fn test_vote_failure_metric_kinds() {
        assert_eq!(
            VoteFailure::Timeout { deadline_ms: 500 }.kind(),
            "deadline"
        );
        assert_eq!(
            VoteFailure::Backend {
                message: "503".into()
            }
            .kind(),
            "backend"
        );
        assert_eq!(VoteFailure::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_vote_failure_serializes_tagged() {
        let failure = VoteFailure::Timeout { deadline_ms: 500 };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["deadline_ms"], 500);
    }
}
