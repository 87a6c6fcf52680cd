//! Error types for ClawLoop
//!
//! This module defines all error types used throughout the runtime.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error classification.
///
/// Model-call failures are surfaced as typed values so the loop can decide
/// whether to retry without string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 401: Invalid API key or authentication failure
    Auth(String),
    /// 429: Rate limit or quota exceeded
    RateLimit(String),
    /// 500/502/503/504: Server-side errors
    ServerError(String),
    /// 400: Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404: Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection, read, or per-attempt timeout
    Timeout(String),
    /// Provider is overloaded: retry with backoff
    Overloaded(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
                | ProviderError::Overloaded(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Timeout(_) | ProviderError::Unknown(_) => None,
        }
    }

    /// Classify an HTTP status code and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = body.to_string();
        match status {
            401 | 403 => ProviderError::Auth(msg),
            429 => ProviderError::RateLimit(msg),
            400 | 422 => ProviderError::InvalidRequest(msg),
            404 => ProviderError::ModelNotFound(msg),
            408 => ProviderError::Timeout(msg),
            529 => ProviderError::Overloaded(msg),
            500..=599 => ProviderError::ServerError(msg),
            _ => ProviderError::Unknown(msg),
        }
    }
}

impl From<ProviderError> for ClawError {
    fn from(err: ProviderError) -> Self {
        ClawError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for ClawLoop operations.
#[derive(Error, Debug)]
pub enum ClawError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Untyped provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for retry decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Channel errors (delivery failures, unknown channel, etc.)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Tool errors raised inside a tool implementation
    #[error("Tool error: {0}")]
    Tool(String),

    /// Tool failure observed at the executor boundary
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Session management errors (invalid state, persistence failures, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// A session log exists on disk but cannot be read back
    #[error("Session '{key}' is corrupt: {reason}")]
    SessionCorrupt { key: String, reason: String },

    /// Memory store failures outside consolidation
    #[error("Memory error: {0}")]
    Memory(String),

    /// Consolidation did not complete; nothing was archived
    #[error("Memory consolidation failed: {0}")]
    ConsolidationFailed(String),

    /// The tool-call cycle hit its bound
    #[error("Iteration limit exceeded after {0} tool rounds")]
    IterationLimitExceeded(u32),

    /// Bus capacity exceeded; the producer must shed or retry
    #[error("Bus overflow: {0}")]
    BusOverflow(String),

    /// Message bus channel closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,

    /// The in-flight operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Resource not found (sessions, tools, channels, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Security violations (path traversal attempts, blocked commands, etc.)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClawError {
    /// Text suitable for showing to the end user.
    ///
    /// Internal details stay in the logs; the user gets a short explanation.
    pub fn user_message(&self) -> String {
        match self {
            ClawError::ProviderTyped(ProviderError::RateLimit(_)) => {
                "The model is rate limited right now. Please try again in a moment.".to_string()
            }
            ClawError::ProviderTyped(ProviderError::Timeout(_)) => {
                "The model took too long to respond. Please try again.".to_string()
            }
            ClawError::ProviderTyped(ProviderError::Auth(_)) => {
                "The model provider rejected our credentials. Please contact the operator."
                    .to_string()
            }
            ClawError::ProviderTyped(_) | ClawError::Provider(_) => {
                "Sorry, I couldn't reach the model to answer that. Please try again later."
                    .to_string()
            }
            ClawError::SessionCorrupt { .. } => {
                "Your previous conversation history could not be read. It has been set aside and a new conversation has started."
                    .to_string()
            }
            ClawError::Cancelled => "The request was cancelled.".to_string(),
            _ => "Sorry, something went wrong while processing your message.".to_string(),
        }
    }
}

/// A specialized `Result` type for ClawLoop operations.
pub type Result<T> = std::result::Result<T, ClawError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClawError::Config("missing workspace".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing workspace");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ClawError = io_err.into();
        assert!(matches!(err, ClawError::Io(_)));
    }

    #[test]
    fn test_session_corrupt_display() {
        let err = ClawError::SessionCorrupt {
            key: "cli:1".into(),
            reason: "line 3: expected value".into(),
        };
        assert_eq!(
            err.to_string(),
            "Session 'cli:1' is corrupt: line 3: expected value"
        );
    }

    #[test]
    fn test_tool_execution_display() {
        let err = ClawError::ToolExecution {
            tool: "shell".into(),
            message: "timed out".into(),
        };
        assert_eq!(err.to_string(), "Tool 'shell' failed: timed out");
    }

    // ====================================================================
    // ProviderError tests
    // ====================================================================

    #[test]
    fn test_provider_error_is_retryable() {
        assert!(ProviderError::RateLimit("429".into()).is_retryable());
        assert!(ProviderError::ServerError("500".into()).is_retryable());
        assert!(ProviderError::Timeout("timeout".into()).is_retryable());
        assert!(ProviderError::Overloaded("busy".into()).is_retryable());

        assert!(!ProviderError::Auth("401".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("400".into()).is_retryable());
        assert!(!ProviderError::ModelNotFound("404".into()).is_retryable());
        assert!(!ProviderError::Unknown("???".into()).is_retryable());
    }

    #[test]
    fn test_provider_error_status_code() {
        assert_eq!(ProviderError::Auth("x".into()).status_code(), Some(401));
        assert_eq!(
            ProviderError::RateLimit("x".into()).status_code(),
            Some(429)
        );
        assert_eq!(ProviderError::Timeout("x".into()).status_code(), None);
        assert_eq!(
            ProviderError::Overloaded("x".into()).status_code(),
            Some(503)
        );
    }

    #[test]
    fn test_provider_error_from_status() {
        assert!(matches!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::from_status(502, "bad gateway"),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            ProviderError::from_status(401, "nope"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(418, "teapot"),
            ProviderError::Unknown(_)
        ));
    }

    #[test]
    fn test_provider_typed_display() {
        let err: ClawError = ProviderError::Auth("invalid key".into()).into();
        assert_eq!(
            err.to_string(),
            "Provider error: Authentication error: invalid key"
        );
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err: ClawError = ProviderError::ServerError("stack trace at 0xdeadbeef".into()).into();
        let msg = err.user_message();
        assert!(!msg.contains("0xdeadbeef"));
        assert!(msg.contains("couldn't reach the model"));

        let err = ClawError::SessionCorrupt {
            key: "k".into(),
            reason: "bad".into(),
        };
        assert!(err.user_message().contains("new conversation"));
    }
}
