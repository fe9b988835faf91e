//! Error taxonomy
//!
//! Component errors (`ValidationError`, `ControllerError`) never fail a session;
//! they are folded into a `ToolResult` and shown to the model. Only
//! `ModelProtocolError` after its retry budget and the orchestrator's own
//! exhaustion conditions surface as a `SessionError`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::Message;

/// Failure kinds recorded in an error `ToolResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not match the tool's parameter schema
    InvalidArguments,
    /// The model asked for a tool that is not in the registry
    UnknownTool,
    AuthenticationFailure,
    /// The controller refused the request as invalid
    ValidationRejected,
    NotFound,
    RateLimited,
    TransientNetworkFailure,
    Fatal,
    /// The session was cancelled or timed out before the call finished
    Cancelled,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::AuthenticationFailure => "authentication_failure",
            ToolErrorKind::ValidationRejected => "validation_rejected",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::RateLimited => "rate_limited",
            ToolErrorKind::TransientNetworkFailure => "transient_network_failure",
            ToolErrorKind::Fatal => "fatal",
            ToolErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument validation failure against a tool's parameter schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("missing required parameter `{0}`")]
    MissingRequired(String),

    #[error("parameter `{path}` must be {expected}")]
    TypeMismatch { path: String, expected: String },

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{path}` must be one of: {allowed}")]
    NotInEnum { path: String, allowed: String },

    #[error("invalid value for `{path}`: {reason}")]
    InvalidValue { path: String, reason: String },
}

impl ValidationError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ValidationError::UnknownTool(_) => ToolErrorKind::UnknownTool,
            _ => ToolErrorKind::InvalidArguments,
        }
    }
}

/// Classified failure of a single controller round trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("request rejected by controller: {0}")]
    ValidationRejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("transient network failure: {0}")]
    TransientNetworkFailure(String),

    #[error("controller error: {0}")]
    Fatal(String),
}

impl ControllerError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ControllerError::AuthenticationFailure(_) => ToolErrorKind::AuthenticationFailure,
            ControllerError::ValidationRejected(_) => ToolErrorKind::ValidationRejected,
            ControllerError::NotFound(_) => ToolErrorKind::NotFound,
            ControllerError::RateLimited { .. } => ToolErrorKind::RateLimited,
            ControllerError::TransientNetworkFailure(_) => ToolErrorKind::TransientNetworkFailure,
            ControllerError::Fatal(_) => ToolErrorKind::Fatal,
        }
    }

    /// Whether the orchestrator may re-attempt the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::RateLimited { .. } | ControllerError::TransientNetworkFailure(_)
        )
    }

    /// Server-provided delay hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ControllerError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The model call failed or produced output that cannot be acted on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelProtocolError {
    #[error("model did not answer within {0:?}")]
    Timeout(Duration),

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("model returned an empty response")]
    Empty,

    #[error("model reused tool call id `{0}`")]
    DuplicateCallId(String),
}

/// Why a turn ended in the FAILED state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// The model kept requesting tools past the iteration maximum
    IterationLimit,
    /// The model kept failing after its retry budget
    ModelUnavailable,
    /// The model kept naming tools that do not exist
    UnknownToolLimit,
    Cancelled,
    TimedOut,
}

/// Terminal failure of a turn, with the transcript as it stood for diagnostics
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub reason: String,
    pub transcript: Vec<Message>,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, reason: impl Into<String>, transcript: Vec<Message>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            transcript,
        }
    }
}
