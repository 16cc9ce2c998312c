//! Custom error types for bq-analyst
//!
//! Provides a unified error handling system across all modules. Tool and
//! warehouse failures are not represented here: they are folded into
//! observations and fed back to the model instead of failing the turn.

use thiserror::Error;

use crate::agent::loop_state::TurnMetadata;

/// Main error type for bq-analyst operations
#[derive(Error, Debug)]
pub enum AnalystError {
    /// The LLM backend is unreachable or returned an error
    #[error("Model invocation error: {0}")]
    ModelInvocation(String),

    /// The LLM backend did not answer within the configured timeout
    #[error("Model invocation timed out after {0}s")]
    ModelTimeout(u64),

    /// Session store read or write failures
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Google credential lookup failed
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A turn failed after partial progress
    #[error("Turn failed in thread {thread_id} after {} step(s): {source}", .metadata.steps)]
    TurnFailed {
        thread_id: String,
        metadata: TurnMetadata,
        #[source]
        source: Box<AnalystError>,
    },

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for bq-analyst operations
pub type Result<T> = std::result::Result<T, AnalystError>;

impl AnalystError {
    /// Create a model invocation error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::ModelInvocation(msg.into())
    }

    /// Create a session store error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::SessionStore(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an auth error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Whether this error came from the model backend
    pub fn is_model_failure(&self) -> bool {
        match self {
            Self::ModelInvocation(_) | Self::ModelTimeout(_) | Self::Http(_) | Self::Auth(_) => {
                true
            }
            Self::TurnFailed { source, .. } => source.is_model_failure(),
            _ => false,
        }
    }

    /// Partial progress recorded before a turn failed
    pub fn turn_metadata(&self) -> Option<&TurnMetadata> {
        match self {
            Self::TurnFailed { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}
