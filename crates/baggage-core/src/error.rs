//! Core error type for the baggage orchestrator.
//!
//! `BaggageError` is used throughout the core domain (stores, gate,
//! processor, orchestrator). Only `NotFound`, `BadRequest` and
//! `UnsupportedEvent` are meant to reach external callers; conflicts are
//! retried internally and agent failures never leave a node.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BaggageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BaggageError {
    /// Stable machine-readable kind, used in [`ErrorResult`].
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error is the caller's fault (never retried).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::BadRequest(_) | Self::UnsupportedEvent(_)
        )
    }
}

impl From<rusqlite::Error> for BaggageError {
    fn from(e: rusqlite::Error) -> Self {
        BaggageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for BaggageError {
    fn from(e: serde_json::Error) -> Self {
        BaggageError::Internal(format!("Serialization failed: {}", e))
    }
}

/// Structured error result returned to API consumers instead of a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub kind: String,
    pub message: String,
}

impl From<&BaggageError> for ErrorResult {
    fn from(e: &BaggageError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
