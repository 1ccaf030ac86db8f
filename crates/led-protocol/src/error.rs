//! Error types for protocol decoding and encoding

use thiserror::Error;

/// Errors that can occur while handling protocol lines
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Line is not valid JSON, or a command failed to serialize
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Line is valid JSON but not an object
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}
