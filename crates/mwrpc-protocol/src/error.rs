//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to serialize or parse JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Empty frame received.
    #[error("empty message")]
    EmptyMessage,

    /// Frame is valid JSON but not a JSON-RPC object.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Response id is not a positive integer.
    #[error("invalid response id: {0}")]
    InvalidId(String),

    /// A recognized notification carried params that do not match its schema.
    #[error("malformed {method} notification: {reason}")]
    MalformedNotification { method: String, reason: String },
}

impl ProtocolError {
    /// Creates a malformed notification error.
    pub fn malformed(method: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedNotification {
            method: method.into(),
            reason: reason.to_string(),
        }
    }
}
