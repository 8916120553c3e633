//! Client error taxonomy.
//!
//! Every transport reports failures through [`ClientError`]. The variants map
//! onto how far a failure spreads:
//!
//! - [`ClientError::Transport`] and [`ClientError::ConnectionClosed`] are
//!   connection-fatal and are broadcast to every pending waiter.
//! - [`ClientError::Authentication`] is fatal to `connect` only.
//! - [`ClientError::Rpc`] and [`ClientError::Job`] reach only the caller that
//!   issued the failing call.
//! - [`ClientError::Unsupported`] is returned synchronously by transports that
//!   cannot perform an operation.
//!
//! The type is `Clone` so one fatal cause can be handed to many waiters.

use std::sync::Arc;

use mwrpc_protocol::{JobEvent, JobState, ProtocolError, RpcError};
use serde_json::Value;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by transports.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Socket or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection ended while the operation was outstanding.
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// The server rejected the login handshake.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed frame or unexpected result shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported an error for this call.
    #[error("RPC error {0}")]
    Rpc(RpcError),

    /// A job ended in a failed or aborted state.
    #[error(transparent)]
    Job(JobError),

    /// The active transport cannot perform this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The subscribe call was acknowledged negatively.
    #[error("subscription to {collection} rejected")]
    SubscriptionRejected { collection: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation did not complete in time.
    #[error("timeout during {operation}")]
    Timeout { operation: String },

    /// The transport has not been connected.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called on a connected transport.
    #[error("already connected")]
    AlreadyConnected,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error from a local filesystem implementation.
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl ClientError {
    /// Creates a connection-closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Returns true for the unsupported-operation condition.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Returns true if the connection ended under the operation.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    /// Returns true if the caller cancelled or timed out the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout { .. })
    }

    /// Returns true for errors that end the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed { .. })
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}

impl From<JobError> for ClientError {
    fn from(err: JobError) -> Self {
        Self::Job(err)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Terminal failure of a server-side job.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("job {job_id} {state}: {}", .message.as_deref().unwrap_or("no error reported"))]
pub struct JobError {
    /// Job id.
    pub job_id: u64,
    /// Terminal state, `FAILED` or `ABORTED`.
    pub state: JobState,
    /// Failure message reported by the server.
    pub message: Option<String>,
    /// Server-side exception text.
    pub exception: Option<String>,
    /// The full job payload as reported.
    pub payload: Value,
}

impl JobError {
    /// Builds a job error from a terminal, unsuccessful event.
    pub fn from_event(event: &JobEvent) -> Self {
        Self {
            job_id: event.id,
            state: event.state,
            message: event.error_message(),
            exception: event.exception.clone(),
            payload: event.payload.clone(),
        }
    }

    /// Returns true if the job was aborted rather than failed.
    pub fn is_aborted(&self) -> bool {
        self.state == JobState::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display() {
        assert_eq!(
            ClientError::Unsupported("read_file").to_string(),
            "unsupported operation: read_file"
        );
        assert_eq!(
            ClientError::closed("server went away").to_string(),
            "connection closed: server went away"
        );
        assert_eq!(
            ClientError::Rpc(RpcError::new(2, "ENOENT")).to_string(),
            "RPC error [2] ENOENT"
        );
        assert_eq!(
            ClientError::timeout("call pool.query").to_string(),
            "timeout during call pool.query"
        );
    }

    #[test]
    fn predicates() {
        assert!(ClientError::Unsupported("exists").is_unsupported());
        assert!(ClientError::closed("eof").is_connection_closed());
        assert!(ClientError::closed("eof").is_fatal());
        assert!(ClientError::Transport("reset".into()).is_fatal());
        assert!(ClientError::Cancelled.is_cancelled());
        assert!(ClientError::timeout("x").is_cancelled());
        assert!(!ClientError::Rpc(RpcError::new(1, "x")).is_fatal());
    }

    #[test]
    fn job_error_from_failed_event() {
        let event = JobEvent::from_fields(json!({
            "id": 9,
            "state": "FAILED",
            "error": "[ENOSPC] no space left",
            "exception": "Traceback"
        }))
        .unwrap();

        let error = JobError::from_event(&event);
        assert_eq!(error.job_id, 9);
        assert_eq!(error.state, JobState::Failed);
        assert_eq!(error.message.as_deref(), Some("[ENOSPC] no space left"));
        assert_eq!(error.payload["exception"], json!("Traceback"));
        assert!(!error.is_aborted());
        assert_eq!(error.to_string(), "job 9 FAILED: [ENOSPC] no space left");
    }

    #[test]
    fn job_error_without_message() {
        let event = JobEvent::from_fields(json!({"id": 4, "state": "ABORTED"})).unwrap();
        let error = JobError::from_event(&event);
        assert!(error.is_aborted());
        assert_eq!(error.to_string(), "job 4 ABORTED: no error reported");
    }

    #[test]
    fn protocol_error_converts() {
        let error: ClientError = ProtocolError::EmptyMessage.into();
        assert!(matches!(error, ClientError::Protocol(ref m) if m == "empty message"));
    }
}
