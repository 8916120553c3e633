//! JSON-RPC 2.0 wire types for the mwrpc management API client.
//!
//! This crate defines the messages exchanged with the management server over
//! a persistent WebSocket connection, and the classification of every inbound
//! frame into exactly one of three categories.
//!
//! # Frames
//!
//! Each WebSocket text message carries one JSON value:
//!
//! ```text
//! client -> server   {"jsonrpc":"2.0","id":7,"method":"pool.query","params":[]}
//! server -> client   {"jsonrpc":"2.0","id":7,"result":[...]}
//! server -> client   {"jsonrpc":"2.0","method":"collection_update","params":{...}}
//! ```
//!
//! # Classification
//!
//! [`decode_frame`] turns a frame into an [`Incoming`]:
//! - a frame with an `id` is a [`Response`]
//! - a `collection_update` on the job stream (or a `job_update`) is a [`JobEvent`]
//! - any other `collection_update` is a [`CollectionEvent`]
//! - everything else is [`Incoming::Unrecognized`] and is ignored by the client
//!
//! # Example
//!
//! ```rust
//! use mwrpc_protocol::{decode_frame, encode_request, Incoming, Request};
//! use serde_json::json;
//!
//! let frame = encode_request(&Request::new(1, "core.ping", json!([]))).unwrap();
//! assert!(frame.contains("core.ping"));
//!
//! let incoming = decode_frame(r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#).unwrap();
//! assert!(matches!(incoming, Incoming::Response(_)));
//! ```

mod codec;
mod error;
mod events;
mod types;

pub use codec::{decode_frame, encode_request, Incoming};
pub use error::{ProtocolError, ProtocolResult};
pub use events::{parse_job_id, ChangeKind, CollectionEvent, JobEvent, JobProgress, JobState};
pub use types::{Notification, Request, Response, RpcError};

/// JSON-RPC protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum frame size (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Recognized method names.
pub mod methods {
    /// Login with username and API key.
    pub const LOGIN: &str = "auth.login_ex";

    /// Login mechanism sent with [`LOGIN`].
    pub const LOGIN_MECHANISM: &str = "API_KEY_PLAIN";

    /// Discriminator returned by a successful [`LOGIN`].
    pub const LOGIN_SUCCESS: &str = "SUCCESS";

    /// Server version string, used to derive the cached version.
    pub const SYSTEM_VERSION: &str = "system.version";

    /// No-op liveness probe.
    pub const PING: &str = "core.ping";

    /// Expected result of [`PING`].
    pub const PONG: &str = "pong";

    /// Registers interest in a collection.
    pub const SUBSCRIBE: &str = "core.subscribe";

    /// Server push carrying collection changes.
    pub const COLLECTION_UPDATE: &str = "collection_update";

    /// Server push carrying job lifecycle changes.
    pub const JOB_UPDATE: &str = "job_update";

    /// Collection name of the job stream. Updates on it are job events.
    pub const JOB_COLLECTION: &str = "core.get_jobs";
}
