//! Request, response and notification shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JSONRPC_VERSION;

/// A client-to-server call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version tag (always "2.0").
    pub jsonrpc: String,
    /// Correlation id, unique among the connection's pending calls.
    pub id: u64,
    /// Method name. Opaque at this layer.
    pub method: String,
    /// Call arguments. Omitted from the frame when null.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    /// Creates a request with the current protocol version.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A server-to-client reply to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version tag.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Echo of the request id.
    pub id: u64,
    /// Call result. Null when absent.
    #[serde(default)]
    pub result: Value,
    /// Server-reported error, if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Creates a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error: None,
        }
    }

    /// Creates an error response.
    pub fn failure(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Value::Null,
            error: Some(error),
        }
    }

    /// Returns true if the version tag matches [`JSONRPC_VERSION`].
    pub fn is_compatible(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Splits the response into its result or its error object.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// A server-initiated message without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version tag.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Notification method.
    pub method: String,
    /// Notification payload.
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Creates a notification.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Error object carried by a failed [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error object without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Builder: attach structured data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
