//! Frame encoding and inbound classification.
//!
//! Frames are single JSON documents carried in WebSocket text messages, so
//! there is no length prefix. Size is still bounded by [`MAX_MESSAGE_SIZE`]
//! on both directions.

use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{ChangeKind, CollectionEvent, CollectionUpdate, JobEvent};
use crate::types::{Request, Response};
use crate::{methods, MAX_MESSAGE_SIZE};

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to a request, routed by id.
    Response(Response),
    /// Job lifecycle change, routed to job waiters.
    Job(JobEvent),
    /// Collection change, routed to subscribers.
    Collection(CollectionEvent),
    /// Anything else. Ignored by the client.
    Unrecognized(Value),
}

/// Encodes a request as a text frame.
///
/// # Example
///
/// ```rust
/// use mwrpc_protocol::{encode_request, Request};
/// use serde_json::json;
///
/// let frame = encode_request(&Request::new(3, "system.info", json!([]))).unwrap();
/// assert_eq!(frame, r#"{"jsonrpc":"2.0","id":3,"method":"system.info","params":[]}"#);
/// ```
pub fn encode_request(request: &Request) -> ProtocolResult<String> {
    let json = serde_json::to_string(request)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decodes and classifies an inbound text frame.
///
/// Routing is decided by the frame's shape and method only:
/// - a non-null `id` makes the frame a [`Response`]
/// - `job_update`, or `collection_update` on the job stream, is a job event
/// - any other `collection_update` with a known `msg` is a collection event
///
/// Recognized notifications whose params do not fit their schema are
/// reported as [`ProtocolError::MalformedNotification`].
pub fn decode_frame(text: &str) -> ProtocolResult<Incoming> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Object(ref object) = value else {
        return Err(ProtocolError::InvalidFrame(format!(
            "expected a JSON object, got {}",
            kind_of(&value)
        )));
    };

    let has_id = match object.get("id") {
        Some(Value::Null) | None => false,
        Some(id) if id.as_u64().is_some() => true,
        Some(id) => return Err(ProtocolError::InvalidId(id.to_string())),
    };
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    let params = object.get("params").cloned().unwrap_or(Value::Null);

    if has_id {
        let response: Response = serde_json::from_value(value)?;
        return Ok(Incoming::Response(response));
    }
    let Some(method) = method else {
        return Ok(Incoming::Unrecognized(value));
    };

    match method.as_str() {
        methods::JOB_UPDATE => {
            let fields = match params {
                Value::Object(ref map) if map.contains_key("fields") => {
                    map.get("fields").cloned().unwrap_or(Value::Null)
                }
                other => other,
            };
            JobEvent::from_fields(fields)
                .map(Incoming::Job)
                .map_err(|e| ProtocolError::malformed(&method, e))
        }
        methods::COLLECTION_UPDATE => classify_collection_update(&method, params, value),
        _ => Ok(Incoming::Unrecognized(value)),
    }
}

fn classify_collection_update(method: &str, params: Value, frame: Value) -> ProtocolResult<Incoming> {
    let update: CollectionUpdate =
        serde_json::from_value(params).map_err(|e| ProtocolError::malformed(method, e))?;

    if update.collection == methods::JOB_COLLECTION {
        return JobEvent::from_fields(update.fields)
            .map(Incoming::Job)
            .map_err(|e| ProtocolError::malformed(method, e));
    }

    match ChangeKind::from_msg(&update.msg) {
        Some(kind) => Ok(Incoming::Collection(CollectionEvent {
            collection: update.collection,
            kind,
            id: update.id,
            fields: update.fields,
        })),
        None => Ok(Incoming::Unrecognized(frame)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
