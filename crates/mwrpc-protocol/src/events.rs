//! Push notification payloads: collection changes and job lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of change carried by a collection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new item appeared in the collection.
    Added,
    /// An existing item changed.
    Changed,
    /// An item was removed.
    Removed,
}

impl ChangeKind {
    /// Parses the `msg` field of a collection update.
    pub fn from_msg(msg: &str) -> Option<Self> {
        match msg {
            "added" => Some(Self::Added),
            "changed" => Some(Self::Changed),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// A collection-change push routed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEvent {
    /// Collection the change belongs to.
    pub collection: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Item id, when the server sends one.
    pub id: Option<Value>,
    /// Changed fields.
    pub fields: Value,
}

impl CollectionEvent {
    /// Creates a `changed` event.
    pub fn changed(collection: impl Into<String>, fields: Value) -> Self {
        Self {
            collection: collection.into(),
            kind: ChangeKind::Changed,
            id: None,
            fields,
        }
    }

    /// Returns the value delivered to subscribers.
    ///
    /// `added` and `changed` deliver `fields` verbatim. `removed` carries no
    /// fields, so it delivers `{"id": <id>, "removed": true}`.
    pub fn into_payload(self) -> Value {
        match self.kind {
            ChangeKind::Added | ChangeKind::Changed => self.fields,
            ChangeKind::Removed => json!({
                "id": self.id.unwrap_or(Value::Null),
                "removed": true,
            }),
        }
    }
}

/// Raw params of a `collection_update` push.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CollectionUpdate {
    pub msg: String,
    pub collection: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub fields: Value,
}

/// Lifecycle state of a server-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum JobState {
    /// Queued behind another job.
    Waiting,
    /// Accepted, not started.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Aborted,
}

impl JobState {
    /// Returns true for states that end the job's lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Aborted)
    }

    /// Returns the wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(Self::Waiting),
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "ABORTED" => Ok(Self::Aborted),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

impl TryFrom<String> for JobState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Advisory progress of a running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Completion percentage.
    #[serde(default)]
    pub percent: Option<f64>,
    /// Human-readable step description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A job-lifecycle push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Job id.
    pub id: u64,
    /// Current state.
    pub state: JobState,
    /// Job result, meaningful once `state` is `SUCCESS`.
    #[serde(default)]
    pub result: Value,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Server-side exception text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Progress report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    /// The full fields object as received.
    #[serde(skip)]
    pub payload: Value,
}

impl JobEvent {
    /// Parses a job event from a fields object, keeping the raw payload.
    pub fn from_fields(fields: Value) -> Result<Self, serde_json::Error> {
        let mut event: JobEvent = serde_json::from_value(fields.clone())?;
        event.payload = fields;
        Ok(event)
    }

    /// Returns the failure message, if the server sent one.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Extracts a job id from the result of a job-producing call.
///
/// Accepts a bare unsigned integer, or an object carrying `job_id` or `id`.
pub fn parse_job_id(result: &Value) -> Option<u64> {
    match result {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map
            .get("job_id")
            .or_else(|| map.get("id"))
            .and_then(Value::as_u64),
        _ => None,
    }
}
