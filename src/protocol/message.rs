//! Request and response records carried in frame bodies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Token linking a request to its eventual response.
///
/// Rendered on the wire as a plain string; the data layer must echo it
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random (UUID v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Outbound request record: `{ id, method, payload }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Correlation id.
    pub id: CorrelationId,
    /// Name of the remote operation.
    pub method: String,
    /// Arguments. Older data-layer revisions called this `json_arg` or
    /// `query_data`; both are accepted when decoding.
    #[serde(default, alias = "json_arg", alias = "query_data")]
    pub payload: Value,
}

impl WireRequest {
    /// Create a request with a fresh correlation id.
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            id: CorrelationId::new(),
            method: method.into(),
            payload,
        }
    }
}

/// Inbound response record: `{ id, payload, error }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    /// Echoed correlation id.
    pub id: CorrelationId,
    /// Result data.
    #[serde(default)]
    pub payload: Value,
    /// Failure text, if the data layer could not satisfy the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireResponse {
    /// Successful response.
    pub fn ok(id: CorrelationId, payload: Value) -> Self {
        Self {
            id,
            payload,
            error: None,
        }
    }

    /// Error response.
    pub fn err(id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    /// True when the data layer reported a failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
