//! Wire-level request envelope and response.
//!
//! Both types serialize as flat JSON objects. Field names are part of the
//! signing canonical form (see [`crate::sign`]), so renaming any of them is a
//! protocol change.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::{Pagination, Reply};
use crate::error::{DispatchError, DispatchResult};

/// Inbound RPC request as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target in the form `backend.endpoint.operation`.
    pub method: String,
    /// Opaque payload, usually a JSON object or a JSON-encoded string.
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub sign_type: String,
}

impl Envelope {
    /// Creates an unsigned envelope for `method` carrying `data`.
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
            ..Self::default()
        }
    }

    /// Parses the method string into its three segments.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` unless the method has exactly three
    /// non-empty segments.
    pub fn method_path(&self) -> DispatchResult<MethodPath> {
        MethodPath::parse(&self.method)
    }
}

/// A parsed `backend.endpoint.operation` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    pub backend: String,
    pub endpoint: String,
    pub operation: String,
}

impl MethodPath {
    /// Splits and validates a method string.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` when the string does not consist of exactly
    /// three dot-separated segments made of `[A-Za-z0-9_-]`.
    pub fn parse(method: &str) -> DispatchResult<Self> {
        let segments: Vec<&str> = method.split('.').collect();
        let [backend, endpoint, operation] = segments.as_slice() else {
            return Err(DispatchError::ValidationFailed(format!(
                "method must be backend.endpoint.operation, got {method:?}"
            )));
        };
        for segment in [backend, endpoint, operation] {
            if !Self::is_valid_segment(segment) {
                return Err(DispatchError::ValidationFailed(format!(
                    "invalid method segment {segment:?} in {method:?}"
                )));
            }
        }
        Ok(Self {
            backend: (*backend).to_string(),
            endpoint: (*endpoint).to_string(),
            operation: (*operation).to_string(),
        })
    }

    /// Returns `true` when `segment` would be accepted as a method segment.
    #[must_use]
    pub fn is_valid_segment(segment: &str) -> bool {
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }
}

impl std::fmt::Display for MethodPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.backend, self.endpoint, self.operation)
    }
}

/// Outbound response. HTTP status is always 200; `code` carries the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: i32,
    pub message: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub trace_id: String,
    /// Unix time in milliseconds at which the response was built.
    pub timestamp: i64,
    pub sign: String,
}

impl Response {
    /// Builds an unsigned response for `trace_id` from a dispatch outcome.
    ///
    /// A reply with a non-zero code is reported as a failure: its code and
    /// message are kept, its data is dropped.
    #[must_use]
    pub fn from_outcome(trace_id: impl Into<String>, outcome: &DispatchResult<Reply>) -> Self {
        let mut response = Self {
            trace_id: trace_id.into(),
            timestamp: now_millis(),
            ..Self::default()
        };
        match outcome {
            Ok(reply) if reply.code == 0 => {
                response.message.clone_from(&reply.message);
                response.content = reply.data.clone();
                response.pagination.clone_from(&reply.pagination);
            }
            Ok(reply) => {
                response.code = reply.code;
                response.message.clone_from(&reply.message);
            }
            Err(err) => {
                response.code = err.code();
                response.message = err.to_string();
            }
        }
        response
    }

    /// Builds an unsigned failure response.
    #[must_use]
    pub fn from_error(trace_id: impl Into<String>, err: &DispatchError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            trace_id: trace_id.into(),
            timestamp: now_millis(),
            ..Self::default()
        }
    }

    /// Returns `true` when the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
