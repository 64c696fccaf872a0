//! Internal request (`Args`) and reply (`Reply`) types handed to backend modules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::MethodPath;

/// Header name → values in arrival order. Names are stored lower-case.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Network facts about the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// Identity attached to a call by the authorization gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier of the authenticated principal.
    pub subject: String,
    /// Additional claims carried by the token.
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: Map::new(),
        }
    }

    /// Adds a claim, replacing any previous value under `key`.
    #[must_use]
    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }
}

/// A single logical call, built once by the transport and read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Args {
    pub backend: String,
    pub endpoint: String,
    pub operation: String,
    pub data: Value,
    pub headers: Headers,
    pub connection: Connection,
    pub trace_id: String,
    /// `None` for anonymous calls.
    pub authorized: Option<Identity>,
}

impl Args {
    /// Creates call arguments for an already parsed method.
    #[must_use]
    pub fn new(path: MethodPath, data: Value) -> Self {
        Self {
            backend: path.backend,
            endpoint: path.endpoint,
            operation: path.operation,
            data,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Returns the `backend.endpoint.operation` string this call targets.
    #[must_use]
    pub fn method(&self) -> String {
        format!("{}.{}.{}", self.backend, self.endpoint, self.operation)
    }

    /// Returns the first value of header `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Deserializes the payload into a typed view.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload does not match `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Page metadata for list-style replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
}

/// Result populated by an operation handler. `code == 0` means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub code: i32,
    pub message: String,
    pub data: Value,
    pub pagination: Option<Pagination>,
}

impl Reply {
    /// Successful reply carrying `data`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Failed reply with a backend-specific code.
    pub fn fail(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}
