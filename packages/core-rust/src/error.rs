//! Error taxonomy shared by the gateway, backend modules, and clients.
//!
//! Every failure that can reach the wire maps to an [`ErrorKind`] with a
//! stable numeric code. Codes are part of the client contract and must never
//! be renumbered.

use std::fmt;

/// Machine-readable classification of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing request fields, or data not matching the input shape.
    ValidationFailed,
    /// The call carries no trace identifier.
    MissingTraceHeader,
    /// Signature absent, unverifiable, or not matching the payload.
    InvalidSignature,
    /// Token missing or rejected by the token handler.
    InvalidToken,
    /// No backend module registered under the requested name.
    BackendNotFound,
    /// The backend has no endpoint with the requested pattern.
    EndpointNotFound,
    /// The endpoint has no operation with the requested name.
    OperationNotFound,
    /// A runtime fault was caught at the call boundary.
    ServerInternalError,
    /// An operation was declared without a handler.
    OperationHandlerMissing,
    /// A backend name was registered twice.
    DuplicateBackend,
    /// No token handler is configured, so no call can be authorized.
    AuthorizationUnavailable,
    /// Failure reported by a backend handler with its own code.
    Domain,
}

impl ErrorKind {
    /// Stable wire code. `Domain` has no fixed code; see [`DispatchError::code`].
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ValidationFailed => 4000,
            Self::MissingTraceHeader => 4001,
            Self::InvalidSignature => 4010,
            Self::InvalidToken => 4011,
            Self::BackendNotFound => 4040,
            Self::EndpointNotFound => 4041,
            Self::OperationNotFound => 4042,
            Self::ServerInternalError | Self::Domain => 5000,
            Self::OperationHandlerMissing => 5001,
            Self::DuplicateBackend => 5002,
            Self::AuthorizationUnavailable => 5030,
        }
    }

    /// Returns a `snake_case` label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::MissingTraceHeader => "missing_trace_header",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidToken => "invalid_token",
            Self::BackendNotFound => "backend_not_found",
            Self::EndpointNotFound => "endpoint_not_found",
            Self::OperationNotFound => "operation_not_found",
            Self::ServerInternalError => "server_internal_error",
            Self::OperationHandlerMissing => "operation_handler_missing",
            Self::DuplicateBackend => "duplicate_backend",
            Self::AuthorizationUnavailable => "authorization_unavailable",
            Self::Domain => "domain",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced anywhere on the dispatch path.
///
/// Configuration-time variants (`DuplicateBackend`, `OperationHandlerMissing`
/// raised during initialization) abort startup; every other variant is
/// converted into a signed response by the transport.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("trace id header is required")]
    MissingTraceHeader,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("backend not found: {name}")]
    BackendNotFound { name: String },

    #[error("endpoint not found: {backend}.{endpoint}")]
    EndpointNotFound { backend: String, endpoint: String },

    #[error("operation not found: {backend}.{endpoint}.{operation}")]
    OperationNotFound {
        backend: String,
        endpoint: String,
        operation: String,
    },

    #[error("operation handler missing: {method}")]
    OperationHandlerMissing { method: String },

    #[error("duplicate backend: {name}")]
    DuplicateBackend { name: String },

    #[error("authorization unavailable")]
    AuthorizationUnavailable,

    #[error("server internal error: {0:#}")]
    Internal(#[from] anyhow::Error),

    #[error("{message}")]
    Domain { code: i32, message: String },
}

impl DispatchError {
    /// Builds a handler-level failure with a backend-specific code.
    ///
    /// Code 0 means success on the wire, so it is reported as 5000 instead.
    pub fn domain(code: i32, message: impl Into<String>) -> Self {
        Self::Domain {
            code,
            message: message.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::MissingTraceHeader => ErrorKind::MissingTraceHeader,
            Self::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Self::InvalidToken(_) => ErrorKind::InvalidToken,
            Self::BackendNotFound { .. } => ErrorKind::BackendNotFound,
            Self::EndpointNotFound { .. } => ErrorKind::EndpointNotFound,
            Self::OperationNotFound { .. } => ErrorKind::OperationNotFound,
            Self::OperationHandlerMissing { .. } => ErrorKind::OperationHandlerMissing,
            Self::DuplicateBackend { .. } => ErrorKind::DuplicateBackend,
            Self::AuthorizationUnavailable => ErrorKind::AuthorizationUnavailable,
            Self::Internal(_) => ErrorKind::ServerInternalError,
            Self::Domain { .. } => ErrorKind::Domain,
        }
    }

    /// Wire code reported to the client.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Domain { code, .. } if *code != 0 => *code,
            other => other.kind().code(),
        }
    }
}

/// Convenience alias used throughout the dispatch path.
pub type DispatchResult<T> = Result<T, DispatchError>;
