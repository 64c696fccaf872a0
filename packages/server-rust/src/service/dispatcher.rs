//! Routes a call to its backend module after validation and authorization.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use gantry_core::{Args, DispatchError, DispatchResult, MethodPath, Reply};
use tower::Service;
use tracing::Level;

use super::auth::AuthorizationGate;
use super::registry::BackendRegistry;

/// One inbound call: the arguments plus the caller's bearer token.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub args: Args,
    pub token: String,
}

impl Call {
    #[must_use]
    pub fn new(args: Args, token: impl Into<String>) -> Self {
        Self {
            args,
            token: token.into(),
        }
    }
}

/// Innermost service of the dispatch pipeline.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    gate: Arc<AuthorizationGate>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>, gate: Arc<AuthorizationGate>) -> Self {
        Self { registry, gate }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Validates, authorizes, and forwards `call` to its backend.
    ///
    /// # Errors
    ///
    /// In order of evaluation: `ValidationFailed`, `MissingTraceHeader`,
    /// `BackendNotFound`, the gate's error, then whatever the backend returns.
    pub async fn dispatch(&self, call: Call) -> DispatchResult<Reply> {
        let Call { mut args, token } = call;

        for segment in [&args.backend, &args.endpoint, &args.operation] {
            if !MethodPath::is_valid_segment(segment) {
                return Err(DispatchError::ValidationFailed(format!(
                    "invalid method {:?}",
                    args.method()
                )));
            }
        }
        if args.trace_id.is_empty() {
            return Err(DispatchError::MissingTraceHeader);
        }

        let backend = self
            .registry
            .get(&args.backend)
            .ok_or_else(|| DispatchError::BackendNotFound {
                name: args.backend.clone(),
            })?;

        args.authorized = self.gate.authorize(&args.method(), &token).await?;

        if tracing::enabled!(Level::TRACE) {
            tracing::trace!(
                trace_id = %args.trace_id,
                args = %redacted_json(&args),
                "dispatch request"
            );
        }
        let trace_id = args.trace_id.clone();
        let reply = backend.handle_request(args).await?;
        if tracing::enabled!(Level::TRACE) {
            tracing::trace!(
                trace_id = %trace_id,
                reply = %serde_json::to_string(&reply).unwrap_or_default(),
                "dispatch reply"
            );
        }
        Ok(reply)
    }
}

/// Headers whose values never reach the trace log.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "set-cookie"];

/// Renders `args` as JSON with credential-bearing header values masked.
fn redacted_json(args: &Args) -> String {
    let mut shown = args.clone();
    for name in REDACTED_HEADERS {
        if let Some(values) = shown.headers.get_mut(name) {
            for value in values.iter_mut() {
                "[redacted]".clone_into(value);
            }
        }
    }
    serde_json::to_string(&shown).unwrap_or_default()
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("gate", &self.gate)
            .finish()
    }
}

impl Service<Call> for Dispatcher {
    type Response = Reply;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult<Reply>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch(call).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
