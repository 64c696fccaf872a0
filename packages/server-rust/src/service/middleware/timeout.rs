//! Deadline middleware for dispatched calls.
//!
//! A call still running after the configured request timeout is dropped and
//! reported as `ServerInternalError`, so the transport answers it with a
//! signed response like any other failure.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use gantry_core::{DispatchError, Reply};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::dispatcher::Call;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing one deadline for every call.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Call> for TimeoutService<S>
where
    S: Service<Call, Response = Reply, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Reply;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Reply, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let timeout = self.timeout;
        let trace_id = call.args.trace_id.clone();
        let fut = self.inner.call(call);
        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = timeout.as_millis() as u64;
                    warn!(trace_id = %trace_id, timeout_ms, "call timed out");
                    Err(DispatchError::Internal(anyhow::anyhow!(
                        "call timed out after {timeout_ms} ms"
                    )))
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
