//! Panic containment middleware.
//!
//! A panic anywhere below this layer, while building the inner future or
//! while polling it, becomes `DispatchError::Internal` carrying the panic
//! message. The task serving the call keeps running.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use gantry_core::{DispatchError, Reply};
use tower::{Layer, Service};
use tracing::error;

use crate::service::dispatcher::Call;

// ---------------------------------------------------------------------------
// RecoverLayer
// ---------------------------------------------------------------------------

/// Tower layer converting panics into `ServerInternalError` results.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverLayer;

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService { inner }
    }
}

// ---------------------------------------------------------------------------
// RecoverService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecoverService<S> {
    inner: S,
}

/// Renders a panic payload as text.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn recovered(trace_id: &str, payload: &(dyn Any + Send)) -> DispatchError {
    let message = panic_message(payload);
    error!(trace_id = %trace_id, panic = %message, "call panicked");
    DispatchError::Internal(anyhow::anyhow!("panic: {message}"))
}

impl<S> Service<Call> for RecoverService<S>
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
        let trace_id = call.args.trace_id.clone();
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(call))) {
            Ok(fut) => fut,
            Err(payload) => {
                let err = recovered(&trace_id, payload.as_ref());
                return Box::pin(async move { Err(err) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(recovered(&trace_id, payload.as_ref())),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
