//! Call accounting middleware.
//!
//! Holds a [`CallGuard`] for the whole call and marks the call failed when
//! it ends in an error or a reply with a non-zero code.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use gantry_core::{DispatchError, Reply};
use tower::{Layer, Service};

use crate::network::counter::{CallGuard, ConnectionCounter};
use crate::service::dispatcher::Call;

// ---------------------------------------------------------------------------
// AccountingLayer
// ---------------------------------------------------------------------------

/// Tower layer that updates a [`ConnectionCounter`] around every call.
#[derive(Debug, Clone)]
pub struct AccountingLayer {
    counter: Arc<ConnectionCounter>,
}

impl AccountingLayer {
    #[must_use]
    pub fn new(counter: Arc<ConnectionCounter>) -> Self {
        Self { counter }
    }
}

impl<S> Layer<S> for AccountingLayer {
    type Service = AccountingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccountingService {
            inner,
            counter: Arc::clone(&self.counter),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountingService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AccountingService<S> {
    inner: S,
    counter: Arc<ConnectionCounter>,
}

impl<S> Service<Call> for AccountingService<S>
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
        let guard: CallGuard = self.counter.guard();
        let fut = self.inner.call(call);

        Box::pin(async move {
            let result = fut.await;
            match &result {
                Ok(reply) if reply.code == 0 => {}
                _ => guard.fail(),
            }
            drop(guard);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
