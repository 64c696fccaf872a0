//! Metrics middleware for dispatched calls.
//!
//! Wraps each call in a `dispatch` tracing span and records the outcome and
//! latency through the `metrics` facade (exported by Prometheus when enabled).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use gantry_core::{DispatchError, Reply};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::observability::metrics::{CALLS_TOTAL, CALL_DURATION_SECONDS};
use crate::service::dispatcher::Call;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label: `ok`, a failed reply's `domain`, or the error kind.
fn outcome_label(result: &Result<Reply, DispatchError>) -> &'static str {
    match result {
        Ok(reply) if reply.code == 0 => "ok",
        Ok(_) => "domain",
        Err(err) => err.kind().as_str(),
    }
}

impl<S> Service<Call> for MetricsService<S>
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
        let backend = call.args.backend.clone();
        let span = info_span!(
            "dispatch",
            method = %call.args.method(),
            trace_id = %call.args.trace_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(CALLS_TOTAL, "backend" => backend.clone(), "outcome" => outcome)
                    .increment(1);
                metrics::histogram!(CALL_DURATION_SECONDS, "backend" => backend)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::info!(duration_ms, outcome, "call complete"),
                    Err(err) => tracing::warn!(duration_ms, outcome, error = %err, "call failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;

    /// Immediately-completing service for metrics testing.
    #[derive(Clone)]
    struct ImmediateService;

    impl Service<Call> for ImmediateService {
        type Response = Reply;
        type Error = DispatchError;
        type Future = Pin<Box<dyn Future<Output = Result<Reply, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            Box::pin(async move { Ok(Reply::ok(serde_json::json!(call.args.backend))) })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let mut call = Call::default();
        call.args.backend = "account".into();

        let reply = svc.oneshot(call).await.unwrap();
        assert_eq!(reply.data, serde_json::json!("account"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&Ok(Reply::default())), "ok");
        assert_eq!(outcome_label(&Ok(Reply::fail(9, "x"))), "domain");
        assert_eq!(
            outcome_label(&Err(DispatchError::MissingTraceHeader)),
            "missing_trace_header"
        );
    }
}
