//! Pipeline composition: wraps the dispatcher with the call middleware.

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;

use super::accounting::{AccountingLayer, AccountingService};
use super::metrics::{MetricsLayer, MetricsService};
use super::recover::{RecoverLayer, RecoverService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::network::counter::ConnectionCounter;
use crate::service::dispatcher::Dispatcher;

/// Concrete service type produced by [`build_dispatch_pipeline`].
///
/// Spelled out rather than boxed so it stays `Clone + Sync` for axum state.
pub type DispatchPipeline =
    AccountingService<MetricsService<TimeoutService<RecoverService<Dispatcher>>>>;

/// Build the dispatch pipeline around a `Dispatcher`.
///
/// Layer order (outermost to innermost):
/// 1. `AccountingLayer` -- active/executed/error counters, balanced even on panic
/// 2. `MetricsLayer` -- tracing span, call counter and latency histogram
/// 3. `TimeoutLayer` -- calls running past `request_timeout` become `ServerInternalError`
/// 4. `RecoverLayer` -- turns panics into `ServerInternalError`
#[must_use]
pub fn build_dispatch_pipeline(
    dispatcher: Dispatcher,
    counter: Arc<ConnectionCounter>,
    request_timeout: Duration,
) -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(AccountingLayer::new(counter))
        .layer(MetricsLayer)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RecoverLayer)
        .service(dispatcher)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use gantry_core::{Args, ErrorKind, Reply};
    use tower::ServiceExt;

    use super::*;
    use crate::service::auth::{AuthorizationGate, DefaultPolicy, JwtTokenHandler, TokenHandler};
    use crate::service::backend::{BackendContext, BackendModule, Factory};
    use crate::service::dispatcher::Call;
    use crate::service::framework::{Backend, Endpoint, Operation};
    use crate::service::registry::BackendRegistry;
    use crate::store::MemoryStore;

    async fn pipeline(counter: Arc<ConnectionCounter>) -> DispatchPipeline {
        pipeline_with_timeout(counter, Duration::from_secs(30)).await
    }

    async fn pipeline_with_timeout(
        counter: Arc<ConnectionCounter>,
        request_timeout: Duration,
    ) -> DispatchPipeline {
        let factory: Factory = Arc::new(
            |name: &str, ctx: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
                Ok(Arc::new(Backend::new(name, "", ctx).endpoint(
                    Endpoint::new("e", "")
                        .operation(Operation::new("ok", "").handler(|_| async {
                            Ok(Reply::default())
                        }))
                        .operation(Operation::new("panic", "").handler(|call| async move {
                            if call.args.trace_id.is_empty() {
                                return Ok(Reply::default());
                            }
                            panic!("handler failed for {}", call.args.trace_id)
                        }))
                        .operation(Operation::new("slow", "").handler(|_| async {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            Ok(Reply::default())
                        })),
                )))
            },
        );
        let mut registry = BackendRegistry::new();
        let ctx = BackendContext::new("gantry", Arc::new(MemoryStore::new()));
        registry.register("demo", &factory, &ctx).await.unwrap();
        let gate = AuthorizationGate::new(DefaultPolicy::Allow).with_handler(TokenHandler::Jwt(
            JwtTokenHandler::new("k", "gantry", Duration::from_secs(60)),
        ));
        build_dispatch_pipeline(
            Dispatcher::new(Arc::new(registry), Arc::new(gate)),
            counter,
            request_timeout,
        )
    }

    fn call(operation: &str) -> Call {
        Call::new(
            Args {
                backend: "demo".into(),
                endpoint: "e".into(),
                operation: operation.into(),
                trace_id: "t-1".into(),
                ..Args::default()
            },
            "",
        )
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let counter = Arc::new(ConnectionCounter::new());
        let svc = pipeline(Arc::clone(&counter)).await;
        svc.oneshot(call("ok")).await.unwrap();
        assert_eq!(counter.snapshot().executed, 1);
        assert_eq!(counter.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn handler_panic_is_contained_and_counted() {
        let counter = Arc::new(ConnectionCounter::new());
        let svc = pipeline(Arc::clone(&counter)).await;

        let err = svc.clone().oneshot(call("panic")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerInternalError);
        assert!(err.to_string().contains("handler failed for t-1"));

        // The pipeline keeps serving after a panic.
        svc.oneshot(call("ok")).await.unwrap();

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.executed, 2);
        assert_eq!(snapshot.errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_is_counted_as_error() {
        let counter = Arc::new(ConnectionCounter::new());
        let svc = pipeline_with_timeout(Arc::clone(&counter), Duration::from_secs(1)).await;

        let err = svc.oneshot(call("slow")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerInternalError);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.executed, 1);
        assert_eq!(snapshot.errors, 1);
    }
}
