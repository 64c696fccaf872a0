//! HTTP handler definitions for the gateway.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod api;
pub mod health;

pub use api::api_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use gantry_core::Signer;
use parking_lot::Mutex;
use sysinfo::System;

use super::counter::ConnectionCounter;
use super::{NetworkConfig, ShutdownController};
use crate::service::DispatchPipeline;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch pipeline every `/api` call runs through.
    pub pipeline: DispatchPipeline,
    /// Verifies inbound envelopes and seals outbound responses.
    pub signer: Arc<Signer>,
    pub counter: Arc<ConnectionCounter>,
    /// Graceful shutdown controller with health state.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, TLS, limits).
    pub config: Arc<NetworkConfig>,
    /// Copied into the `x-application` header of every call.
    pub app_name: Arc<str>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
    /// Reused between health requests so memory figures refresh in place.
    pub system: Arc<Mutex<System>>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use gantry_core::{KeyRing, Reply, Signer};
    use parking_lot::Mutex;
    use serde_json::json;
    use sysinfo::System;

    use super::AppState;
    use crate::network::counter::ConnectionCounter;
    use crate::network::{NetworkConfig, ShutdownController};
    use crate::service::auth::JwtTokenHandler;
    use crate::service::{
        build_dispatch_pipeline, AuthorizationGate, Backend, BackendContext, BackendModule,
        BackendRegistry, DefaultPolicy, Dispatcher, Endpoint, Factory, Operation, TokenHandler,
    };
    use crate::store::MemoryStore;

    pub const CLIENT: &str = "web";
    pub const CLIENT_SECRET: &str = "web-secret";

    /// State with one `demo` backend exposing `demo.echo.data`.
    pub async fn state(policy: DefaultPolicy) -> AppState {
        let factory: Factory = Arc::new(
            |name: &str, ctx: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
                Ok(Arc::new(Backend::new(name, "echo", ctx).endpoint(
                    Endpoint::new("echo", "").operation(Operation::new("data", "").handler(
                        |call| async move {
                            Ok(Reply::ok(json!({
                                "data": &call.args.data,
                                "application": call.args.header("x-application"),
                                "remote": &call.args.connection.remote_addr,
                            })))
                        },
                    )),
                )))
            },
        );
        let mut registry = BackendRegistry::new();
        let ctx = BackendContext::new("gantry", Arc::new(MemoryStore::new()));
        registry.register("demo", &factory, &ctx).await.unwrap();

        let gate = AuthorizationGate::new(policy).with_handler(TokenHandler::Jwt(
            JwtTokenHandler::new("jwt-secret", "gantry", Duration::from_secs(60)),
        ));
        let config = NetworkConfig::default();
        let counter = Arc::new(ConnectionCounter::new());
        let pipeline = build_dispatch_pipeline(
            Dispatcher::new(Arc::new(registry), Arc::new(gate)),
            Arc::clone(&counter),
            config.request_timeout,
        );
        AppState {
            pipeline,
            signer: Arc::new(Signer::new(
                KeyRing::new("global-secret").with_client(CLIENT, CLIENT_SECRET),
            )),
            shutdown: Arc::new(ShutdownController::new(Arc::clone(&counter))),
            counter,
            config: Arc::new(config),
            app_name: Arc::from("gantry"),
            start_time: Instant::now(),
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}
