//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use sysinfo::System;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the server is actually serving. This lets monitoring tools
/// distinguish between "server is up but draining" vs "server is down".
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let health = state.shutdown.health_state();
    let connections = state.counter.snapshot();
    let uptime_secs = state.start_time.elapsed().as_secs();
    let memory = memory_usage(&mut state.system.lock());
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

    Json(json!({
        "status": "UP",
        "state": health.as_str(),
        "connections": connections,
        "memory": memory,
        "cpus": cpus,
        "uptime_secs": uptime_secs,
    }))
}

fn memory_usage(system: &mut System) -> Value {
    system.refresh_memory();
    let (rss_bytes, virtual_bytes) = sysinfo::get_current_pid()
        .ok()
        .filter(|pid| system.refresh_process(*pid))
        .and_then(|pid| system.process(pid))
        .map_or((0, 0), |process| (process.memory(), process.virtual_memory()));

    json!({
        "rss_bytes": rss_bytes,
        "virtual_bytes": virtual_bytes,
        "system_total_bytes": system.total_memory(),
        "system_used_bytes": system.used_memory(),
    })
}

/// Kubernetes liveness check -- always returns 200 OK.
///
/// The liveness check only verifies whether the process is running and
/// responsive. It does not check health state, because a failed liveness
/// check triggers a pod restart.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness check -- returns 200 when ready, 503 otherwise.
///
/// Returns 503 while backends are still registering, during graceful
/// shutdown (Draining state), and after stop.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
