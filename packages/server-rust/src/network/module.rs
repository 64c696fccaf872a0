//! Network module with deferred startup lifecycle.
//!
//! `new()` takes the assembled application state, `start()` binds the TCP
//! listener, and `serve()` accepts connections until the shutdown signal.
//! Binding separately lets the caller learn the OS-assigned port before
//! traffic is accepted.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use super::config::TlsConfig;
use super::handlers::{
    api_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Assembles the axum router with all routes and middleware.
///
/// Routes, relative to the configured base path:
/// - `POST /api` -- signed RPC envelope
/// - `GET /health` -- detailed health JSON
/// - `GET /health/live` -- Kubernetes liveness check
/// - `GET /health/ready` -- Kubernetes readiness check
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    Router::new()
        .route(&config.route("/api"), post(api_handler))
        .route(&config.route("/health"), get(health_handler))
        .route(&config.route("/health/live"), get(liveness_handler))
        .route(&config.route("/health/ready"), get(readiness_handler))
        .layer(build_http_layers(&config))
        .with_state(state)
}

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- keeps the application state; nothing is bound yet
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled, then drains
pub struct NetworkModule {
    state: AppState,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let config = &self.state.config;
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %config.host, port, path = %config.path, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves.
    ///
    /// After the signal:
    /// 1. Health state transitions to Draining and no new connections are accepted
    /// 2. Waits up to `shutdown_timeout` for active calls to finish
    /// 3. Health state transitions to Stopped (unless the deadline passed)
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, the TLS
    /// certificates cannot be loaded, or the server hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let shutdown_ctrl = Arc::clone(&self.state.shutdown);
        let config = Arc::clone(&self.state.config);
        let router = build_router(self.state);

        let ctrl = Arc::clone(&shutdown_ctrl);
        let signal = async move {
            shutdown.await;
            info!("shutdown signal received");
            ctrl.trigger_shutdown();
        };

        // Transition to Ready so readiness checks pass.
        shutdown_ctrl.set_ready();

        if let Some(tls_config) = &config.tls {
            serve_tls(
                listener,
                router,
                tls_config,
                shutdown_ctrl,
                config.shutdown_timeout,
                signal,
            )
            .await
        } else {
            serve_plain(listener, router, shutdown_ctrl, config.shutdown_timeout, signal).await
        }
    }
}

/// Serves plain HTTP connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown_ctrl: Arc<ShutdownController>,
    timeout: Duration,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .into_future(),
    );

    let mut stopping = shutdown_ctrl.shutdown_receiver();
    tokio::select! {
        joined = &mut server => return Ok(joined??),
        () = stopped(&mut stopping) => {}
    }

    finish_within(&mut server, &shutdown_ctrl, Instant::now() + timeout).await
}

/// Drains active calls and waits for the server task, both against one
/// `deadline`. Whatever is still running at the deadline is aborted.
async fn finish_within(
    server: &mut JoinHandle<std::io::Result<()>>,
    shutdown_ctrl: &ShutdownController,
    deadline: Instant,
) -> anyhow::Result<()> {
    if drain_connections(shutdown_ctrl, deadline).await {
        if let Ok(joined) = tokio::time::timeout_at(deadline, &mut *server).await {
            return Ok(joined??);
        }
        warn!("server did not close its connections in time");
    }
    server.abort();
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &TlsConfig,
    shutdown_ctrl: Arc<ShutdownController>,
    timeout: Duration,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let (deadline_tx, deadline_rx) = tokio::sync::oneshot::channel();

    // axum-server enforces the drain deadline itself once graceful
    // shutdown starts.
    tokio::spawn(async move {
        signal.await;
        let _ = deadline_tx.send(Instant::now() + timeout);
        shutdown_handle.graceful_shutdown(Some(timeout));
    });

    info!(%addr, "Serving TLS connections");

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    let deadline = deadline_rx.await.unwrap_or_else(|_| Instant::now());
    drain_connections(&shutdown_ctrl, deadline).await;
    Ok(())
}

/// Resolves once the shutdown flag flips (or its sender is gone).
async fn stopped(receiver: &mut watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            return;
        }
    }
}

/// Waits for active calls to finish; `true` when none were abandoned.
async fn drain_connections(shutdown_ctrl: &ShutdownController, deadline: Instant) -> bool {
    let active = shutdown_ctrl.counter().active();
    if active > 0 {
        info!(active, "Draining active calls");
    }

    let drained = shutdown_ctrl.wait_for_drain_until(deadline).await;
    if drained {
        info!("All calls drained");
    } else {
        warn!(
            active = shutdown_ctrl.counter().active(),
            "Drain timeout expired with calls still running"
        );
    }
    drained
}
