//! `gantry-server`: runs the gateway with the built-in backends.

use anyhow::Context as _;
use clap::Parser;
use gantry_server::backends;
use gantry_server::config::{Cli, GatewayConfig};
use gantry_server::gateway::Gateway;
use gantry_server::observability::{metrics, LoggingService};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(&cli).context("loading configuration")?;

    let logging = LoggingService::start(&config.app_name, &config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), app = %config.app_name, "gantry starting");

    if let Some(address) = config.observability.metrics_address {
        metrics::install_prometheus(address)?;
    }

    let mut builder = Gateway::builder(config);
    for (name, factory) in backends::builtin() {
        builder = builder.backend(name, factory);
    }
    let gateway = builder.build().await?;

    let mut network = gateway.network();
    let port = network.start().await?;
    info!(port, "gantry ready");

    let served = network.serve(shutdown_signal()).await;
    gateway.cleanup().await;
    if let Err(e) = &served {
        error!(error = %e, "server stopped with an error");
    }
    info!("gantry stopped");
    logging.shutdown();
    served
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
