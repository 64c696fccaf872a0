//! Metric names and the optional Prometheus exporter.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Counter of dispatched calls, labelled by `backend` and `outcome`.
pub const CALLS_TOTAL: &str = "gantry_calls_total";

/// Histogram of call latency in seconds, labelled by `backend`.
pub const CALL_DURATION_SECONDS: &str = "gantry_call_duration_seconds";

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(CALLS_TOTAL, "Total number of dispatched calls");
    metrics::describe_histogram!(
        CALL_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Dispatch latency in seconds"
    );
}

/// Installs the global Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn install_prometheus(address: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {e}"))?;
    describe_metrics();
    info!(%address, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describing_without_recorder_is_harmless() {
        describe_metrics();
    }

    #[test]
    fn metric_names_are_namespaced() {
        for name in [CALLS_TOTAL, CALL_DURATION_SECONDS] {
            assert!(name.starts_with("gantry_"));
        }
    }
}
