//! Network configuration types for the gateway.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Base path the API and health routes are mounted under (e.g. `/gateway`).
    pub path: String,
    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// How long shutdown waits for active calls before abandoning them.
    pub shutdown_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            path: String::new(),
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 1_048_576, // 1 MiB
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl NetworkConfig {
    /// Joins the base path with `route`, e.g. `/gateway` + `/api`.
    #[must_use]
    pub fn route(&self, route: &str) -> String {
        format!("{}{route}", self.path.trim_end_matches('/'))
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    /// Path to the TLS certificate file.
    pub cert_path: PathBuf,
    /// Path to the TLS private key file.
    pub key_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert!(config.tls.is_none());
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn routes_join_base_path() {
        let mut config = NetworkConfig::default();
        assert_eq!(config.route("/api"), "/api");
        config.path = "/gateway/".to_string();
        assert_eq!(config.route("/api"), "/gateway/api");
        assert_eq!(config.route("/health/live"), "/gateway/health/live");
    }
}
