//! Gateway configuration: command-line flags layered over an optional TOML file.
//!
//! ```toml
//! app_name = "shop"
//!
//! [network]
//! port = 8080
//! path = "/gateway"
//!
//! [auth]
//! default_policy = "deny"
//! anonymous_methods = ["account.user.login"]
//! token_type = "jwt"
//! jwt_secret = "change-me"
//!
//! [signing]
//! global_secret = "gateway-secret"
//! clients = { web = "web-secret" }
//!
//! [backends.account.users]
//! alice = "wonderland"
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use gantry_core::MethodPath;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use crate::network::{NetworkConfig, TlsConfig};
use crate::observability::LogSettings;
use crate::service::DefaultPolicy;

/// Command-line flags. Every flag can also come from a `GANTRY_*` variable.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "gantry-server", version, about = "Signed RPC gateway")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "GANTRY_CONFIG")]
    pub config: Option<PathBuf>,
    /// Application name, used for key namespacing and log file names.
    #[arg(long, env = "GANTRY_APP")]
    pub app: Option<String>,
    #[arg(long, env = "GANTRY_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "GANTRY_PORT")]
    pub port: Option<u16>,
    /// Base path the routes are mounted under, e.g. `/gateway`.
    #[arg(long, env = "GANTRY_PATH")]
    pub path: Option<String>,
    /// Log filter directive used when `RUST_LOG` is unset.
    #[arg(long, env = "GANTRY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub app_name: String,
    pub network: NetworkSection,
    pub auth: AuthSection,
    pub signing: SigningSection,
    pub logging: LogSettings,
    pub observability: ObservabilitySection,
    /// Free-form settings per backend, handed to its factory.
    pub backends: BTreeMap<String, Map<String, Value>>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            app_name: "gantry".to_string(),
            network: NetworkSection::default(),
            auth: AuthSection::default(),
            signing: SigningSection::default(),
            logging: LogSettings::default(),
            observability: ObservabilitySection::default(),
            backends: BTreeMap::new(),
        }
    }
}

/// `[network]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub shutdown_timeout_secs: u64,
    pub tls: Option<TlsConfig>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: String::new(),
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            max_body_bytes: 1_048_576,
            shutdown_timeout_secs: 10,
            tls: None,
        }
    }
}

impl NetworkSection {
    #[must_use]
    pub fn to_network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            tls: self.tls.clone(),
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_body_bytes: self.max_body_bytes,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

/// Which token handler the gateway installs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    #[default]
    Jwt,
    Session,
    /// No handler: every call the policy does not let through fails with
    /// `AuthorizationUnavailable`.
    None,
}

/// `[auth]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    pub default_policy: DefaultPolicy,
    /// Methods (`backend.endpoint.operation`) callable without a token.
    pub anonymous_methods: Vec<String>,
    pub token_type: TokenType,
    pub jwt_secret: String,
    pub issuer: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            default_policy: DefaultPolicy::Deny,
            anonymous_methods: Vec::new(),
            token_type: TokenType::Jwt,
            jwt_secret: String::new(),
            issuer: "gantry".to_string(),
            token_ttl_secs: 3600,
        }
    }
}

impl AuthSection {
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// `[signing]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningSection {
    /// Signs responses to callers without a registered client id.
    pub global_secret: String,
    /// Client id → shared secret.
    pub clients: BTreeMap<String, String>,
}

/// `[observability]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilitySection {
    /// Address of the Prometheus scrape endpoint. Disabled when unset.
    pub metrics_address: Option<SocketAddr>,
}

impl GatewayConfig {
    /// Reads the file named by `--config` (if any), applies the flags, and validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if the
    /// merged configuration is invalid.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed TOML or unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overrides file values with the flags that were given.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(app) = &cli.app {
            self.app_name.clone_from(app);
        }
        if let Some(host) = &cli.host {
            self.network.host.clone_from(host);
        }
        if let Some(port) = cli.port {
            self.network.port = port;
        }
        if let Some(path) = &cli.path {
            self.network.path.clone_from(path);
        }
        if let Some(level) = &cli.log_level {
            self.logging.level.clone_from(level);
        }
    }

    /// Checks every semantic rule and reports all violations together.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` listing each problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !MethodPath::is_valid_segment(&self.app_name) {
            errors.push(format!("app_name {:?} must match [A-Za-z0-9_-]+", self.app_name));
        }

        let network = &self.network;
        if !network.path.is_empty() && !network.path.starts_with('/') {
            errors.push(format!("network.path {:?} must start with '/'", network.path));
        }
        if network.request_timeout_secs == 0 {
            errors.push("network.request_timeout_secs must be positive".to_string());
        }
        if network.max_body_bytes == 0 {
            errors.push("network.max_body_bytes must be positive".to_string());
        }

        let auth = &self.auth;
        if auth.token_type == TokenType::Jwt && auth.jwt_secret.is_empty() {
            errors.push("auth.jwt_secret is required when auth.token_type is \"jwt\"".to_string());
        }
        if auth.token_type != TokenType::None && auth.token_ttl_secs == 0 {
            errors.push("auth.token_ttl_secs must be positive".to_string());
        }
        for method in &auth.anonymous_methods {
            if MethodPath::parse(method).is_err() {
                errors.push(format!(
                    "auth.anonymous_methods entry {method:?} is not backend.endpoint.operation"
                ));
            }
        }

        if self.signing.global_secret.is_empty() {
            errors.push("signing.global_secret is required".to_string());
        }
        for (client, secret) in &self.signing.clients {
            if secret.is_empty() {
                errors.push(format!("signing.clients.{client} has an empty secret"));
            }
        }

        if let Err(e) = EnvFilter::try_new(&self.logging.level) {
            errors.push(format!("logging.level {:?}: {e}", self.logging.level));
        }

        for name in self.backends.keys() {
            if !MethodPath::is_valid_segment(name) {
                errors.push(format!("backends.{name} is not a valid backend name"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Settings table for `backend`, empty when none was configured.
    #[must_use]
    pub fn backend_settings(&self, backend: &str) -> Map<String, Value> {
        self.backends.get(backend).cloned().unwrap_or_default()
    }
}
