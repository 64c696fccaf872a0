//! Assembles a runnable gateway from its configuration.
//!
//! Builds the token handler, authorization gate, signer, and backend
//! registry, then wires them into the dispatch pipeline and [`AppState`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::Router;
use gantry_core::{KeyRing, Signer};
use parking_lot::Mutex;
use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{GatewayConfig, TokenType};
use crate::network::{build_router, AppState, ConnectionCounter, NetworkModule, ShutdownController};
use crate::service::auth::{JwtTokenHandler, SessionTokenHandler};
use crate::service::{
    build_dispatch_pipeline, AuthorizationGate, BackendContext, BackendRegistry, Dispatcher,
    Factory, TokenHandler,
};
use crate::store::{spawn_purge_task, KeyValueStore, MemoryStore, NamespacedStore};

/// How often expired store entries are swept by default.
pub const STORE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A fully registered gateway, ready to be served.
pub struct Gateway {
    state: AppState,
    registry: Arc<BackendRegistry>,
    purge_task: JoinHandle<()>,
}

/// Collects backend factories before the gateway is built.
pub struct GatewayBuilder {
    config: GatewayConfig,
    factories: Vec<(String, Factory)>,
    store: Option<Arc<dyn KeyValueStore>>,
    purge_interval: Duration,
}

impl Gateway {
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            factories: Vec::new(),
            store: None,
            purge_interval: STORE_PURGE_INTERVAL,
        }
    }

    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Router serving the API and health routes, for in-process use.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    #[must_use]
    pub fn network(&self) -> NetworkModule {
        NetworkModule::new(self.state.clone())
    }

    /// Stops the store purge task and runs backend cleanup in reverse
    /// registration order.
    pub async fn cleanup(&self) {
        self.purge_task.abort();
        let failures = self.registry.cleanup_all().await;
        info!(
            backends = self.registry.len(),
            failures, "backend cleanup finished"
        );
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.purge_task.abort();
    }
}

impl GatewayBuilder {
    /// Registers `factory` under `name`, in call order.
    #[must_use]
    pub fn backend(mut self, name: impl Into<String>, factory: Factory) -> Self {
        self.factories.push((name.into(), factory));
        self
    }

    /// Replaces the default in-memory store shared by backends and sessions.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets how often expired store entries are removed.
    #[must_use]
    pub fn purge_interval(mut self, every: Duration) -> Self {
        self.purge_interval = every;
        self
    }

    /// Constructs and initializes every backend, then the dispatch pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend fails to register (duplicate name,
    /// factory failure, or failed initialization).
    pub async fn build(self) -> anyhow::Result<Gateway> {
        let Self {
            config,
            factories,
            store,
            purge_interval,
        } = self;
        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let tokens = token_handler(&config, &store);

        let mut gate = AuthorizationGate::new(config.auth.default_policy)
            .with_anonymous(config.auth.anonymous_methods.iter().cloned());
        if let Some(handler) = &tokens {
            gate = gate.with_handler(handler.clone());
        }

        let context = BackendContext::new(&config.app_name, Arc::clone(&store)).with_tokens(tokens);
        let mut registry = BackendRegistry::new();
        for (name, factory) in &factories {
            let ctx = context.clone().with_settings(config.backend_settings(name));
            registry
                .register(name, factory, &ctx)
                .await
                .with_context(|| format!("cannot register backend {name:?}"))?;
        }
        let registry = Arc::new(registry);

        let mut keys = KeyRing::new(&config.signing.global_secret);
        for (client, secret) in &config.signing.clients {
            keys = keys.with_client(client, secret);
        }

        let network = config.network.to_network_config();
        let counter = Arc::new(ConnectionCounter::new());
        let pipeline = build_dispatch_pipeline(
            Dispatcher::new(Arc::clone(&registry), Arc::new(gate)),
            Arc::clone(&counter),
            network.request_timeout,
        );

        info!(
            app = %config.app_name,
            backends = ?registry.names(),
            policy = ?config.auth.default_policy,
            token_type = ?config.auth.token_type,
            clients = keys.client_count(),
            "gateway assembled"
        );

        let shutdown = Arc::new(ShutdownController::new(Arc::clone(&counter)));
        let purge_task = spawn_purge_task(store, purge_interval, shutdown.shutdown_receiver());

        let state = AppState {
            pipeline,
            signer: Arc::new(Signer::new(keys)),
            shutdown,
            counter,
            config: Arc::new(network),
            app_name: Arc::from(config.app_name.as_str()),
            start_time: Instant::now(),
            system: Arc::new(Mutex::new(System::new())),
        };
        Ok(Gateway {
            state,
            registry,
            purge_task,
        })
    }
}

fn token_handler(config: &GatewayConfig, store: &Arc<dyn KeyValueStore>) -> Option<TokenHandler> {
    let auth = &config.auth;
    match auth.token_type {
        TokenType::Jwt => Some(TokenHandler::Jwt(JwtTokenHandler::new(
            &auth.jwt_secret,
            &auth.issuer,
            auth.token_ttl(),
        ))),
        TokenType::Session => Some(TokenHandler::Session(SessionTokenHandler::new(
            Arc::new(NamespacedStore::new(
                &config.app_name,
                "auth",
                Arc::clone(store),
            )),
            auth.token_ttl(),
        ))),
        TokenType::None => None,
    }
}

#[cfg(test)]
mod tests {
    use gantry_core::Identity;

    use super::*;
    use crate::backends::account;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "jwt".to_string();
        config.signing.global_secret = "global".to_string();
        config
            .signing
            .clients
            .insert("web".to_string(), "web-secret".to_string());
        config
    }

    #[tokio::test]
    async fn builds_with_registered_backends() {
        let gateway = Gateway::builder(config())
            .backend("account", account::factory())
            .build()
            .await
            .unwrap();

        assert_eq!(gateway.registry().names(), ["account"]);
        assert_eq!(gateway.state().signer.keys().client_count(), 1);
        assert_eq!(&*gateway.state().app_name, "gantry");
        let _router = gateway.router();
        gateway.cleanup().await;
    }

    #[tokio::test]
    async fn duplicate_backend_aborts_the_build() {
        let result = Gateway::builder(config())
            .backend("account", account::factory())
            .backend("account", account::factory())
            .build()
            .await;

        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("duplicate backend"));
    }

    #[tokio::test]
    async fn session_tokens_live_in_the_auth_namespace() {
        let store = Arc::new(MemoryStore::new());
        let mut config = config();
        config.auth.token_type = TokenType::Session;

        let shared: Arc<dyn KeyValueStore> = store.clone();
        let tokens = token_handler(&config, &shared).unwrap();
        let token = tokens.issue(&Identity::new("alice")).await.unwrap();

        assert_eq!(tokens.kind(), "session");
        assert_eq!(tokens.verify(&token).await.unwrap().subject, "alice");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_sessions_are_purged_without_being_read() {
        let store = Arc::new(MemoryStore::new());
        let mut config = config();
        config.auth.token_type = TokenType::Session;
        config.auth.token_ttl_secs = 60;
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let tokens = token_handler(&config, &shared).unwrap();
        let gateway = Gateway::builder(config)
            .store(shared)
            .purge_interval(Duration::from_secs(30))
            .build()
            .await
            .unwrap();

        for i in 0..1000 {
            tokens.issue(&Identity::new(format!("user-{i}"))).await.unwrap();
        }
        assert_eq!(store.len(), 1000);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(store.len(), 0);

        gateway.state().shutdown.trigger_shutdown();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(gateway.purge_task.is_finished());
    }

    #[test]
    fn no_token_handler_when_disabled() {
        let mut config = config();
        config.auth.token_type = TokenType::None;
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(token_handler(&config, &store).is_none());
    }
}
