//! Backend module contract and the context passed to backend factories.

use std::sync::Arc;

use async_trait::async_trait;
use gantry_core::{Args, DispatchResult, Reply, Shape};
use serde::Serialize;
use serde_json::{Map, Value};

use super::auth::TokenHandler;
use crate::store::{KeyValueStore, NamespacedStore};

/// A named service that owns an endpoint/operation tree.
///
/// Lifecycle: constructed by a [`Factory`], `initialize`d once before
/// registration, serves `handle_request` concurrently, and is `cleanup`ed
/// once at shutdown.
#[async_trait]
pub trait BackendModule: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Validates the module and runs its startup hook.
    async fn initialize(&self) -> DispatchResult<()>;

    /// Serves one call addressed to this module.
    async fn handle_request(&self, args: Args) -> DispatchResult<Reply>;

    /// Releases resources. Called once, in reverse registration order.
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// Self-description of every endpoint and operation. Built once.
    fn documents(&self) -> Arc<DocumentsReply>;
}

/// Builds a backend module for the given registration name.
pub type Factory =
    Arc<dyn Fn(&str, &BackendContext) -> anyhow::Result<Arc<dyn BackendModule>> + Send + Sync>;

/// Resources a backend module is constructed with.
#[derive(Clone)]
pub struct BackendContext {
    pub app_name: String,
    /// Key-value store. Scoped to `<app>:<backend>:` once passed to a factory.
    pub store: Arc<dyn KeyValueStore>,
    pub tokens: Option<TokenHandler>,
    /// Free-form settings from the backend's configuration table.
    pub settings: Map<String, Value>,
}

impl BackendContext {
    #[must_use]
    pub fn new(app_name: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            app_name: app_name.into(),
            store,
            tokens: None,
            settings: Map::new(),
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: Option<TokenHandler>) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Map<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    /// Returns a copy whose store only sees keys of `backend`.
    #[must_use]
    pub fn scoped(&self, backend: &str) -> Self {
        Self {
            store: Arc::new(NamespacedStore::new(
                &self.app_name,
                backend,
                Arc::clone(&self.store),
            )),
            ..self.clone()
        }
    }

    /// Reads a typed setting.
    #[must_use]
    pub fn setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("app_name", &self.app_name)
            .field("tokens", &self.tokens)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Serializable description of a backend module.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentsReply {
    pub name: String,
    pub description: String,
    pub endpoints: Vec<EndpointDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointDoc {
    pub pattern: String,
    pub description: String,
    pub operations: Vec<OperationDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationDoc {
    pub name: String,
    pub description: String,
    pub input: Shape,
    pub output: Shape,
}
