//! Declarative backend modules built from endpoints and operations.
//!
//! ```ignore
//! let backend = Backend::new("account", "User accounts", ctx)
//!     .endpoint(
//!         Endpoint::new("user", "User management").operation(
//!             Operation::new("home", "Profile of the caller")
//!                 .handler(|call| async move { Ok(Reply::ok(json!({}))) }),
//!         ),
//!     );
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use gantry_core::{Args, DispatchError, DispatchResult, Reply, Shape, ValidationResult};
use tracing::{debug, info};

use super::backend::{
    BackendContext, BackendModule, DocumentsReply, EndpointDoc, OperationDoc,
};

/// Everything a handler gets for one call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub args: Args,
    pub context: Arc<BackendContext>,
}

pub type Handler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, DispatchResult<Reply>> + Send + Sync>;

/// Startup or cleanup hook.
pub type LifecycleHook =
    Arc<dyn Fn(Arc<BackendContext>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Runs after input validation and before the handler. Side effects only.
pub type BeforeRequestHook = Arc<dyn Fn(&Args) + Send + Sync>;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One callable operation with its declared input and output shapes.
#[derive(Clone)]
pub struct Operation {
    name: String,
    description: String,
    handler: Option<Handler>,
    input: Shape,
    output: Shape,
}

impl Operation {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler: None,
            input: Shape::empty(),
            output: Shape::empty(),
        }
    }

    #[must_use]
    pub fn input(mut self, shape: Shape) -> Self {
        self.input = shape;
        self
    }

    #[must_use]
    pub fn output(mut self, shape: Shape) -> Self {
        self.output = shape;
        self
    }

    #[must_use]
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<Reply>> + Send + 'static,
    {
        self.handler = Some(Arc::new(
            move |call| -> BoxFuture<'static, DispatchResult<Reply>> { Box::pin(handler(call)) },
        ));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    fn doc(&self) -> OperationDoc {
        OperationDoc {
            name: self.name.clone(),
            description: self.description.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("has_handler", &self.has_handler())
            .field("input", &self.input.name)
            .field("output", &self.output.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A named group of operations.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pattern: String,
    description: String,
    operations: BTreeMap<String, Operation>,
}

impl Endpoint {
    pub fn new(pattern: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            description: description.into(),
            operations: BTreeMap::new(),
        }
    }

    /// Adds an operation. A later operation with the same name replaces the earlier one.
    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.insert(operation.name.clone(), operation);
        self
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Reference [`BackendModule`] implementation.
pub struct Backend {
    name: String,
    description: String,
    context: Arc<BackendContext>,
    endpoints: BTreeMap<String, Endpoint>,
    duplicate_patterns: Vec<String>,
    on_initialize: Option<LifecycleHook>,
    before_request: Option<BeforeRequestHook>,
    on_cleanup: Option<LifecycleHook>,
    documents: OnceLock<Arc<DocumentsReply>>,
}

impl Backend {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        context: &BackendContext,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            context: Arc::new(context.clone()),
            endpoints: BTreeMap::new(),
            duplicate_patterns: Vec::new(),
            on_initialize: None,
            before_request: None,
            on_cleanup: None,
            documents: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        if self.endpoints.contains_key(&endpoint.pattern) {
            self.duplicate_patterns.push(endpoint.pattern.clone());
        }
        self.endpoints.insert(endpoint.pattern.clone(), endpoint);
        self
    }

    #[must_use]
    pub fn on_initialize<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<BackendContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_initialize = Some(Arc::new(
            move |ctx| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(hook(ctx)) },
        ));
        self
    }

    #[must_use]
    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.before_request = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_cleanup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<BackendContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_cleanup = Some(Arc::new(
            move |ctx| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(hook(ctx)) },
        ));
        self
    }

    #[must_use]
    pub fn context(&self) -> &BackendContext {
        &self.context
    }

    fn build_documents(&self) -> DocumentsReply {
        DocumentsReply {
            name: self.name.clone(),
            description: self.description.clone(),
            endpoints: self
                .endpoints
                .values()
                .map(|endpoint| EndpointDoc {
                    pattern: endpoint.pattern.clone(),
                    description: endpoint.description.clone(),
                    operations: endpoint.operations.values().map(Operation::doc).collect(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BackendModule for Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn initialize(&self) -> DispatchResult<()> {
        if let Some(pattern) = self.duplicate_patterns.first() {
            return Err(DispatchError::Internal(anyhow::anyhow!(
                "backend {} declares endpoint {pattern} more than once",
                self.name
            )));
        }
        for endpoint in self.endpoints.values() {
            for operation in endpoint.operations.values() {
                if !operation.has_handler() {
                    return Err(DispatchError::OperationHandlerMissing {
                        method: format!("{}.{}.{}", self.name, endpoint.pattern, operation.name),
                    });
                }
            }
        }
        if let Some(hook) = &self.on_initialize {
            hook(Arc::clone(&self.context))
                .await
                .map_err(DispatchError::Internal)?;
        }
        info!(
            backend = %self.name,
            endpoints = self.endpoints.len(),
            "backend initialized"
        );
        Ok(())
    }

    async fn handle_request(&self, args: Args) -> DispatchResult<Reply> {
        let endpoint =
            self.endpoints
                .get(&args.endpoint)
                .ok_or_else(|| DispatchError::EndpointNotFound {
                    backend: self.name.clone(),
                    endpoint: args.endpoint.clone(),
                })?;
        let operation = endpoint.operations.get(&args.operation).ok_or_else(|| {
            DispatchError::OperationNotFound {
                backend: self.name.clone(),
                endpoint: args.endpoint.clone(),
                operation: args.operation.clone(),
            }
        })?;
        let handler = operation
            .handler
            .as_ref()
            .ok_or_else(|| DispatchError::OperationHandlerMissing {
                method: args.method(),
            })?;

        if let ValidationResult::Invalid { errors } = operation.input.validate(&args.data) {
            return Err(DispatchError::ValidationFailed(errors.join("; ")));
        }
        if let Some(hook) = &self.before_request {
            hook(&args);
        }

        debug!(method = %args.method(), trace_id = %args.trace_id, "invoking handler");
        handler(Invocation {
            args,
            context: Arc::clone(&self.context),
        })
        .await
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        if let Some(hook) = &self.on_cleanup {
            hook(Arc::clone(&self.context)).await?;
        }
        Ok(())
    }

    fn documents(&self) -> Arc<DocumentsReply> {
        Arc::clone(self.documents.get_or_init(|| Arc::new(self.build_documents())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
