use std::collections::HashMap;
use std::sync::Arc;

use gantry_core::{DispatchError, DispatchResult};
use tracing::{info, warn};

use super::backend::{BackendContext, BackendModule, Factory};

// ---------------------------------------------------------------------------
// BackendRegistry
// ---------------------------------------------------------------------------

/// Name → live backend module.
///
/// Filled during startup through `&mut self`, then frozen behind an `Arc`
/// so lookups while serving take no locks. Modules are cleaned up in
/// reverse registration order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn BackendModule>>,
    order: Vec<String>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs, initializes, and registers the backend `name`.
    ///
    /// The factory receives a context whose store is scoped to `name`. On any
    /// failure the registry is left unchanged.
    ///
    /// # Errors
    ///
    /// - `DuplicateBackend` if `name` is already registered (checked first).
    /// - `ServerInternalError` if the factory fails.
    /// - Whatever the module's `initialize` returns.
    pub async fn register(
        &mut self,
        name: &str,
        factory: &Factory,
        ctx: &BackendContext,
    ) -> DispatchResult<()> {
        if self.backends.contains_key(name) {
            return Err(DispatchError::DuplicateBackend {
                name: name.to_string(),
            });
        }
        let module = factory(name, &ctx.scoped(name)).map_err(DispatchError::Internal)?;
        module.initialize().await?;

        info!(backend = name, description = module.description(), "backend registered");
        self.backends.insert(name.to_string(), module);
        self.order.push(name.to_string());
        Ok(())
    }

    /// Looks up a registered backend.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendModule>> {
        self.backends.get(name).cloned()
    }

    /// Backend names in registration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Runs every module's cleanup in reverse registration order.
    ///
    /// Failures are logged and do not stop the remaining cleanups. Returns the
    /// number of modules whose cleanup failed.
    pub async fn cleanup_all(&self) -> usize {
        let mut failed = 0;
        for name in self.order.iter().rev() {
            let Some(module) = self.backends.get(name) else {
                continue;
            };
            match module.cleanup().await {
                Ok(()) => info!(backend = %name, "backend cleaned up"),
                Err(e) => {
                    failed += 1;
                    warn!(backend = %name, error = %e, "backend cleanup failed");
                }
            }
        }
        failed
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.order)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use gantry_core::{ErrorKind, Reply};
    use parking_lot::Mutex;

    use super::*;
    use crate::service::framework::{Backend, Endpoint, Operation};
    use crate::store::MemoryStore;

    fn ctx() -> BackendContext {
        BackendContext::new("gantry", Arc::new(MemoryStore::new()))
    }

    /// Factory building a one-operation backend whose cleanup is logged.
    fn logging_factory(description: &'static str, log: Arc<Mutex<Vec<String>>>) -> Factory {
        Arc::new(move |name: &str, ctx: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
            let log = Arc::clone(&log);
            let cleanup_name = name.to_string();
            let backend = Backend::new(name, description, ctx)
                .endpoint(Endpoint::new("e", "").operation(
                    Operation::new("o", "").handler(|_| async { Ok(Reply::default()) }),
                ))
                .on_cleanup(move |_| {
                    let log = Arc::clone(&log);
                    let name = cleanup_name.clone();
                    async move {
                        log.lock().push(format!("cleanup:{name}"));
                        Ok(())
                    }
                });
            Ok(Arc::new(backend))
        })
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let mut registry = BackendRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register("alpha", &logging_factory("first", log), &ctx())
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_original_kept() {
        let mut registry = BackendRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register("alpha", &logging_factory("first", Arc::clone(&log)), &ctx())
            .await
            .unwrap();

        let built = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&built);
        let inner = logging_factory("second", log);
        let counting: Factory = Arc::new(
            move |name: &str, ctx: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
                counted.fetch_add(1, Ordering::SeqCst);
                inner(name, ctx)
            },
        );

        let err = registry
            .register("alpha", &counting, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateBackend);
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(registry.get("alpha").unwrap().description(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn failed_initialize_leaves_registry_unchanged() {
        let mut registry = BackendRegistry::new();
        let missing_handler: Factory = Arc::new(
            |name: &str, ctx: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
                let backend = Backend::new(name, "", ctx)
                    .endpoint(Endpoint::new("e", "").operation(Operation::new("o", "")));
                Ok(Arc::new(backend))
            },
        );

        let err = registry
            .register("broken", &missing_handler, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationHandlerMissing);
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }

    #[tokio::test]
    async fn failing_factory_is_internal_error() {
        let mut registry = BackendRegistry::new();
        let failing: Factory = Arc::new(
            |_: &str, _: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
                anyhow::bail!("no config")
            },
        );
        let err = registry.register("x", &failing, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerInternalError);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cleanup_runs_in_reverse_order() {
        let mut registry = BackendRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            registry
                .register(name, &logging_factory("", Arc::clone(&log)), &ctx())
                .await
                .unwrap();
        }
        assert_eq!(registry.names(), ["a", "b", "c"]);
        assert_eq!(registry.cleanup_all().await, 0);
        assert_eq!(
            *log.lock(),
            vec!["cleanup:c", "cleanup:b", "cleanup:a"]
        );
    }
}
