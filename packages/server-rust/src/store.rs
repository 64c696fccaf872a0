//! Key-value store handed to backend modules and the session token handler.
//!
//! [`MemoryStore`] is the in-process implementation; entries with a TTL are
//! hidden once expired and removed by [`spawn_purge_task`].
//! [`NamespacedStore`] scopes a shared store to one backend by prefixing
//! every key with `<app>:<backend>:`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimal async key-value contract.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Returns the live value stored under `key`.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    /// With `ttl`, the entry disappears once the duration has elapsed.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Removes `key`. Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Drops expired entries. Stores that expire keys themselves keep the
    /// default, which does nothing.
    async fn purge_expired(&self) -> anyhow::Result<usize> {
        Ok(0)
    }
}

/// Runs `store.purge_expired()` every `every` until `stop` flips to `true`.
pub fn spawn_purge_task(
    store: Arc<dyn KeyValueStore>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        // The first tick completes immediately; nothing has expired yet.
        ticks.tick().await;

        while !*stop.borrow_and_update() {
            tokio::select! {
                _ = ticks.tick() => match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "expired store entries purged"),
                    Err(e) => warn!(error = %e, "store purge failed"),
                },
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Concurrent in-memory store backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn purge_expired(&self) -> anyhow::Result<usize> {
        Ok(self.remove_expired())
    }
}

// ---------------------------------------------------------------------------
// NamespacedStore
// ---------------------------------------------------------------------------

/// View of a shared store restricted to the `<app>:<backend>:` key prefix.
#[derive(Clone)]
pub struct NamespacedStore {
    prefix: String,
    inner: Arc<dyn KeyValueStore>,
}

impl NamespacedStore {
    #[must_use]
    pub fn new(app_name: &str, backend: &str, inner: Arc<dyn KeyValueStore>) -> Self {
        Self {
            prefix: format!("{app_name}:{backend}:"),
            inner,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl std::fmt::Debug for NamespacedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueStore for NamespacedStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(&self.scoped(key)).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.inner.set(&self.scoped(key), value, ttl).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.delete(&self.scoped(key)).await
    }

    async fn purge_expired(&self) -> anyhow::Result<usize> {
        self.inner.purge_expired().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
