//! Two-tier read-through cache of fused results
//!
//! The local tier is an in-process moka cache. The optional shared tier is
//! any [`SharedStore`]; it is consulted on a local miss and written in the
//! background on every put. Shared-tier failures are logged and never
//! surface to callers.

mod clock;
mod local;
mod shared;
mod sqlite;

pub use clock::{Clock, ManualClock, SystemClock};
pub use local::LocalTier;
pub use shared::{CacheError, MemoryStore, SharedStore};
pub use sqlite::SqliteStore;

use crate::config::Config;
use crate::retrieval::{Fingerprint, FusedResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;

const SHARED_KEY_PREFIX: &str = "leibniz:search:";
const DEFAULT_SHARED_TIMEOUT: Duration = Duration::from_millis(100);

/// Cached fused results for one fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub results: Vec<FusedResult>,
    pub inserted_at_ms: i64,
    pub ttl_ms: i64,
}

impl CacheEntry {
    /// Whether the entry is still inside its TTL window at `now_ms`
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.inserted_at_ms < self.ttl_ms
    }
}

pub struct TwoTierCache {
    local: LocalTier,
    shared: Option<Arc<dyn SharedStore>>,
    /// Bound on each shared-tier call
    shared_timeout: Duration,
    clock: Arc<dyn Clock>,
    /// Background shared-tier writes not yet reaped
    pending: Mutex<JoinSet<()>>,
}

impl TwoTierCache {
    pub fn new(
        local_capacity: u64,
        shared: Option<Arc<dyn SharedStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local: LocalTier::new(local_capacity),
            shared,
            shared_timeout: DEFAULT_SHARED_TIMEOUT,
            clock,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_shared_timeout(mut self, timeout: Duration) -> Self {
        self.shared_timeout = timeout;
        self
    }

    /// Cache without a shared tier
    pub fn local_only(local_capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(local_capacity, None, clock)
    }

    /// Build the cache described by the `cache` section, or `None` when disabled.
    ///
    /// A shared tier that cannot be opened leaves the cache local-only.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Option<Self> {
        let cache = &config.cache;
        if !cache.enabled {
            return None;
        }

        let shared: Option<Arc<dyn SharedStore>> = match cache.shared.as_str() {
            "sqlite" => {
                let opened = config
                    .shared_cache_path()
                    .map_err(|e| e.to_string())
                    .and_then(|path| {
                        SqliteStore::open(&path, cache.compression_threshold, Arc::clone(&clock))
                            .map_err(|e| format!("{}: {}", path.display(), e))
                    });
                match opened {
                    Ok(store) => Some(Arc::new(store)),
                    Err(e) => {
                        tracing::warn!("Shared cache unavailable, continuing local-only: {}", e);
                        None
                    }
                }
            }
            "memory" => Some(Arc::new(MemoryStore::new(Arc::clone(&clock)))),
            _ => None,
        };

        Some(
            Self::new(cache.local_capacity, shared, clock)
                .with_shared_timeout(Duration::from_millis(cache.shared_timeout_ms)),
        )
    }

    pub fn shared_name(&self) -> Option<&str> {
        self.shared.as_deref().map(|store| store.name())
    }

    /// Look up fresh results, local tier first
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Vec<FusedResult>> {
        let key = fingerprint.as_str();
        let now = self.clock.now_millis();

        if let Some(entry) = self.local.get(key) {
            if entry.is_fresh(now) {
                tracing::debug!(fingerprint = %fingerprint, "local cache hit");
                return Some(entry.results.clone());
            }
            self.local.invalidate(key);
            self.delete_shared(fingerprint).await;
            return None;
        }

        let store = self.shared.as_ref()?;
        let shared_key = shared_key(fingerprint);
        let read = store.get(&shared_key);
        let bytes = bounded(store.as_ref(), "read", self.shared_timeout, read)
            .await
            .flatten()?;

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, "discarding corrupt shared entry: {e}");
                self.delete_shared(fingerprint).await;
                return None;
            }
        };

        if !entry.is_fresh(now) {
            self.delete_shared(fingerprint).await;
            return None;
        }

        tracing::debug!(fingerprint = %fingerprint, store = store.name(), "shared cache hit");
        let results = entry.results.clone();
        self.local.insert(key.to_string(), Arc::new(entry));
        Some(results)
    }

    /// Store results in both tiers
    ///
    /// The local write happens before returning. The shared write runs on a
    /// background task; callers never wait for it. Returns whether a shared
    /// write was scheduled, which needs a shared tier and a running tokio
    /// runtime.
    pub fn put(&self, fingerprint: &Fingerprint, results: Vec<FusedResult>, ttl: Duration) -> bool {
        let entry = CacheEntry {
            results,
            inserted_at_ms: self.clock.now_millis(),
            ttl_ms: ttl.as_millis() as i64,
        };

        let payload = match &self.shared {
            Some(_) => match serde_json::to_vec(&entry) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(fingerprint = %fingerprint, "failed to encode cache entry: {e}");
                    None
                }
            },
            None => None,
        };

        self.local
            .insert(fingerprint.as_str().to_string(), Arc::new(entry));

        let (Some(store), Some(payload)) = (self.shared.clone(), payload) else {
            return false;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime available, skipping shared cache write");
            return false;
        };

        let key = shared_key(fingerprint);
        let timeout = self.shared_timeout;
        let mut pending = self.pending();
        while pending.try_join_next().is_some() {}
        pending.spawn_on(
            async move {
                let write = store.put(&key, payload, ttl);
                bounded(store.as_ref(), "write", timeout, write).await;
            },
            &handle,
        );
        true
    }

    /// Wait for every scheduled shared-tier write to finish
    pub async fn flush(&self) {
        let mut writes = std::mem::take(&mut *self.pending());
        while let Some(result) = writes.join_next().await {
            if let Err(e) = result {
                tracing::warn!("shared cache write task failed: {}", e);
            }
        }
    }

    fn pending(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove a fingerprint from both tiers
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.local.invalidate(fingerprint.as_str());
        self.delete_shared(fingerprint).await;
    }

    async fn delete_shared(&self, fingerprint: &Fingerprint) {
        if let Some(store) = &self.shared {
            let key = shared_key(fingerprint);
            let delete = store.delete(&key);
            bounded(store.as_ref(), "delete", self.shared_timeout, delete).await;
        }
    }
}

/// Await one shared-tier call, logging failures and expiry as `None`
async fn bounded<T>(
    store: &dyn SharedStore,
    op: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, CacheError>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(store = store.name(), "shared cache {} failed: {}", op, e);
            None
        }
        Err(_) => {
            tracing::warn!(
                store = store.name(),
                timeout_ms = timeout.as_millis() as u64,
                "shared cache {} timed out",
                op
            );
            None
        }
    }
}

fn shared_key(fingerprint: &Fingerprint) -> String {
    format!("{}{}", SHARED_KEY_PREFIX, fingerprint)
}
