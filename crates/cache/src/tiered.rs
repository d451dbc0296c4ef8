//! The cache-aside wrapper.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{CacheBackend, CacheEntry, InMemoryCacheBackend};
use crate::key::{CacheKey, escape_scope, scope_prefix};
use crate::{DataClass, TtlPolicy};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Hit/miss counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Store-aside cache with a default TTL per [`DataClass`].
///
/// Safe to share across concurrent runs. Two runs racing on the same key
/// may both compute; the last write wins.
pub struct TieredCache {
    backend: Arc<dyn CacheBackend>,
    ttl: TtlPolicy,
    clock: Clock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TieredCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: TtlPolicy) -> Self {
        Self {
            backend,
            ttl,
            clock: Arc::new(Utc::now),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// In-memory cache with default TTLs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheBackend::new()), TtlPolicy::default())
    }

    /// Replace the time source (tests drive expiry with this).
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return the cached value, or run `compute` and store its result.
    ///
    /// A failing `compute` stores nothing. Backend trouble never fails the
    /// call: read errors count as a miss, write errors are logged.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        class: DataClass,
        key: &CacheKey,
        compute: F,
        ttl_override: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let storage_key = key.storage_key(class);

        if let Some(value) = self.lookup::<T>(&storage_key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(class = %class, key = %storage_key, "Cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(class = %class, key = %storage_key, "Cache miss");

        let value = compute().await?;
        let ttl = ttl_override.unwrap_or_else(|| self.ttl.ttl_for(class));
        self.store(storage_key, &value, ttl).await;
        Ok(value)
    }

    /// Delete every entry of `class` within `scope`, or the whole class when
    /// `scope` is `None`. Returns the number removed.
    pub async fn invalidate_class(&self, class: DataClass, scope: Option<&str>) -> usize {
        let escaped = scope.map(escape_scope);
        let prefix = scope_prefix(class, escaped.as_deref());
        match self.backend.delete_prefix(&prefix).await {
            Ok(removed) => {
                debug!(class = %class, prefix = %prefix, removed, "Cache invalidated");
                removed
            }
            Err(e) => {
                warn!(class = %class, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, storage_key: &str) -> Option<T> {
        let entry = match self.backend.get(storage_key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Cache read failed; treating as miss");
                return None;
            }
        };

        if !entry.is_fresh((self.clock)()) {
            if let Err(e) = self.backend.delete(storage_key).await {
                warn!(key = %storage_key, error = %e, "Stale entry eviction failed");
            }
            return None;
        }

        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Cached value no longer decodes; recomputing");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, storage_key: String, value: &T, ttl: Duration) {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Value not cacheable");
                return;
            }
        };

        let now = (self.clock)();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = CacheEntry {
            key: storage_key,
            value: serialized,
            expires_at,
        };
        if let Err(e) = self.backend.set(entry).await {
            warn!(error = %e, "Cache write failed");
        }
    }
}
