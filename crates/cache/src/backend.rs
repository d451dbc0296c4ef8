//! Cache storage backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftsmith_core::error::CacheError;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// JSON-encoded value
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Key-value storage underneath the tiered cache.
///
/// Implementations must be safe for concurrent use; last writer wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or overwrite.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`; returns the count removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}

/// Process-local backend.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            key: key.into(),
            value: "1".into(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn set_overwrites() {
        let backend = InMemoryCacheBackend::new();
        backend.set(entry("a")).await.unwrap();
        let mut second = entry("a");
        second.value = "2".into();
        backend.set(second).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap().unwrap().value, "2");
        assert_eq!(backend.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_prefix_counts_removed() {
        let backend = InMemoryCacheBackend::new();
        for k in ["augmentation:acme:1", "augmentation:acme:2", "augmentation:globex:1"] {
            backend.set(entry(k)).await.unwrap();
        }
        assert_eq!(backend.delete_prefix("augmentation:acme:").await.unwrap(), 2);
        assert_eq!(backend.len().await.unwrap(), 1);
        assert!(!backend.delete("augmentation:acme:1").await.unwrap());
    }
}
