//! Tiered cache-aside layer for Draftsmith.
//!
//! Every expensive upstream lookup (embeddings, similarity search, web
//! search, reference records) goes through [`TieredCache::get_or_compute`].
//! Entries are grouped into [`DataClass`]es, each with its own default
//! time-to-live.

pub mod backend;
pub mod key;
pub mod tiered;

pub use backend::{CacheBackend, CacheEntry, InMemoryCacheBackend};
pub use key::CacheKey;
pub use tiered::{CacheStats, TieredCache};

use draftsmith_config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named category of cache entries sharing a TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataClass {
    /// Short-lived: per-conversation derived context
    ConversationContext,
    /// Medium-lived: similarity and web-search results
    Augmentation,
    /// Long-lived: text embeddings keyed on text hash
    Embedding,
    /// Long-lived: rarely-changing records like compliance profiles
    ReferenceData,
}

impl DataClass {
    pub const ALL: [DataClass; 4] = [
        DataClass::ConversationContext,
        DataClass::Augmentation,
        DataClass::Embedding,
        DataClass::ReferenceData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationContext => "conversation-context",
            Self::Augmentation => "augmentation",
            Self::Embedding => "embedding",
            Self::ReferenceData => "reference-data",
        }
    }
}

impl std::fmt::Display for DataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown data class: {s}"))
    }
}

/// Default TTL per data class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub conversation_context: Duration,
    pub augmentation: Duration,
    pub embedding: Duration,
    pub reference_data: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, class: DataClass) -> Duration {
        match class {
            DataClass::ConversationContext => self.conversation_context,
            DataClass::Augmentation => self.augmentation,
            DataClass::Embedding => self.embedding,
            DataClass::ReferenceData => self.reference_data,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for TtlPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            conversation_context: Duration::from_secs(config.conversation_context_ttl_secs),
            augmentation: Duration::from_secs(config.augmentation_ttl_secs),
            embedding: Duration::from_secs(config.embedding_ttl_secs),
            reference_data: Duration::from_secs(config.reference_data_ttl_secs),
        }
    }
}
