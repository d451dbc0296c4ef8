//! Retrieval collaborators: embeddings, similarity search, and hosted web
//! search. Only read-augmentation tools call these.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ProviderError, StoreError};

/// Text-to-vector embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// A similarity-search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityQuery {
    /// Caller/profile partition the search is confined to
    pub profile_scope: String,

    pub vector: Vec<f32>,

    /// Exact-match metadata filters
    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl SimilarityQuery {
    pub fn new(profile_scope: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            profile_scope: profile_scope.into(),
            vector,
            filters: BTreeMap::new(),
            top_k: default_top_k(),
        }
    }
}

/// One ranked hit, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub id: String,

    pub content: String,

    pub score: f32,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Ranked retrieval over pre-embedded reference material.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: SimilarityQuery) -> Result<Vec<RankedRecord>, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResponse {
    pub results: Vec<WebSearchResult>,

    /// Provider-written answer, when it offers one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Hosted web-search provider.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
        max_results: usize,
    ) -> Result<WebSearchResponse, ProviderError>;
}
