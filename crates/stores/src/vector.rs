//! Cosine-ranked similarity index over pre-embedded reference documents.

use async_trait::async_trait;
use draftsmith_core::error::StoreError;
use draftsmith_core::retrieval::{RankedRecord, SimilarityQuery, SimilaritySearch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]. Mismatched lengths, empty vectors, and zero
/// vectors all score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// One reference document with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub profile_scope: String,
    pub content: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Brute-force index; fine for the few thousand guidance snippets a
/// profile carries.
#[derive(Default)]
pub struct InMemorySimilarityIndex {
    documents: RwLock<Vec<IndexedDocument>>,
}

impl InMemorySimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: Vec<IndexedDocument>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Load a JSON array of [`IndexedDocument`]s.
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Storage(format!("{}: {e}", path.display())))?;
        let documents: Vec<IndexedDocument> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Storage(format!("{}: {e}", path.display())))?;
        info!(count = documents.len(), path = %path.display(), "Loaded reference index");
        Ok(Self::from_documents(documents))
    }

    /// Insert or replace a document by id.
    pub async fn upsert(&self, document: IndexedDocument) {
        let mut docs = self.documents.write().await;
        docs.retain(|d| d.id != document.id);
        docs.push(document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl SimilaritySearch for InMemorySimilarityIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, query: SimilarityQuery) -> Result<Vec<RankedRecord>, StoreError> {
        let docs = self.documents.read().await;

        let mut ranked: Vec<RankedRecord> = docs
            .iter()
            .filter(|d| d.profile_scope == query.profile_scope)
            .filter(|d| {
                query
                    .filters
                    .iter()
                    .all(|(k, v)| d.metadata.get(k) == Some(v))
            })
            .map(|d| RankedRecord {
                id: d.id.clone(),
                content: d.content.clone(),
                score: cosine_similarity(&d.vector, &query.vector),
                metadata: d.metadata.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(query.top_k);

        debug!(scope = %query.profile_scope, hits = ranked.len(), "Similarity search");
        Ok(ranked)
    }
}
