//! Reference lookup: embed the query, then rank the caller's reference
//! material by similarity.
//!
//! Both steps are cached. Embeddings live in the long-lived `embedding`
//! class keyed on the text alone; ranked results live in `augmentation`,
//! scoped to the caller so one profile's material never answers another's.

use async_trait::async_trait;
use draftsmith_cache::{CacheKey, DataClass, TieredCache};
use draftsmith_core::error::ToolError;
use draftsmith_core::retrieval::{EmbeddingProvider, RankedRecord, SimilarityQuery, SimilaritySearch};
use draftsmith_core::tool::{Tool, ToolContext, ToolOutput};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const MAX_TOP_K: usize = 20;

pub struct ReferenceLookupTool {
    cache: Arc<TieredCache>,
    embeddings: Arc<dyn EmbeddingProvider>,
    similarity: Arc<dyn SimilaritySearch>,
}

impl ReferenceLookupTool {
    pub fn new(
        cache: Arc<TieredCache>,
        embeddings: Arc<dyn EmbeddingProvider>,
        similarity: Arc<dyn SimilaritySearch>,
    ) -> Self {
        Self {
            cache,
            embeddings,
            similarity,
        }
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, ToolError> {
        let key = CacheKey::new(self.embeddings.name(), query);
        self.cache
            .get_or_compute(
                DataClass::Embedding,
                &key,
                || async { Ok::<_, ToolError>(self.embeddings.embed(query).await?) },
                None,
            )
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceLookupArgs {
    pub query: String,

    /// Exact-match metadata filters, e.g. `{"channel": "email"}`
    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[async_trait]
impl Tool for ReferenceLookupTool {
    type Args = ReferenceLookupArgs;

    fn name(&self) -> &str {
        "reference_lookup"
    }

    fn description(&self) -> &str {
        "Search the caller's reference material (brand guidance, past content, product facts). Returns passages ranked by relevance."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up"
                },
                "filters": {
                    "type": "object",
                    "description": "Exact-match metadata filters",
                    "additionalProperties": { "type": "string" }
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of passages (default 5)",
                    "default": 5,
                    "minimum": 1,
                    "maximum": MAX_TOP_K
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &ReferenceLookupArgs) -> Result<(), ToolError> {
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        if args.top_k == 0 || args.top_k > MAX_TOP_K {
            return Err(ToolError::InvalidArguments(format!(
                "top_k must be between 1 and {MAX_TOP_K}"
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        args: ReferenceLookupArgs,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let vector = self.embed(&args.query).await?;

        let filter_key = serde_json::to_string(&args.filters).unwrap_or_default();
        let top_k = args.top_k.to_string();
        let key = CacheKey::from_parts(&ctx.caller_id, &[&args.query, &filter_key, &top_k]);

        let passages: Vec<RankedRecord> = self
            .cache
            .get_or_compute(
                DataClass::Augmentation,
                &key,
                || async {
                    let query = SimilarityQuery {
                        profile_scope: ctx.caller_id.clone(),
                        vector,
                        filters: args.filters.clone(),
                        top_k: args.top_k,
                    };
                    Ok::<_, ToolError>(self.similarity.search(query).await?)
                },
                None,
            )
            .await?;

        debug!(query = %args.query, hits = passages.len(), "Reference lookup complete");

        let summary = match passages.first() {
            Some(best) => format!(
                "Found {} reference passage(s) for \"{}\" (best match {:.2})",
                passages.len(),
                args.query,
                best.score
            ),
            None => format!("No reference material matched \"{}\"", args.query),
        };
        ctx.insight(
            self.name(),
            summary,
            serde_json::json!({
                "query": args.query,
                "ids": passages.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            }),
        );

        Ok(ToolOutput::new(serde_json::json!({
            "query": args.query,
            "passages": passages,
        })))
    }
}
