//! Web research tool backed by a hosted search API.
//!
//! Results are cached in the `augmentation` class. Web results are not
//! caller-specific, so they share one scope across callers.

use async_trait::async_trait;
use draftsmith_cache::{CacheKey, DataClass, TieredCache};
use draftsmith_core::error::ToolError;
use draftsmith_core::retrieval::{SearchDepth, WebSearchProvider, WebSearchResponse};
use draftsmith_core::tool::{Tool, ToolContext, ToolOutput};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const CACHE_SCOPE: &str = "web";
const MAX_RESULTS_CEILING: usize = 10;

pub struct WebResearchTool {
    cache: Arc<TieredCache>,
    search: Arc<dyn WebSearchProvider>,
    default_depth: SearchDepth,
    default_max_results: usize,
}

impl WebResearchTool {
    pub fn new(
        cache: Arc<TieredCache>,
        search: Arc<dyn WebSearchProvider>,
        default_depth: SearchDepth,
        default_max_results: usize,
    ) -> Self {
        Self {
            cache,
            search,
            default_depth,
            default_max_results: default_max_results.clamp(1, MAX_RESULTS_CEILING),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebResearchArgs {
    pub query: String,

    #[serde(default)]
    pub depth: Option<SearchDepth>,

    #[serde(default)]
    pub max_results: Option<usize>,
}

#[async_trait]
impl Tool for WebResearchTool {
    type Args = WebResearchArgs;

    fn name(&self) -> &str {
        "web_research"
    }

    fn description(&self) -> &str {
        "Search the web for current facts, trends, or examples. Returns ranked results with snippets and a short summary when available."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "depth": {
                    "type": "string",
                    "enum": ["basic", "advanced"],
                    "description": "Search depth; advanced is slower but more thorough"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_RESULTS_CEILING
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &WebResearchArgs) -> Result<(), ToolError> {
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        if let Some(n) = args.max_results
            && (n == 0 || n > MAX_RESULTS_CEILING)
        {
            return Err(ToolError::InvalidArguments(format!(
                "max_results must be between 1 and {MAX_RESULTS_CEILING}"
            )));
        }
        Ok(())
    }

    async fn execute(&self, args: WebResearchArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let depth = args.depth.unwrap_or(self.default_depth);
        let max_results = args.max_results.unwrap_or(self.default_max_results);
        let max_key = max_results.to_string();
        let key = CacheKey::from_parts(CACHE_SCOPE, &[&args.query, depth.as_str(), &max_key]);

        let response: WebSearchResponse = self
            .cache
            .get_or_compute(
                DataClass::Augmentation,
                &key,
                || async {
                    Ok::<_, ToolError>(self.search.search(&args.query, depth, max_results).await?)
                },
                None,
            )
            .await?;

        debug!(
            query = %args.query,
            provider = self.search.name(),
            results = response.results.len(),
            "Web research complete"
        );

        let summary = response.summary.clone().unwrap_or_else(|| {
            format!("{} web result(s) for \"{}\"", response.results.len(), args.query)
        });
        ctx.insight(
            self.name(),
            summary,
            serde_json::json!({
                "query": args.query,
                "urls": response.results.iter().map(|r| r.url.as_str()).collect::<Vec<_>>(),
            }),
        );

        Ok(ToolOutput::new(serde_json::to_value(&response).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            }
        })?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubWebSearch, ctx, drain};
    use draftsmith_core::event::RunEvent;
    use draftsmith_core::tool::{FailureKind, ToolCall, ToolRegistry};

    fn registry(search: Arc<StubWebSearch>, cache: Arc<TieredCache>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(WebResearchTool::new(cache, search, SearchDepth::Basic, 5));
        registry
    }

    fn research(arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_web".into(),
            name: "web_research".into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn results_are_cached_across_callers() {
        let search = Arc::new(StubWebSearch::new());
        let cache = Arc::new(TieredCache::in_memory());
        let registry = registry(search.clone(), cache);
        let (ctx, mut rx) = ctx();

        let first = registry
            .dispatch(&research(serde_json::json!({"query": "onboarding email trends"})), &ctx)
            .await;
        assert!(first.succeeded);
        assert_eq!(first.payload.as_ref().unwrap()["results"].as_array().unwrap().len(), 2);

        let second = registry
            .dispatch(&research(serde_json::json!({"query": "onboarding  email trends"})), &ctx)
            .await;
        assert_eq!(first.payload, second.payload);
        assert_eq!(search.calls(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RunEvent::Insight { summary, .. } if summary == "About onboarding email trends"));
    }

    #[tokio::test]
    async fn depth_is_part_of_the_cache_key() {
        let search = Arc::new(StubWebSearch::new());
        let registry = registry(search.clone(), Arc::new(TieredCache::in_memory()));
        let (ctx, _rx) = ctx();

        registry
            .dispatch(&research(serde_json::json!({"query": "q"})), &ctx)
            .await;
        registry
            .dispatch(&research(serde_json::json!({"query": "q", "depth": "advanced"})), &ctx)
            .await;
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_a_tool_execution_error_and_not_cached() {
        let search = Arc::new(StubWebSearch::failing());
        let registry = registry(search.clone(), Arc::new(TieredCache::in_memory()));
        let (ctx, mut rx) = ctx();

        for _ in 0..2 {
            let result = registry
                .dispatch(&research(serde_json::json!({"query": "q"})), &ctx)
                .await;
            assert_eq!(result.failure_kind(), Some(FailureKind::ToolExecutionError));
        }
        assert_eq!(search.calls(), 2);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn out_of_range_max_results_is_invalid() {
        let search = Arc::new(StubWebSearch::new());
        let registry = registry(search.clone(), Arc::new(TieredCache::in_memory()));
        let (ctx, _rx) = ctx();
        let result = registry
            .dispatch(&research(serde_json::json!({"query": "q", "max_results": 50})), &ctx)
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));
        assert_eq!(search.calls(), 0);
    }
}
