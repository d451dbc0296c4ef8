//! Hosted web-search client (Tavily-style JSON API).

use async_trait::async_trait;
use draftsmith_core::error::ProviderError;
use draftsmith_core::retrieval::{SearchDepth, WebSearchProvider, WebSearchResponse, WebSearchResult};
use serde::Deserialize;
use tracing::debug;

use crate::http::{check_status, network_error};

pub struct TavilySearch {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    fn request_body(query: &str, depth: SearchDepth, max_results: usize) -> serde_json::Value {
        serde_json::json!({
            "query": query,
            "search_depth": depth.as_str(),
            "max_results": max_results,
            "include_answer": true,
        })
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
        max_results: usize,
    ) -> Result<WebSearchResponse, ProviderError> {
        let url = format!("{}/search", self.base_url);
        debug!(query, depth = depth.as_str(), max_results, "Sending web search");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&Self::request_body(query, depth, max_results))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status("web_search", response).await?;

        let api_resp: TavilyResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse web search response: {e}"),
        })?;

        Ok(api_resp.into_response(max_results))
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

impl TavilyResponse {
    fn into_response(self, max_results: usize) -> WebSearchResponse {
        WebSearchResponse {
            results: self
                .results
                .into_iter()
                .take(max_results)
                .map(|r| WebSearchResult {
                    title: r.title,
                    url: r.url,
                    snippet: r.content,
                    score: r.score,
                })
                .collect(),
            summary: self.answer.filter(|a| !a.trim().is_empty()),
        }
    }
}
