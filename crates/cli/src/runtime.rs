//! Startup wiring: builds every collaborator once from [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use draftsmith_agent::AgentRunner;
use draftsmith_cache::{InMemoryCacheBackend, TieredCache, TtlPolicy};
use draftsmith_config::AppConfig;
use draftsmith_core::provider::ModelProvider;
use draftsmith_core::record::RecordStore;
use draftsmith_providers::{AnthropicProvider, OpenAiEmbeddings, TavilySearch, build_client};
use draftsmith_stores::{InMemoryRecordStore, InMemorySimilarityIndex};
use draftsmith_tools::{ToolDeps, default_registry};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated between chunks of a streamed response.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything a command needs to run the agent.
pub struct Runtime {
    pub runner: Arc<AgentRunner>,
    pub cache: Arc<TieredCache>,
}

pub async fn build(config: &AppConfig) -> Result<Runtime, Box<dyn std::error::Error>> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        format!(
            "No model API key configured. Set DRAFTSMITH_API_KEY or ANTHROPIC_API_KEY, \
             or add api_key to {}",
            AppConfig::config_dir().join("config.toml").display()
        )
    })?;

    let client = build_client(CONNECT_TIMEOUT, READ_TIMEOUT)?;
    let provider: Arc<dyn ModelProvider> =
        Arc::new(AnthropicProvider::new(api_key, client.clone()).with_base_url(&config.api_url));

    let records = open_records(config).await?;
    let cache = Arc::new(TieredCache::new(
        Arc::new(InMemoryCacheBackend::new()),
        TtlPolicy::from(&config.cache),
    ));

    let mut deps = ToolDeps::new(
        cache.clone(),
        records.clone(),
        provider.clone(),
        &config.generation,
    );

    match (&config.embeddings.api_key, &config.stores.reference_index) {
        (Some(key), Some(path)) => {
            let index = InMemorySimilarityIndex::load_from_file(path)?;
            let embeddings = OpenAiEmbeddings::new(
                &config.embeddings.api_url,
                key,
                &config.embeddings.model,
                client.clone(),
            );
            deps = deps.with_reference_lookup(Arc::new(embeddings), Arc::new(index));
        }
        (None, Some(_)) => warn!("Reference index configured without an embeddings key; reference_lookup disabled"),
        _ => {}
    }

    if let Some(key) = &config.web_search.api_key {
        let search = TavilySearch::new(&config.web_search.api_url, key, client.clone());
        deps = deps.with_web_search(Arc::new(search), &config.web_search);
    }

    let tools = Arc::new(default_registry(&deps));
    let runner = AgentRunner::new(provider, tools, records, cache.clone(), &config.agent);
    info!(
        provider = runner.provider_name(),
        model = %config.agent.model,
        tools = ?runner.tools().names(),
        "Runtime ready"
    );

    Ok(Runtime {
        runner: Arc::new(runner),
        cache,
    })
}

async fn open_records(
    config: &AppConfig,
) -> Result<Arc<dyn RecordStore>, Box<dyn std::error::Error>> {
    match config.stores.backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.sqlite_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = draftsmith_stores::SqliteRecordStore::new(&path.to_string_lossy()).await?;
            info!(path = %path.display(), "Using SQLite record store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => Err("stores.backend = \"sqlite\" needs the `sqlite` feature".into()),
        _ => Ok(Arc::new(InMemoryRecordStore::new())),
    }
}
