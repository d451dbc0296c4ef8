//! `draftsmith serve`: Start the HTTP/SSE gateway.

use std::sync::Arc;

use draftsmith_config::AppConfig;
use draftsmith_gateway::AppState;

use crate::runtime;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    let runtime = runtime::build(&config).await?;
    let tools = runtime.runner.tools().names().join(", ");
    let state = Arc::new(
        AppState::new(runtime.runner.clone(), runtime.cache.clone())
            .with_api_tokens(config.gateway.api_tokens.clone()),
    );

    println!("Draftsmith gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.agent.model);
    println!("   Tools:     {tools}");
    if config.gateway.api_tokens.is_empty() {
        println!("   Auth:      open (no gateway.api_tokens configured)");
    } else {
        println!("   Auth:      bearer tokens for {} caller(s)", config.gateway.api_tokens.len());
    }

    draftsmith_gateway::start(&config.gateway, state).await?;

    Ok(())
}
