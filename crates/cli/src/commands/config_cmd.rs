//! `draftsmith config`: Configuration management commands.

use draftsmith_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Model:       {}", config.agent.model);
            println!("   Generation:  {}", config.generation.model);
            println!(
                "   Gateway:     {}:{}",
                config.gateway.host, config.gateway.port
            );
            println!("   Records:     {}", config.stores.backend);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that load fine but leave features switched off.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.has_api_key() {
        warnings.push("No model API key set (set DRAFTSMITH_API_KEY or ANTHROPIC_API_KEY)");
    }
    if config.embeddings.api_key.is_none() || config.stores.reference_index.is_none() {
        warnings.push("reference_lookup disabled: needs an embeddings key and stores.reference_index");
    }
    if config.web_search.api_key.is_none() {
        warnings.push("web_research disabled: set TAVILY_API_KEY");
    }
    if config.gateway.api_tokens.is_empty() {
        warnings.push("No gateway.api_tokens: /v1 accepts any caller without a token");
    }
    if config.gateway.host == "0.0.0.0" {
        warnings.push("Gateway bound to 0.0.0.0 (reachable from other hosts)");
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.api_key = None;
    config.embeddings.api_key = None;
    config.web_search.api_key = None;
    config.gateway.api_tokens.clear();
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}
