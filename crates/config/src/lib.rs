//! Configuration loading, validation, and management for Draftsmith.
//!
//! Loads configuration from `~/.draftsmith/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use draftsmith_core::retrieval::SearchDepth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Hard ceiling on model-turn iterations per run.
pub const MAX_ITERATIONS_CEILING: u32 = 5;

/// The root configuration structure.
///
/// Maps directly to `~/.draftsmith/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model provider API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model provider base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Control loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Second-pass generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub web_search: WebSearchConfig,

    #[serde(default)]
    pub stores: StoresConfig,
}

fn default_api_url() -> String {
    "https://api.anthropic.com".into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("agent", &self.agent)
            .field("generation", &self.generation)
            .field("cache", &self.cache)
            .field("gateway", &self.gateway)
            .field("embeddings", &self.embeddings)
            .field("web_search", &self.web_search)
            .field("stores", &self.stores)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Model-turn iterations before forced finalization
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Tool rounds allowed once generation has run and a second
    /// iteration has completed
    #[serde(default = "default_post_generation_rounds")]
    pub post_generation_rounds: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> u32 {
    MAX_ITERATIONS_CEILING
}
fn default_post_generation_rounds() -> u32 {
    1
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            post_generation_rounds: default_post_generation_rounds(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model profile for the stateless generation pass
    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_generation_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn default_generation_temperature() -> f32 {
    0.9
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: default_generation_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Default time-to-live per cache data class, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_conversation_ttl")]
    pub conversation_context_ttl_secs: u64,

    #[serde(default = "default_augmentation_ttl")]
    pub augmentation_ttl_secs: u64,

    #[serde(default = "default_long_ttl")]
    pub embedding_ttl_secs: u64,

    #[serde(default = "default_long_ttl")]
    pub reference_data_ttl_secs: u64,
}

fn default_conversation_ttl() -> u64 {
    300
}
fn default_augmentation_ttl() -> u64 {
    3_600
}
fn default_long_ttl() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            conversation_context_ttl_secs: default_conversation_ttl(),
            augmentation_ttl_secs: default_augmentation_ttl(),
            embedding_ttl_secs: default_long_ttl(),
            reference_data_ttl_secs: default_long_ttl(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Browser origins allowed to call the API; empty means same-origin only
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Bearer token → caller id. Empty leaves `/v1` open to any caller.
    #[serde(default)]
    pub api_tokens: HashMap<String, String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("cors_origins", &self.cors_origins)
            .field("api_tokens", &format!("[{} REDACTED]", self.api_tokens.len()))
            .finish()
    }
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: Vec::new(),
            api_tokens: HashMap::new(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embeddings_url")]
    pub api_url: String,

    #[serde(default = "default_embeddings_model")]
    pub model: String,
}

fn default_embeddings_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embeddings_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_embeddings_url(),
            model: default_embeddings_model(),
        }
    }
}

impl std::fmt::Debug for EmbeddingsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingsConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_web_search_url")]
    pub api_url: String,

    #[serde(default)]
    pub depth: SearchDepth,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_web_search_url() -> String {
    "https://api.tavily.com".into()
}
fn default_max_results() -> usize {
    5
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_web_search_url(),
            depth: SearchDepth::default(),
            max_results: default_max_results(),
        }
    }
}

impl std::fmt::Debug for WebSearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("depth", &self.depth)
            .field("max_results", &self.max_results)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoresConfig {
    /// "memory" or "sqlite"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Database file for the sqlite backend; defaults under the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    /// JSON array of pre-embedded reference documents for similarity search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_index: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "memory".into()
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            sqlite_path: None,
            reference_index: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.draftsmith/config.toml).
    ///
    /// Environment variables override file values:
    /// - `DRAFTSMITH_API_KEY`, then `ANTHROPIC_API_KEY` (model key)
    /// - `DRAFTSMITH_MODEL`, `DRAFTSMITH_GENERATION_MODEL`
    /// - `OPENAI_API_KEY` (embeddings), `TAVILY_API_KEY` (web search)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("DRAFTSMITH_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("DRAFTSMITH_MODEL") {
            self.agent.model = model;
        }
        if let Some(model) = lookup("DRAFTSMITH_GENERATION_MODEL") {
            self.generation.model = model;
        }
        if self.embeddings.api_key.is_none() {
            self.embeddings.api_key = lookup("OPENAI_API_KEY");
        }
        if self.web_search.api_key.is_none() {
            self.web_search.api_key = lookup("TAVILY_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".draftsmith")
    }

    /// Resolved SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.stores
            .sqlite_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("draftsmith.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, t) in [
            ("agent.temperature", self.agent.temperature),
            ("generation.temperature", self.generation.temperature),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if self.agent.max_iterations == 0 || self.agent.max_iterations > MAX_ITERATIONS_CEILING {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_iterations must be between 1 and {MAX_ITERATIONS_CEILING}"
            )));
        }

        if self.agent.max_tokens == 0 || self.generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }

        if !matches!(self.stores.backend.as_str(), "memory" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "stores.backend must be \"memory\" or \"sqlite\", got \"{}\"",
                self.stores.backend
            )));
        }

        if self.web_search.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "web_search.max_results must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if a model API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            agent: AgentSettings::default(),
            generation: GenerationConfig::default(),
            cache: CacheConfig::default(),
            gateway: GatewayConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            web_search: WebSearchConfig::default(),
            stores: StoresConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.post_generation_rounds, 1);
        assert_eq!(config.cache.augmentation_ttl_secs, 3_600);
        assert_eq!(config.gateway.port, 8787);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.model, config.agent.model);
        assert_eq!(parsed.web_search.depth, SearchDepth::Basic);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.generation.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn iteration_cap_cannot_exceed_ceiling() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 6;
        assert!(config.validate().is_err());
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_store_backend_rejected() {
        let mut config = AppConfig::default();
        config.stores.backend = "postgres".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.stores.backend, "memory");
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
post_generation_rounds = 2

[web_search]
depth = "advanced"

[cache]
augmentation_ttl_secs = 60

[gateway.api_tokens]
"tok-acme" = "acme"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.post_generation_rounds, 2);
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.web_search.depth, SearchDepth::Advanced);
        assert_eq!(config.cache.augmentation_ttl_secs, 60);
        assert_eq!(config.cache.embedding_ttl_secs, 86_400);
        assert_eq!(config.gateway.api_tokens.get("tok-acme").map(String::as_str), Some("acme"));
        assert_eq!(config.gateway.port, 8787);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmodel = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("DRAFTSMITH_API_KEY", "sk-draft"),
            ("DRAFTSMITH_GENERATION_MODEL", "claude-gen"),
            ("TAVILY_API_KEY", "tvly"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-draft"));
        assert_eq!(config.generation.model, "claude-gen");
        assert_eq!(config.web_search.api_key.as_deref(), Some("tvly"));
        assert!(config.embeddings.api_key.is_none());
        assert_eq!(config.agent.model, default_model());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        config.web_search.api_key = Some("tvly-secret".into());
        config
            .gateway
            .api_tokens
            .insert("gw-secret".into(), "acme".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("gw-secret"));
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("tvly-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[agent]"));
        assert!(toml_str.contains("8787"));
    }
}
