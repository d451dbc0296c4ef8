//! Tool handlers for Draftsmith.
//!
//! Tools give the agent its side-effecting capabilities:
//! - read-augmentation: `reference_lookup` and `web_research` consult the
//!   cache first and fall back to a collaborator;
//! - generation: `generate_artifact` runs a second model pass and streams
//!   the artifact to the client;
//! - validation: `validate_content` checks text against compliance data.
//!
//! Every handler receives its collaborators explicitly through
//! [`ToolDeps`]; nothing here reaches for a global.

pub mod generate_artifact;
pub mod reference_lookup;
pub mod validate_content;
pub mod web_research;

#[cfg(test)]
pub(crate) mod test_support;

use draftsmith_cache::TieredCache;
use draftsmith_config::{GenerationConfig, WebSearchConfig};
use draftsmith_core::provider::ModelProvider;
use draftsmith_core::record::RecordStore;
use draftsmith_core::retrieval::{
    EmbeddingProvider, SearchDepth, SimilaritySearch, WebSearchProvider,
};
use draftsmith_core::tool::ToolRegistry;
use std::sync::Arc;
use tracing::info;

pub use generate_artifact::{GenerateArtifactTool, GenerationProfile};
pub use reference_lookup::ReferenceLookupTool;
pub use validate_content::{ComplianceRules, Finding, Severity, ValidateContentTool, Verdict};
pub use web_research::WebResearchTool;

/// Collaborators the built-in tools need, built once at startup.
#[derive(Clone)]
pub struct ToolDeps {
    pub cache: Arc<TieredCache>,

    pub records: Arc<dyn RecordStore>,

    /// Model used for the generation pass
    pub generator: Arc<dyn ModelProvider>,

    pub generation: GenerationProfile,

    /// `reference_lookup` is only registered when both halves are present.
    pub embeddings: Option<Arc<dyn EmbeddingProvider>>,
    pub similarity: Option<Arc<dyn SimilaritySearch>>,

    /// `web_research` is only registered when a search provider is present.
    pub web_search: Option<Arc<dyn WebSearchProvider>>,
    pub search_depth: SearchDepth,
    pub max_results: usize,
}

impl ToolDeps {
    pub fn new(
        cache: Arc<TieredCache>,
        records: Arc<dyn RecordStore>,
        generator: Arc<dyn ModelProvider>,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            cache,
            records,
            generator,
            generation: GenerationProfile::from(generation),
            embeddings: None,
            similarity: None,
            web_search: None,
            search_depth: SearchDepth::default(),
            max_results: 5,
        }
    }

    pub fn with_reference_lookup(
        mut self,
        embeddings: Arc<dyn EmbeddingProvider>,
        similarity: Arc<dyn SimilaritySearch>,
    ) -> Self {
        self.embeddings = Some(embeddings);
        self.similarity = Some(similarity);
        self
    }

    pub fn with_web_search(
        mut self,
        provider: Arc<dyn WebSearchProvider>,
        config: &WebSearchConfig,
    ) -> Self {
        self.web_search = Some(provider);
        self.search_depth = config.depth;
        self.max_results = config.max_results;
        self
    }
}

/// Build the registry of built-in tools from the available collaborators.
///
/// Generation and validation are always present. Read-augmentation tools
/// appear only when their upstreams are configured, so the model is never
/// offered a tool that cannot run.
pub fn default_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    if let (Some(embeddings), Some(similarity)) = (&deps.embeddings, &deps.similarity) {
        registry.register(ReferenceLookupTool::new(
            deps.cache.clone(),
            embeddings.clone(),
            similarity.clone(),
        ));
    }

    if let Some(search) = &deps.web_search {
        registry.register(WebResearchTool::new(
            deps.cache.clone(),
            search.clone(),
            deps.search_depth,
            deps.max_results,
        ));
    }

    registry.register(GenerateArtifactTool::new(
        deps.generator.clone(),
        deps.records.clone(),
        deps.generation.clone(),
    ));
    registry.register(ValidateContentTool::new(
        deps.cache.clone(),
        deps.records.clone(),
    ));

    info!(tools = ?registry.names(), "Tool registry built");
    registry
}
