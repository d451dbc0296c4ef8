//! Error types for the Draftsmith domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Draftsmith operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Record store / retrieval errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Conversation invariants ---
    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    // --- Outbound events ---
    #[error("Event error: {0}")]
    Emit(#[from] EmitError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to a model, embedding, or web-search provider.
///
/// Every variant is a `transport-error`: the core never retries these.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Taxonomy tag surfaced to clients.
    pub fn kind(&self) -> &'static str {
        "transport-error"
    }
}

/// Errors a tool handler reports back to the registry.
///
/// The registry downgrades every one of these into a failed `ToolResult`;
/// only `Unrecoverable` asks the control loop to stop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name} - {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Unrecoverable tool failure: {tool_name} - {reason}")]
    Unrecoverable { tool_name: String, reason: String },

    #[error("Tool cancelled: {0}")]
    Cancelled(String),

    #[error("Upstream provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cached value could not be (de)serialized: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("Tool result references unknown invocation: {0}")]
    UnknownInvocation(String),

    #[error("Tool result for invocation {0} was already recorded")]
    DuplicateResult(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("Run already closed; dropped {0} event")]
    Closed(&'static str),

    #[error("Subscriber disconnected")]
    Disconnected,
}
