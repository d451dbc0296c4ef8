//! # Draftsmith Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Draftsmith agent runtime. Nothing here talks to the network or disk;
//! implementations live in their respective crates.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model, record store, similarity search,
//! embeddings, web search) is a trait here. This enables:
//! - Swapping implementations via configuration
//! - Scripted stand-ins in tests
//! - A clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod record;
pub mod retrieval;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{EventMultiplexer, RunEvent};
pub use message::{ContentSegment, Conversation, ConversationId, Role, Turn};
pub use provider::{
    Increment, IncrementStream, ModelProvider, ModelRequest, SegmentKind, StopReason,
    ToolDefinition, Usage,
};
pub use record::{Fields, Record, RecordStore};
pub use retrieval::{
    EmbeddingProvider, RankedRecord, SearchDepth, SimilarityQuery, SimilaritySearch,
    WebSearchProvider, WebSearchResponse, WebSearchResult,
};
pub use tool::{
    FailureKind, SideEffect, Tool, ToolCall, ToolContext, ToolFailure, ToolOutput, ToolRegistry,
    ToolResult,
};
