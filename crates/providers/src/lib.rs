//! Provider implementations for Draftsmith.
//!
//! - [`decoder`] assembles a model turn from its increment stream
//! - [`AnthropicProvider`] streams turns from the Anthropic Messages API
//! - [`OpenAiEmbeddings`] and [`TavilySearch`] back the read-augmentation tools

pub mod anthropic;
pub mod decoder;
pub mod embeddings;
pub mod http;
pub mod web_search;

pub use anthropic::AnthropicProvider;
pub use decoder::{DecodedTurn, MalformedInvocation, ResponseDecoder, decode_stream};
pub use embeddings::OpenAiEmbeddings;
pub use http::build_client;
pub use web_search::TavilySearch;
