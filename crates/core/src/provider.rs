//! Model provider trait: the abstraction over generative text backends.
//!
//! A provider accepts a conversation plus the tool-schema catalogue and
//! answers with a pull-based stream of [`Increment`]s for one model turn.
//! The increment stream is the sole input of the response decoder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Turn;

/// One model-turn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model profile to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// System instructions, sent out-of-band from the turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation so far
    pub turns: Vec<Turn>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            model: model.into(),
            system: None,
            turns,
            tools: Vec::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage for one turn or an accumulated run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Normal,
    ToolRequested,
    LengthLimit,
    Other,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ToolRequested => "tool-requested",
            Self::LengthLimit => "length-limit",
            Self::Other => "other",
        }
    }
}

/// What kind of segment a `SegmentStart` opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentKind {
    Text,
    Tool { id: String, name: String },
}

/// One atomic unit of a provider's streamed output.
///
/// Segment-scoped increments carry the index of the segment they address,
/// so interleaved segments decode correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Increment {
    SegmentStart { index: usize, kind: SegmentKind },

    /// Text for a text segment, a raw JSON fragment for a tool segment.
    ContentDelta { index: usize, fragment: String },

    SegmentStop { index: usize },

    TurnStop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(default)]
        usage: Usage,
    },
}

/// Receiving half of a model turn.
pub type IncrementStream = mpsc::Receiver<Result<Increment, ProviderError>>;

/// The core model provider trait.
///
/// The control loop and the generation tool call `stream_turn()` without
/// knowing which backend is in use.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Start one model turn and return its increment stream.
    ///
    /// An `Err` here, or an `Err` item on the stream, is a transport error.
    async fn stream_turn(&self, request: ModelRequest) -> Result<IncrementStream, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
