//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly with `stream: true`, translating
//! its typed SSE events into core [`Increment`]s:
//!
//! | Anthropic event        | increment                     |
//! |------------------------|-------------------------------|
//! | `content_block_start`  | `SegmentStart`                |
//! | `content_block_delta`  | `ContentDelta`                |
//! | `content_block_stop`   | `SegmentStop`                 |
//! | `message_stop`         | `TurnStop` (with usage)       |
//!
//! `message_start` and `message_delta` only feed the usage counters and the
//! stop reason carried by the final `TurnStop`.

use async_trait::async_trait;
use draftsmith_core::error::ProviderError;
use draftsmith_core::message::{ContentSegment, Role, Turn};
use draftsmith_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::http::{check_status, network_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a provider on a shared HTTP client.
    pub fn new(api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert turns to Anthropic messages.
    ///
    /// Consecutive tool-result turns collapse into one `user` message, since
    /// Anthropic expects every `tool_result` of a round right after the
    /// assistant turn that requested them.
    fn to_api_messages(turns: &[Turn]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for turn in turns {
            match turn.role {
                Role::User => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(turn.text()),
                }),
                Role::Assistant => {
                    let blocks: Vec<ContentBlock> = turn
                        .segments
                        .iter()
                        .filter_map(|segment| match segment {
                            ContentSegment::Text { value } if value.is_empty() => None,
                            ContentSegment::Text { value } => {
                                Some(ContentBlock::Text { text: value.clone() })
                            }
                            ContentSegment::ToolInvocation {
                                id,
                                name,
                                arguments,
                            } => Some(ContentBlock::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: arguments.clone(),
                            }),
                        })
                        .collect();
                    if blocks.is_empty() {
                        continue;
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => {
                    let Some(tool_result) = &turn.tool_result else {
                        continue;
                    };
                    let block = ContentBlock::ToolResult {
                        tool_use_id: tool_result.invocation_id.clone(),
                        content: tool_result.content_for_model(),
                        is_error: !tool_result.succeeded,
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if *role == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ModelRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.turns),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_turn(&self, request: ModelRequest) -> Result<IncrementStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let response = check_status("anthropic", response).await?;

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();
            let mut translator = StreamTranslator::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match translator.translate(&event) {
                        Ok(Some(increment)) => {
                            let done = matches!(increment, Increment::TurnStop { .. });
                            // A closed receiver means the run was cancelled.
                            if tx.send(Ok(increment)).await.is_err() || done {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop; the decoder treats open
            // segments as truncated.
            warn!("Anthropic stream ended without message_stop");
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(network_error)?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Buffers raw bytes so a multi-byte character split across network chunks
/// is decoded whole.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(line_end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
            // `event:` lines duplicate the JSON `type`; comments and blank
            // separators carry nothing.
        }

        payloads
    }
}

/// Per-turn state for turning Anthropic events into increments.
#[derive(Debug, Default)]
struct StreamTranslator {
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<StopReason>,
    /// Blocks of kinds we do not surface (e.g. thinking)
    skipped: HashSet<usize>,
}

impl StreamTranslator {
    fn translate(&mut self, event: &serde_json::Value) -> Result<Option<Increment>, ProviderError> {
        let event_type = event["type"].as_str().unwrap_or("");
        let index = event["index"].as_u64().map(|i| i as usize);

        match event_type {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                self.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
                Ok(None)
            }
            "content_block_start" => {
                let Some(index) = index else { return Ok(None) };
                let block = &event["content_block"];
                let kind = match block["type"].as_str() {
                    Some("text") => SegmentKind::Text,
                    Some("tool_use") => SegmentKind::Tool {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                    },
                    other => {
                        trace!(index, block_type = ?other, "Skipping content block");
                        self.skipped.insert(index);
                        return Ok(None);
                    }
                };
                Ok(Some(Increment::SegmentStart { index, kind }))
            }
            "content_block_delta" => {
                let Some(index) = index else { return Ok(None) };
                if self.skipped.contains(&index) {
                    return Ok(None);
                }
                let delta = &event["delta"];
                let fragment = match delta["type"].as_str() {
                    Some("text_delta") => delta["text"].as_str(),
                    Some("input_json_delta") => delta["partial_json"].as_str(),
                    _ => None,
                };
                Ok(fragment.map(|f| Increment::ContentDelta {
                    index,
                    fragment: f.to_string(),
                }))
            }
            "content_block_stop" => {
                let Some(index) = index else { return Ok(None) };
                if self.skipped.contains(&index) {
                    return Ok(None);
                }
                Ok(Some(Increment::SegmentStop { index }))
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(map_stop_reason(reason));
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = out as u32;
                }
                if let Some(inp) = event["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = inp as u32;
                }
                Ok(None)
            }
            "message_stop" => Ok(Some(Increment::TurnStop {
                stop_reason: self.stop_reason,
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: self.output_tokens,
                },
            })),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                Err(ProviderError::StreamInterrupted(message))
            }
            // ping and future event types
            _ => Ok(None),
        }
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" | "stop_sequence" => StopReason::Normal,
        "tool_use" => StopReason::ToolRequested,
        "max_tokens" => StopReason::LengthLimit,
        _ => StopReason::Other,
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}
