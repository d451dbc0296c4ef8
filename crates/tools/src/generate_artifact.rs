//! Artifact generation: a stateless second model pass.
//!
//! The brief goes to the generation model profile with no conversation
//! history. Text streams back to the client as `artifact-chunk` events and
//! the finished artifact is persisted in the `artifacts` table.
//!
//! This handler is never abandoned on cancellation. It watches the
//! subscriber itself, and on disconnect persists whatever it has with
//! status `partial` before giving up.

use async_trait::async_trait;
use chrono::Utc;
use draftsmith_config::GenerationConfig;
use draftsmith_core::error::{ProviderError, ToolError};
use draftsmith_core::event::RunEvent;
use draftsmith_core::message::Conversation;
use draftsmith_core::provider::{ModelProvider, ModelRequest, Usage};
use draftsmith_core::record::{Fields, RecordStore, tables};
use draftsmith_core::tool::{SideEffect, Tool, ToolContext, ToolOutput};
use draftsmith_providers::ResponseDecoder;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "text/markdown";

const GENERATION_PROMPT: &str = "You write finished marketing and communication content from a brief. \
Reply with the content only: no preamble, no commentary, no surrounding quotes.";

/// The model profile used for generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationProfile {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&GenerationConfig> for GenerationProfile {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

pub struct GenerateArtifactTool {
    generator: Arc<dyn ModelProvider>,
    records: Arc<dyn RecordStore>,
    profile: GenerationProfile,
}

impl GenerateArtifactTool {
    pub fn new(
        generator: Arc<dyn ModelProvider>,
        records: Arc<dyn RecordStore>,
        profile: GenerationProfile,
    ) -> Self {
        Self {
            generator,
            records,
            profile,
        }
    }

    fn request(&self, args: &GenerateArtifactArgs) -> ModelRequest {
        let mut brief = Conversation::new();
        let mut prompt = args.brief.clone();
        if let Some(title) = &args.title {
            prompt = format!("Title: {title}\n\n{prompt}");
        }
        prompt.push_str(&format!("\n\nFormat: {}", args.content_type()));
        brief.push_user(prompt);

        let mut request = ModelRequest::new(&self.profile.model, brief.turns);
        request.system = Some(GENERATION_PROMPT.into());
        request.temperature = self.profile.temperature;
        request.max_tokens = self.profile.max_tokens;
        request
    }

    async fn persist(
        &self,
        artifact_id: &str,
        args: &GenerateArtifactArgs,
        ctx: &ToolContext,
        body: &str,
        status: &str,
        usage: Usage,
    ) -> Result<(), ToolError> {
        let mut fields = Fields::new();
        fields.insert("brief".into(), args.brief.clone().into());
        if let Some(title) = &args.title {
            fields.insert("title".into(), title.clone().into());
        }
        fields.insert("content_type".into(), args.content_type().into());
        fields.insert("body".into(), body.into());
        fields.insert("status".into(), status.into());
        fields.insert("caller_id".into(), ctx.caller_id.clone().into());
        fields.insert(
            "conversation_id".into(),
            ctx.conversation_id.as_str().into(),
        );
        fields.insert("model".into(), self.profile.model.clone().into());
        fields.insert("usage".into(), serde_json::json!(usage));
        fields.insert("generated_at".into(), Utc::now().to_rfc3339().into());

        self.records
            .put_record(tables::ARTIFACTS, artifact_id, fields)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateArtifactArgs {
    /// What to write: audience, goal, tone, key points
    pub brief: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub content_type: Option<String>,
}

impl GenerateArtifactArgs {
    fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// How the stream ended.
enum StreamEnd {
    Finished,
    Disconnected,
    Interrupted(ProviderError),
}

#[async_trait]
impl Tool for GenerateArtifactTool {
    type Args = GenerateArtifactArgs;

    fn name(&self) -> &str {
        "generate_artifact"
    }

    fn description(&self) -> &str {
        "Write a finished piece of content (email, post, landing copy) from a brief. The artifact streams to the user and is saved."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "brief": {
                    "type": "string",
                    "description": "Audience, goal, tone, and key points for the content"
                },
                "title": {
                    "type": "string",
                    "description": "Optional working title"
                },
                "content_type": {
                    "type": "string",
                    "description": "MIME type of the artifact (default text/markdown)"
                }
            },
            "required": ["brief"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &GenerateArtifactArgs) -> Result<(), ToolError> {
        if args.brief.trim().is_empty() {
            return Err(ToolError::InvalidArguments("brief must not be empty".into()));
        }
        Ok(())
    }

    fn abandon_on_cancel(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: GenerateArtifactArgs,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let mut stream = tokio::select! {
            biased;
            _ = ctx.events.disconnected() => {
                return Err(ToolError::Cancelled(
                    "subscriber left before the artifact stream opened".into(),
                ));
            }
            opened = self.generator.stream_turn(self.request(&args)) => opened?,
        };

        let artifact_id = Uuid::new_v4().to_string();
        let _ = ctx.events.emit(RunEvent::ArtifactBegin {
            artifact_id: artifact_id.clone(),
            content_type: args.content_type().to_string(),
        });

        let mut decoder = ResponseDecoder::new();
        let mut body = String::new();
        let end = loop {
            tokio::select! {
                biased;
                _ = ctx.events.disconnected() => break StreamEnd::Disconnected,
                item = stream.recv() => match item {
                    Some(Ok(increment)) => {
                        if let Some(text) = decoder.apply(increment) {
                            body.push_str(&text);
                            let _ = ctx.events.emit(RunEvent::ArtifactChunk {
                                artifact_id: artifact_id.clone(),
                                text,
                            });
                        }
                    }
                    Some(Err(e)) => break StreamEnd::Interrupted(e),
                    None => break StreamEnd::Finished,
                },
            }
        };

        match end {
            StreamEnd::Disconnected => {
                if let Err(e) = self
                    .persist(&artifact_id, &args, ctx, &body, "partial", Usage::default())
                    .await
                {
                    warn!(artifact_id = %artifact_id, error = %e, "Partial artifact not saved");
                } else {
                    info!(artifact_id = %artifact_id, chars = body.len(), "Partial artifact saved on disconnect");
                }
                Err(ToolError::Cancelled(format!(
                    "subscriber left while generating artifact {artifact_id}"
                )))
            }
            StreamEnd::Interrupted(e) => {
                if !body.is_empty()
                    && let Err(store_err) = self
                        .persist(&artifact_id, &args, ctx, &body, "partial", Usage::default())
                        .await
                {
                    warn!(artifact_id = %artifact_id, error = %store_err, "Partial artifact not saved");
                }
                let _ = ctx.events.emit(RunEvent::ArtifactEnd {
                    artifact_id,
                    record_id: None,
                });
                Err(ToolError::Provider(e))
            }
            StreamEnd::Finished => {
                let decoded = decoder.finish();
                let body = decoded.text();

                if let Err(e) = self
                    .persist(&artifact_id, &args, ctx, &body, "complete", decoded.usage)
                    .await
                {
                    let _ = ctx.events.emit(RunEvent::ArtifactEnd {
                        artifact_id: artifact_id.clone(),
                        record_id: None,
                    });
                    return Err(ToolError::Unrecoverable {
                        tool_name: self.name().into(),
                        reason: format!("artifact {artifact_id} could not be saved: {e}"),
                    });
                }

                let _ = ctx.events.emit(RunEvent::ArtifactEnd {
                    artifact_id: artifact_id.clone(),
                    record_id: Some(artifact_id.clone()),
                });
                info!(
                    artifact_id = %artifact_id,
                    chars = body.len(),
                    output_tokens = decoded.usage.output_tokens,
                    "Artifact generated"
                );

                Ok(ToolOutput::new(serde_json::json!({
                    "artifact_id": artifact_id,
                    "content_type": args.content_type(),
                    "stop_reason": decoded.stop_reason.as_str(),
                    "body": body,
                }))
                .with_side_effect(SideEffect {
                    action: "created".into(),
                    table: tables::ARTIFACTS.into(),
                    record_id: artifact_id,
                }))
            }
        }
    }
}
