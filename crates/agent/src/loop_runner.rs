//! The agentic control loop.
//!
//! One [`AgentRunner`] serves many runs; each call to [`AgentRunner::run`]
//! owns its own [`RunState`]. A run moves through
//! `Requesting → Decoding → (Dispatching → Requesting)* → Finalizing`
//! and ends with exactly one terminal event, or with none at all when the
//! subscriber disconnects.

use draftsmith_cache::{CacheKey, DataClass, TieredCache};
use draftsmith_config::AgentSettings;
use draftsmith_core::error::{ProviderError, StoreError};
use draftsmith_core::event::{EventMultiplexer, RunEvent};
use draftsmith_core::message::{ContentSegment, Conversation, ConversationId, Turn};
use draftsmith_core::provider::{ModelProvider, ModelRequest, StopReason, ToolDefinition};
use draftsmith_core::record::{Fields, Record, RecordStore, tables};
use draftsmith_core::tool::{FailureKind, ToolCall, ToolContext, ToolRegistry, ToolResult};
use draftsmith_providers::{DecodedTurn, decode_stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::policy::{GENERATION_TOOL, TerminationPolicy};
use crate::state::{RunOutcome, RunState, RunStatus};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Draftsmith, a content assistant. \
Use reference_lookup and web_research to gather context, generate_artifact to write the requested content, \
and validate_content to check drafts against compliance rules. \
When the work is done, reply briefly to the user without calling more tools.";

/// One user message to run through the loop.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub message: String,

    /// Who the run is for; scopes reference lookups and compliance data
    pub caller_id: String,

    /// Continue an existing conversation instead of starting a new one
    pub conversation_id: Option<ConversationId>,
}

impl RunRequest {
    pub fn new(message: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            caller_id: caller_id.into(),
            conversation_id: None,
        }
    }

    pub fn in_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }
}

/// Why the loop stopped driving.
enum Exit {
    Finalize(RunStatus),
    Cancelled,
    Transport(ProviderError),
}

/// Drives runs against a model provider and a tool registry.
pub struct AgentRunner {
    provider: Arc<dyn ModelProvider>,

    tools: Arc<ToolRegistry>,

    records: Arc<dyn RecordStore>,

    /// Short-lived conversation history lives here between runs
    cache: Arc<TieredCache>,

    model: String,

    temperature: f32,

    max_tokens: u32,

    system_prompt: String,

    policy: TerminationPolicy,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        records: Arc<dyn RecordStore>,
        cache: Arc<TieredCache>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            provider,
            tools,
            records,
            cache,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            system_prompt: settings
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            policy: TerminationPolicy::from(settings),
        }
    }

    pub fn with_policy(mut self, policy: TerminationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one user message to completion, streaming events to `events`.
    pub async fn run(&self, request: RunRequest, events: Arc<EventMultiplexer>) -> RunOutcome {
        let loaded = self
            .load_conversation(request.conversation_id.clone(), &request.caller_id)
            .await;
        let conversation = match loaded {
            Ok(conversation) => conversation,
            Err(e) => {
                // Persist nothing; the stored turns stay as they are.
                let id = request.conversation_id.unwrap_or_default();
                error!(conversation_id = %id, caller_id = %request.caller_id, error = %e, "Conversation history unavailable");
                let _ = events.emit(RunEvent::Failure {
                    kind: "conversation-unavailable".into(),
                    message: e.to_string(),
                });
                let mut state = RunState::new(Conversation::with_id(id));
                state.terminal = true;
                state.last_error = Some(e.to_string());
                return state.outcome(String::new(), RunStatus::Failed);
            }
        };
        let mut state = RunState::new(conversation);
        state.conversation.push_user(request.message.as_str());

        let ctx = ToolContext::new(
            request.caller_id.clone(),
            state.conversation.id.clone(),
            events.clone(),
        );

        info!(
            conversation_id = %state.conversation.id,
            caller_id = %request.caller_id,
            turns = state.conversation.turns.len(),
            "Run started"
        );

        match self.drive(&mut state, &ctx).await {
            Exit::Finalize(status) => self.finalize(state, status, &ctx).await,
            Exit::Cancelled => {
                state.terminal = true;
                info!(
                    conversation_id = %state.conversation.id,
                    iterations = state.iterations,
                    "Subscriber disconnected; run abandoned"
                );
                state.outcome(state.answer(), RunStatus::Cancelled)
            }
            Exit::Transport(e) => {
                state.terminal = true;
                error!(conversation_id = %state.conversation.id, error = %e, "Model transport failed");
                let _ = events.emit(RunEvent::Failure {
                    kind: e.kind().into(),
                    message: e.to_string(),
                });
                state.last_error = Some(e.to_string());
                state.outcome(state.answer(), RunStatus::Failed)
            }
        }
    }

    async fn drive(&self, state: &mut RunState, ctx: &ToolContext) -> Exit {
        let events = &ctx.events;
        let catalogue = self.tools.definitions();

        loop {
            // Requesting
            if events.is_disconnected() {
                return Exit::Cancelled;
            }
            debug!(
                conversation_id = %state.conversation.id,
                iteration = state.iterations,
                "Requesting model turn"
            );
            let request = self.model_request(state, &catalogue);
            let stream = tokio::select! {
                biased;
                _ = events.disconnected() => return Exit::Cancelled,
                opened = self.provider.stream_turn(request) => match opened {
                    Ok(stream) => stream,
                    Err(e) => return Exit::Transport(e),
                },
            };

            // Decoding
            let on_text = |text: &str| {
                let _ = events.emit(RunEvent::TextDelta {
                    text: text.to_string(),
                });
            };
            let decoded = tokio::select! {
                biased;
                _ = events.disconnected() => return Exit::Cancelled,
                decoded = decode_stream(stream, on_text) => match decoded {
                    Ok(decoded) => decoded,
                    Err(e) => return Exit::Transport(e),
                },
            };

            state.usage.add(decoded.usage);
            state.push_text(decoded.text());

            if !decoded.wants_tools() {
                // Invocations outside a tool-requested stop are never answered.
                let text: Vec<_> = decoded
                    .segments
                    .iter()
                    .filter(|s| matches!(s, ContentSegment::Text { .. }))
                    .cloned()
                    .collect();
                if !text.is_empty() {
                    state.conversation.push_assistant(text);
                }
                if decoded.stop_reason == StopReason::LengthLimit {
                    warn!(conversation_id = %state.conversation.id, "Model hit its output limit");
                }
                return Exit::Finalize(RunStatus::Completed);
            }

            // Dispatching
            let calls = record_assistant_turn(&mut state.conversation, &decoded);
            let round = state.iterations + 1;
            let mut unrecoverable = None;

            for call in &calls {
                if unrecoverable.is_some() {
                    append_result(
                        state,
                        ToolResult::failure(
                            &call.id,
                            FailureKind::ToolExecutionError,
                            "Skipped: the run stopped before this call",
                        ),
                    );
                    continue;
                }

                let _ = events.emit(RunEvent::ProgressNote {
                    note: format!("Running {}", call.name),
                });

                let result = if self.tools.is_abandonable(&call.name) {
                    tokio::select! {
                        biased;
                        _ = events.disconnected() => return Exit::Cancelled,
                        result = self.tools.dispatch(call, ctx) => result,
                    }
                } else {
                    self.tools.dispatch(call, ctx).await
                };

                if result.failure_kind() == Some(FailureKind::Cancelled) {
                    return Exit::Cancelled;
                }
                if call.name == GENERATION_TOOL && state.generation_round.is_none() {
                    state.generation_round = Some(round);
                }
                if result.is_unrecoverable() {
                    unrecoverable = result.error_detail.as_ref().map(|f| f.message.clone());
                }
                append_result(state, result);
            }

            for malformed in &decoded.malformed {
                append_result(
                    state,
                    ToolResult::failure(
                        &malformed.id,
                        FailureKind::MalformedToolArguments,
                        format!(
                            "Arguments for '{}' were not valid JSON: {}",
                            malformed.name, malformed.reason
                        ),
                    ),
                );
            }

            state.iterations = round;
            info!(
                conversation_id = %state.conversation.id,
                iteration = state.iterations,
                dispatched = calls.len(),
                malformed = decoded.malformed.len(),
                "Dispatch round complete"
            );

            if let Some(reason) = unrecoverable {
                state.last_error = Some(reason);
                return Exit::Finalize(RunStatus::Unrecoverable);
            }
            if let Some(status) = self.policy.check(state.iterations, state.generation_round) {
                return Exit::Finalize(status);
            }
        }
    }

    fn model_request(&self, state: &RunState, catalogue: &[ToolDefinition]) -> ModelRequest {
        let mut request = ModelRequest::new(&self.model, state.conversation.turns.clone());
        request.system = Some(self.system_prompt.clone());
        request.tools = catalogue.to_vec();
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }

    async fn finalize(&self, mut state: RunState, status: RunStatus, ctx: &ToolContext) -> RunOutcome {
        state.terminal = true;
        let mut answer = state.answer();
        if status == RunStatus::Unrecoverable {
            let reason = state.last_error.clone().unwrap_or_default();
            let notice = format!("I had to stop before finishing: {reason}");
            answer = if answer.is_empty() {
                notice
            } else {
                format!("{answer}\n\n{notice}")
            };
        }

        let persisted = match self.persist_conversation(&state, &ctx.caller_id).await {
            Ok(_) => self.persist_answer(&state, &ctx.caller_id, &answer, status).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            error!(conversation_id = %state.conversation.id, error = %e, "Run not saved");
            let _ = ctx.events.emit(RunEvent::Failure {
                kind: "persistence-error".into(),
                message: e.to_string(),
            });
            state.last_error = Some(e.to_string());
            return state.outcome(answer, RunStatus::Failed);
        }

        let conversation_id = state.conversation.id.to_string();
        let _ = ctx.events.emit(RunEvent::FinalAnswer {
            conversation_id: conversation_id.clone(),
            answer: answer.clone(),
        });
        let _ = ctx.events.emit(RunEvent::Completed {
            conversation_id,
            iterations: state.iterations,
            usage: state.usage,
        });

        info!(
            conversation_id = %state.conversation.id,
            status = status.as_str(),
            iterations = state.iterations,
            input_tokens = state.usage.input_tokens,
            output_tokens = state.usage.output_tokens,
            "Run finished"
        );
        state.outcome(answer, status)
    }

    /// Prior turns of `id`, through the conversation-context cache.
    ///
    /// An unknown id starts a fresh conversation under that id. A failed
    /// read, an undecodable history, or a conversation owned by another
    /// caller is an error.
    async fn load_conversation(
        &self,
        id: Option<ConversationId>,
        caller_id: &str,
    ) -> Result<Conversation, StoreError> {
        let Some(id) = id else {
            return Ok(Conversation::new());
        };

        let key = CacheKey::new(id.as_str(), tables::CONVERSATIONS);
        let stored = self
            .cache
            .get_or_compute(
                DataClass::ConversationContext,
                &key,
                || async {
                    let record = self
                        .records
                        .get_record(tables::CONVERSATIONS, id.as_str())
                        .await?;
                    record.map(StoredHistory::decode).transpose()
                },
                None,
            )
            .await?;

        match stored {
            None => Ok(Conversation::with_id(id)),
            Some(history) if history.caller_id.as_deref().is_some_and(|owner| owner != caller_id) => {
                warn!(conversation_id = %id, caller_id, "Conversation belongs to another caller");
                Err(StoreError::NotFound {
                    table: tables::CONVERSATIONS.into(),
                    id: id.to_string(),
                })
            }
            Some(history) => Ok(Conversation::from_turns(id, history.turns)),
        }
    }

    async fn persist_conversation(&self, state: &RunState, caller_id: &str) -> Result<Record, StoreError> {
        let id = state.conversation.id.as_str();
        let mut fields = Fields::new();
        fields.insert(
            "turns".into(),
            serde_json::to_value(&state.conversation.turns)
                .map_err(|e| StoreError::Storage(format!("turns serialization: {e}")))?,
        );
        fields.insert("caller_id".into(), caller_id.into());
        fields.insert(
            "updated_at".into(),
            state.conversation.updated_at.to_rfc3339().into(),
        );

        let record = self
            .records
            .put_record(tables::CONVERSATIONS, id, fields)
            .await?;
        self.cache
            .invalidate_class(DataClass::ConversationContext, Some(id))
            .await;
        Ok(record)
    }

    async fn persist_answer(
        &self,
        state: &RunState,
        caller_id: &str,
        answer: &str,
        status: RunStatus,
    ) -> Result<Record, StoreError> {
        let mut fields = Fields::new();
        fields.insert(
            "conversation_id".into(),
            state.conversation.id.as_str().into(),
        );
        fields.insert("caller_id".into(), caller_id.into());
        fields.insert("answer".into(), answer.into());
        fields.insert("status".into(), status.as_str().into());
        fields.insert("iterations".into(), state.iterations.into());
        fields.insert("usage".into(), serde_json::json!(state.usage));
        self.records.create_record(tables::MESSAGES, fields).await
    }
}

/// A conversation record as the loop reads it back.
#[derive(Debug, Serialize, Deserialize)]
struct StoredHistory {
    caller_id: Option<String>,
    turns: Vec<Turn>,
}

impl StoredHistory {
    fn decode(record: Record) -> Result<Self, StoreError> {
        let turns = record
            .fields
            .get("turns")
            .cloned()
            .ok_or_else(|| StoreError::QueryFailed(format!("conversation {} has no turns", record.id)))
            .and_then(|value| {
                serde_json::from_value(value).map_err(|e| {
                    StoreError::QueryFailed(format!("conversation {} turns unreadable: {e}", record.id))
                })
            })?;
        Ok(Self {
            caller_id: record.str_field("caller_id").map(str::to_string),
            turns,
        })
    }
}

/// Append the assistant turn and return the calls to dispatch.
///
/// Malformed invocations are recorded with empty arguments so their failed
/// results have something to answer; they are never dispatched.
fn record_assistant_turn(conversation: &mut Conversation, decoded: &DecodedTurn) -> Vec<ToolCall> {
    let calls: Vec<ToolCall> = decoded
        .segments
        .iter()
        .filter_map(|segment| match segment {
            ContentSegment::ToolInvocation {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            ContentSegment::Text { .. } => None,
        })
        .collect();

    let mut segments = decoded.segments.clone();
    segments.extend(decoded.malformed.iter().map(|m| {
        ContentSegment::tool_invocation(&m.id, &m.name, serde_json::json!({}))
    }));
    conversation.push_assistant(segments);
    calls
}

fn append_result(state: &mut RunState, result: ToolResult) {
    if let Err(e) = state.conversation.push_tool_result(result) {
        warn!(conversation_id = %state.conversation.id, error = %e, "Tool result not appended");
    }
}
