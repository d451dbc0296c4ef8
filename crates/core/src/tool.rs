//! Tool trait and dispatch registry: the abstraction over side-effecting
//! capabilities.
//!
//! Every tool declares a closed argument type. The registry deserializes the
//! model's raw JSON into that type before the handler runs, and folds every
//! outcome (including unknown names and bad arguments) into a uniform
//! [`ToolResult`]. Nothing escapes `dispatch` as an error.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::event::{EventMultiplexer, RunEvent};
use crate::message::ConversationId;
use crate::provider::ToolDefinition;

/// A request to execute a tool, as produced by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool-use id)
    pub id: String,

    pub name: String,

    pub arguments: serde_json::Value,
}

/// Why a tool result did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    UnknownTool,
    MalformedToolArguments,
    InvalidArguments,
    ToolExecutionError,
    /// Ends the run; the loop finalizes instead of re-prompting.
    Unrecoverable,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "unknown-tool",
            Self::MalformedToolArguments => "malformed-tool-arguments",
            Self::InvalidArguments => "invalid-arguments",
            Self::ToolExecutionError => "tool-execution-error",
            Self::Unrecoverable => "unrecoverable",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// A durable change a tool made outside the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffect {
    /// e.g. "created", "updated"
    pub action: String,
    pub table: String,
    pub record_id: String,
}

/// The uniform outcome of one tool dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The invocation this result answers
    pub invocation_id: String,

    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ToolFailure>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<SideEffect>,
}

impl ToolResult {
    pub fn success(invocation_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            succeeded: true,
            payload: Some(payload),
            error_detail: None,
            side_effects: Vec::new(),
        }
    }

    pub fn failure(
        invocation_id: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            succeeded: false,
            payload: None,
            error_detail: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
            side_effects: Vec::new(),
        }
    }

    pub fn with_side_effects(mut self, side_effects: Vec<SideEffect>) -> Self {
        self.side_effects = side_effects;
        self
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error_detail.as_ref().map(|f| f.kind)
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Unrecoverable)
    }

    /// What the model sees on its next turn.
    pub fn content_for_model(&self) -> String {
        match (&self.payload, &self.error_detail) {
            (_, Some(failure)) => format!("Error [{}]: {}", failure.kind.as_str(), failure.message),
            (Some(payload), None) => match payload {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            (None, None) => String::new(),
        }
    }
}

/// What a handler hands back on success.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub payload: serde_json::Value,
    pub side_effects: Vec<SideEffect>,
}

impl ToolOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            side_effects: Vec::new(),
        }
    }

    pub fn with_side_effect(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }
}

/// Bounded execution context handed to every handler.
#[derive(Clone)]
pub struct ToolContext {
    /// Who the run is for; also the profile scope for reference lookups.
    pub caller_id: String,

    pub conversation_id: ConversationId,

    /// Outbound event stream for progress notices.
    pub events: Arc<EventMultiplexer>,
}

impl ToolContext {
    pub fn new(
        caller_id: impl Into<String>,
        conversation_id: ConversationId,
        events: Arc<EventMultiplexer>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            conversation_id,
            events,
        }
    }

    /// Emit a progress note. A closed or disconnected stream is not the
    /// handler's concern.
    pub fn progress(&self, note: impl Into<String>) {
        let _ = self.events.emit(RunEvent::ProgressNote { note: note.into() });
    }

    /// Surface a structured finding to the client.
    pub fn insight(&self, tool: &str, summary: impl Into<String>, details: serde_json::Value) {
        let _ = self.events.emit(RunEvent::Insight {
            tool: tool.to_string(),
            summary: summary.into(),
            details,
        });
    }
}

/// The core Tool trait.
///
/// Implementors pick a closed `Args` type; the registry validates raw
/// arguments against it before `execute` is ever called.
#[async_trait]
pub trait Tool: Send + Sync {
    type Args: DeserializeOwned + Send + 'static;

    /// The unique name of this tool (e.g., "reference_lookup").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing `Args` (sent to the model).
    fn parameters_schema(&self) -> serde_json::Value;

    /// Checks serde cannot express (ranges, non-empty strings).
    fn validate(&self, _args: &Self::Args) -> Result<(), ToolError> {
        Ok(())
    }

    /// Whether the loop may drop this handler mid-flight when the
    /// subscriber disconnects. Handlers that must persist partial work
    /// return `false` and watch `ToolContext::events` themselves.
    fn abandon_on_cancel(&self) -> bool {
        true
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: Self::Args, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Object-safe view of a [`Tool`] with its argument type erased.
#[async_trait]
trait ErasedTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn abandon_on_cancel(&self) -> bool;

    async fn call(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

#[async_trait]
impl<T: Tool> ErasedTool for T {
    fn definition(&self) -> ToolDefinition {
        self.to_definition()
    }

    fn abandon_on_cancel(&self) -> bool {
        Tool::abandon_on_cancel(self)
    }

    async fn call(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: T::Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.validate(&args)?;
        self.execute(args, ctx).await
    }
}

/// A registry of available tools.
///
/// The control loop uses this to:
/// 1. Get the tool-schema catalogue to send to the model
/// 2. Dispatch invocations the model requests
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn ErasedTool>>,
    /// Registration order, so the catalogue is stable across calls.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Box::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Whether an in-flight call to `name` may be dropped on cancellation.
    /// Unknown names are trivially abandonable.
    pub fn is_abandonable(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.abandon_on_cancel())
            .unwrap_or(true)
    }

    /// Execute a tool call. Never fails: every outcome is a `ToolResult`.
    ///
    /// No retries happen here; retry policy belongs to the caller.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, invocation = %call.id, "Dispatch to unregistered tool");
            return ToolResult::failure(
                &call.id,
                FailureKind::UnknownTool,
                format!("No tool named '{}' is registered", call.name),
            );
        };

        let start = Instant::now();
        let outcome = tool.call(call.arguments.clone(), ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(tool = %call.name, duration_ms, "Tool succeeded");
                ToolResult::success(&call.id, output.payload).with_side_effects(output.side_effects)
            }
            Err(e) => {
                let kind = match &e {
                    ToolError::InvalidArguments(_) => FailureKind::InvalidArguments,
                    ToolError::Unrecoverable { .. } => FailureKind::Unrecoverable,
                    ToolError::Cancelled(_) => FailureKind::Cancelled,
                    ToolError::ExecutionFailed { .. }
                    | ToolError::Provider(_)
                    | ToolError::Store(_) => FailureKind::ToolExecutionError,
                };
                warn!(tool = %call.name, kind = kind.as_str(), duration_ms, error = %e, "Tool failed");
                ToolResult::failure(&call.id, kind, e.to_string())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct EchoArgs {
        text: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        type Args = EchoArgs;

        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        fn validate(&self, args: &EchoArgs) -> Result<(), ToolError> {
            if args.text.is_empty() {
                return Err(ToolError::InvalidArguments("text must not be empty".into()));
            }
            Ok(())
        }
        async fn execute(&self, args: EchoArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            ctx.progress("echoing");
            if args.text == "explode" {
                return Err(ToolError::Unrecoverable {
                    tool_name: "echo".into(),
                    reason: "asked to".into(),
                });
            }
            Ok(ToolOutput::new(serde_json::json!({ "echo": args.text })))
        }
    }

    fn ctx() -> (ToolContext, tokio::sync::mpsc::UnboundedReceiver<RunEvent>) {
        let (events, rx) = EventMultiplexer::channel();
        (
            ToolContext::new("caller-1", ConversationId::from("conv-1"), Arc::new(events)),
            rx,
        )
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn registry_definitions_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(EchoTool);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn dispatch_success() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let (ctx, mut rx) = ctx();

        let result = registry
            .dispatch(&call("echo", serde_json::json!({"text": "hello world"})), &ctx)
            .await;
        assert!(result.succeeded);
        assert_eq!(result.invocation_id, "call_1");
        assert_eq!(result.payload.unwrap()["echo"], "hello world");
        assert!(matches!(rx.recv().await, Some(RunEvent::ProgressNote { .. })));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_a_failed_result() {
        let registry = ToolRegistry::new();
        let (ctx, _rx) = ctx();
        let result = registry
            .dispatch(&call("frobnicate", serde_json::json!({})), &ctx)
            .await;
        assert!(!result.succeeded);
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
        assert!(result.content_for_model().contains("unknown-tool"));
    }

    #[tokio::test]
    async fn dispatch_rejects_arguments_outside_the_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let (ctx, _rx) = ctx();

        let result = registry
            .dispatch(&call("echo", serde_json::json!({"txt": "typo"})), &ctx)
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));

        let result = registry
            .dispatch(&call("echo", serde_json::json!({"text": ""})), &ctx)
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));
    }

    #[tokio::test]
    async fn dispatch_surfaces_unrecoverable_failures() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let (ctx, _rx) = ctx();
        let result = registry
            .dispatch(&call("echo", serde_json::json!({"text": "explode"})), &ctx)
            .await;
        assert!(result.is_unrecoverable());
    }

    #[test]
    fn failure_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&FailureKind::MalformedToolArguments).unwrap();
        assert_eq!(json, r#""malformed-tool-arguments""#);
    }

    #[test]
    fn unknown_tools_are_abandonable() {
        let registry = ToolRegistry::new();
        assert!(registry.is_abandonable("anything"));
    }
}
