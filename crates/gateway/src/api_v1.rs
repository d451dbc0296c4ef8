//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/runs/stream`: Run one message, stream events as SSE
//! - `POST /v1/cache/invalidate`: Drop cached entries of one data class
//! - `GET  /v1/tools`: List available tools

use axum::{
    Extension, Router,
    extract::State,
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use draftsmith_agent::RunRequest;
use draftsmith_cache::DataClass;
use draftsmith_core::event::EventMultiplexer;
use draftsmith_core::message::ConversationId;
use draftsmith_core::provider::ToolDefinition;

use crate::{Caller, SharedState};

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/runs/stream", post(run_stream_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct RunStreamRequest {
    message: String,

    /// Existing conversation ID (omit to start a new one).
    #[serde(default)]
    conversation_id: Option<String>,

    /// Who the run is for. Without tokens configured this picks the
    /// caller; with tokens it must match the token's caller.
    #[serde(default)]
    caller_id: Option<String>,
}

#[derive(Deserialize)]
struct InvalidateRequest {
    data_class: String,

    /// Limit removal to one scope (caller, conversation, or "web").
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Serialize)]
struct InvalidateResponse {
    data_class: DataClass,
    removed: usize,
}

#[derive(Serialize)]
struct ToolsResponse {
    tools: Vec<ToolDefinition>,
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn forbidden(error: impl Into<String>) -> ApiError {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/runs/stream`: Run a message, receive an SSE stream of events.
///
/// The run executes on its own task. Each SSE event is named after the run
/// event type and carries the tagged JSON event as data. Dropping the
/// response stream drops the receiver, which the run observes as a
/// disconnect.
async fn run_stream_handler(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<RunStreamRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let caller_id = match payload.caller_id {
        Some(requested) if !caller.authenticated => requested,
        Some(requested) if requested != caller.id => {
            return Err(forbidden("caller_id does not match the bearer token"));
        }
        _ => caller.id,
    };
    let mut request = RunRequest::new(payload.message, caller_id);
    if let Some(id) = payload.conversation_id.as_deref() {
        request = request.in_conversation(ConversationId::from(id));
    }
    info!(
        caller_id = %request.caller_id,
        conversation_id = ?request.conversation_id.as_ref().map(|id| id.as_str()),
        "v1/runs/stream SSE request"
    );

    let (events, rx) = EventMultiplexer::channel();
    let runner = state.runner.clone();
    tokio::spawn(async move {
        let outcome = runner.run(request, Arc::new(events)).await;
        info!(
            conversation_id = %outcome.conversation_id,
            status = outcome.status.as_str(),
            iterations = outcome.iterations,
            "Streamed run finished"
        );
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}

// ── Cache ─────────────────────────────────────────────────────────────────

/// `POST /v1/cache/invalidate`: Remove entries of a data class.
async fn invalidate_handler(
    State(state): State<SharedState>,
    Json(payload): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let data_class: DataClass = payload.data_class.parse().map_err(bad_request)?;
    let removed = state
        .cache
        .invalidate_class(data_class, payload.scope.as_deref())
        .await;
    info!(%data_class, scope = ?payload.scope, removed, "Cache invalidated");
    Ok(Json(InvalidateResponse {
        data_class,
        removed,
    }))
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// `GET /v1/tools`: The catalogue the model is offered, in registration order.
async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.runner.tools().definitions(),
    })
}
