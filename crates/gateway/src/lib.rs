//! HTTP gateway for Draftsmith.
//!
//! Exposes a health check and the v1 API: run a message as a
//! Server-Sent-Events stream, invalidate cache classes, and list tools.
//!
//! Built on Axum; requests are traced through `tower-http`. When bearer
//! tokens are configured, every `/v1` request must present one, and the
//! token decides which caller the request acts for.

pub mod api_v1;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::{Router, response::Json, response::Response, routing::get};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use draftsmith_agent::AgentRunner;
use draftsmith_cache::TieredCache;
use draftsmith_config::GatewayConfig;

/// Caller id used when a request does not name one.
pub const DEFAULT_CALLER: &str = "default";

/// Shared application state, built once at startup.
pub struct AppState {
    pub runner: Arc<AgentRunner>,
    pub cache: Arc<TieredCache>,
    pub default_caller: String,

    /// Bearer token → caller id; empty leaves `/v1` open
    api_tokens: HashMap<String, String>,
}

impl AppState {
    pub fn new(runner: Arc<AgentRunner>, cache: Arc<TieredCache>) -> Self {
        Self {
            runner,
            cache,
            default_caller: DEFAULT_CALLER.into(),
            api_tokens: HashMap::new(),
        }
    }

    pub fn with_api_tokens(mut self, tokens: HashMap<String, String>) -> Self {
        self.api_tokens = tokens;
        self
    }
}

pub type SharedState = Arc<AppState>;

/// Who a `/v1` request acts for, attached by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,

    /// Whether `id` came from a bearer token rather than the open default
    pub authenticated: bool,
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let v1 = api_v1::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// CORS restricted to the configured origins. Unparseable origins are
/// skipped with a warning.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server and serve until the process stops.
pub async fn start(
    config: &GatewayConfig,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bearer-token authentication for the v1 API.
///
/// With no tokens configured every request passes as the default caller.
/// Otherwise the `Authorization: Bearer <token>` header must name a
/// configured token, whose caller id is attached as a [`Caller`].
async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.api_tokens.is_empty() {
        req.extensions_mut().insert(Caller {
            id: state.default_caller.clone(),
            authenticated: false,
        });
        return Ok(next.run(req).await);
    }

    let caller_id = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| state.api_tokens.get(token))
        .cloned();

    match caller_id {
        Some(id) => {
            req.extensions_mut().insert(Caller {
                id,
                authenticated: true,
            });
            Ok(next.run(req).await)
        }
        None => {
            warn!(path = %req.uri().path(), "Unauthorized request to /v1: missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
