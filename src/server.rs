//! HTTP chat server.
//!
//! Exposes the assistant as a small JSON API so a browser chat UI (or any
//! other client) can drive sessions without embedding the library.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/chat` | Answer `{session_id?, message}`; a missing id starts a new session |
//! | `GET`    | `/sessions` | Most recent sessions |
//! | `POST`   | `/sessions` | Mint a fresh session id |
//! | `GET`    | `/sessions/{id}` | A session's message log |
//! | `DELETE` | `/sessions/{id}` | Delete one session |
//! | `DELETE` | `/sessions` | Wipe all history |
//! | `GET`    | `/sources` | Source map entries |
//!
//! The server keeps no per-session state: each chat request rebuilds its
//! [`SessionContext`] from the conversation store.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `permission_denied` (403),
//! `not_found` (404), `timeout` (408), `store_error` (502).
//!
//! Failures inside a chat turn are not HTTP errors; they come back as the
//! reply text with status 200.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::HubError;
use crate::models::{Message, SessionSummary, SourceMapEntry};
use crate::pipeline::{build_assistant, HubAssistant};
use crate::session::{new_session_id, run_turn, SessionContext, TurnReply};

#[derive(Clone)]
struct AppState {
    assistant: Arc<HubAssistant>,
}

/// Starts the chat server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config
        .server
        .as_ref()
        .map(|s| s.bind.clone())
        .ok_or_else(|| anyhow::anyhow!("[server] section with `bind` is required for serve"))?;
    let assistant = Arc::new(build_assistant(config)?);
    run_server_with_assistant(&bind_addr, assistant).await
}

/// Starts the chat server around an already-built assistant.
pub async fn run_server_with_assistant(
    bind_addr: &str,
    assistant: Arc<HubAssistant>,
) -> anyhow::Result<()> {
    let app = router(assistant);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "chat server listening");
    println!("Hub chat server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// The route table, exposed for embedding in a larger axum app.
pub fn router(assistant: Arc<HubAssistant>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route(
            "/sessions",
            get(handle_list_sessions)
                .post(handle_new_session)
                .delete(handle_wipe),
        )
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sources", get(handle_sources))
        .layer(cors)
        .with_state(AppState { assistant })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        let (status, code) = match &err {
            HubError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            HubError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            HubError::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            _ => (StatusCode::BAD_GATEWAY, "store_error"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TurnReply>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let mut ctx = match req.session_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => SessionContext::load(&state.assistant, id).await,
        _ => SessionContext::fresh(),
    };
    Ok(Json(run_turn(&state.assistant, &mut ctx, &req.message).await))
}

// ============ /sessions ============

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

async fn handle_list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let limit = state.assistant.config().sessions.list_limit;
    Json(SessionListResponse {
        sessions: state.assistant.conversations().list_sessions(Some(limit)).await,
    })
}

#[derive(Serialize)]
struct NewSessionResponse {
    session_id: String,
}

async fn handle_new_session() -> (StatusCode, Json<NewSessionResponse>) {
    (
        StatusCode::CREATED,
        Json(NewSessionResponse {
            session_id: new_session_id(),
        }),
    )
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    messages: Vec<Message>,
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<SessionResponse> {
    let ctx = SessionContext::load(&state.assistant, &id).await;
    Json(SessionResponse {
        session_id: ctx.session_id,
        messages: ctx.messages,
    })
}

#[derive(Serialize)]
struct DeleteResponse {
    removed: usize,
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let removed = state.assistant.conversations().delete_session(&id).await?;
    Ok(Json(DeleteResponse { removed }))
}

#[derive(Serialize)]
struct WipeResponse {
    wiped: bool,
}

async fn handle_wipe(State(state): State<AppState>) -> Result<Json<WipeResponse>, AppError> {
    state.assistant.conversations().wipe_all().await?;
    Ok(Json(WipeResponse { wiped: true }))
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceMapEntry>,
}

async fn handle_sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: state.assistant.sources().await.as_ref().clone(),
    })
}
