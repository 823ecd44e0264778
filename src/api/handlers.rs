//! HTTP request handlers

use super::assets::{serve_index, serve_static};
use super::sse::sse_stream;
use super::types::{
    ChatRequest, CheckpointListResponse, CheckpointQuery, ErrorResponse, RenameRequest,
    RenameResponse, ThreadListResponse,
};
use super::AppState;
use crate::graph::{GraphError, ThreadId};
use crate::session::{SessionError, SessionView};
use crate::threads::retrieve_all_threads;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Snapshots returned by the debug dump when no limit is given
const DEFAULT_DEBUG_LIMIT: usize = 3;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Chat page and its static files
        .route("/", get(serve_index))
        .route("/assets/*path", get(serve_static))
        // Thread directory
        .route("/api/threads", get(list_threads))
        .route("/api/threads/:id/rename", post(rename_thread))
        // Browser sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:sid", get(get_session))
        .route("/api/sessions/:sid/new-chat", post(new_chat))
        .route("/api/sessions/:sid/threads/:tid", post(select_thread))
        .route("/api/sessions/:sid/messages", post(send_message))
        // Diagnostics
        .route("/api/debug/checkpoints", get(debug_checkpoints))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Thread Directory
// ============================================================

async fn list_threads(State(state): State<AppState>) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = retrieve_all_threads(&**state.graph.store())
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(ThreadListResponse { threads }))
}

async fn rename_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, AppError> {
    let name = state
        .sessions
        .rename_thread(&ThreadId::from(id.clone()), &req.name)
        .await?;
    Ok(Json(RenameResponse { id, name }))
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.sessions.create().await)
}

async fn get_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.sessions.view(&sid).await?))
}

async fn new_chat(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.sessions.new_chat(&sid).await?))
}

async fn select_thread(
    State(state): State<AppState>,
    Path((sid, tid)): Path<(String, String)>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        state
            .sessions
            .select_thread(&sid, ThreadId::from(tid))
            .await?,
    ))
}

async fn send_message(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.sessions.submit(&sid, req.text).await?;
    Ok(sse_stream(events))
}

// ============================================================
// Diagnostics
// ============================================================

async fn debug_checkpoints(
    State(state): State<AppState>,
    Query(query): Query<CheckpointQuery>,
) -> Result<Json<CheckpointListResponse>, AppError> {
    let checkpoints = state
        .graph
        .store()
        .list_recent(query.limit.unwrap_or(DEFAULT_DEBUG_LIMIT))
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(CheckpointListResponse { checkpoints }))
}

async fn get_version() -> &'static str {
    concat!("threadchat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        match e {
            SessionError::NotFound(_) => AppError::NotFound(message),
            SessionError::Busy => AppError::Conflict(message),
            SessionError::EmptyMessage | SessionError::Graph(GraphError::InvalidName(_)) => {
                AppError::BadRequest(message)
            }
            SessionError::Graph(GraphError::Store(_) | GraphError::Llm(_)) => {
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
