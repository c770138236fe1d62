//! Canopy HTTP REST API
//!
//! Axum-based HTTP server that exposes graph generation, polling, and the
//! quiz flow over HTTP. Runs alongside the Unix socket IPC server.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function, most of which dispatch through the IPC router so both
//! transports share one code path. The inner functions are directly testable
//! without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health                                — health check with DB status
//! - GET  /version                               — server version info
//! - POST /generate                              — start a background graph build
//! - GET  /topology/:id                          — graph, or in-flight status
//! - GET  /topology/:id/status                   — build status only
//! - POST /topology/:id/regenerate               — rebuild from stored content
//! - POST /topology/:id/max_nodes                — update the node budget
//! - POST /topology/:id/ignore                   — view with nodes filtered out
//! - POST /topology/:id/reset                    — clear mastery state
//! - GET  /topology/:id/node/:label/question     — quiz question for a node
//! - POST /topology/:id/question/:qid/answer     — judge an answer

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use canopy_core::ipc::{CanopyRequest, CanopyResponse};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::router::{handle_request, AppState};

/// Build the Axum router with all endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/generate", post(generate_handler))
        .route("/topology/:id", get(topology_handler))
        .route("/topology/:id/status", get(status_handler))
        .route("/topology/:id/regenerate", post(regenerate_handler))
        .route("/topology/:id/max_nodes", post(max_nodes_handler))
        .route("/topology/:id/ignore", post(ignore_handler))
        .route("/topology/:id/reset", post(reset_handler))
        .route("/topology/:id/node/:label/question", get(question_handler))
        .route("/topology/:id/question/:qid/answer", post(answer_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Canopy HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct GenerateRequest {
    pub content: Option<String>,
    pub max_nodes: Option<i32>,
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RegenerateRequest {
    pub max_nodes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct MaxNodesRequest {
    pub max_nodes: i32,
}

#[derive(Debug, Deserialize, Default)]
pub struct IgnoreRequest {
    #[serde(default)]
    pub ignored_nodes: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct QuestionQuery {
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AnswerRequest {
    pub answer: Option<String>,
    pub node_id: Option<String>,
    pub session_id: Option<Uuid>,
}

// ============================================================================
// Validation (pure, directly testable)
// ============================================================================

/// A generate call needs non-blank document content.
pub fn validate_generate(req: GenerateRequest) -> Result<CanopyRequest, String> {
    match req.content {
        Some(content) if !content.trim().is_empty() => Ok(CanopyRequest::Generate {
            content,
            max_nodes: req.max_nodes,
            owner: req.owner,
        }),
        _ => Err("content field is required".to_string()),
    }
}

/// An answer call needs the answer text, the node, and the quiz session.
pub fn validate_answer(
    topology_id: Uuid,
    question_id: Uuid,
    req: AnswerRequest,
) -> Result<CanopyRequest, String> {
    let answer = match req.answer {
        Some(a) if !a.trim().is_empty() => a,
        _ => return Err("answer field is required".to_string()),
    };
    let label = match req.node_id {
        Some(l) if !l.is_empty() => l,
        _ => return Err("node_id field is required".to_string()),
    };
    let session_id = req
        .session_id
        .ok_or_else(|| "session_id field is required".to_string())?;
    Ok(CanopyRequest::Answer {
        topology_id,
        question_id,
        session_id,
        label,
        answer,
    })
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check — queries DB and returns (status_code, json_body).
pub async fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    match canopy_core::db::health_check(&state.pool).await {
        Ok(version) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": version,
                "socket": state.config.service.socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "canopy/1",
    })
}

/// Dispatch a validated request through the IPC router and map the response
/// onto an HTTP status + body.
pub async fn dispatch_inner(
    state: &AppState,
    request: CanopyRequest,
) -> (StatusCode, serde_json::Value) {
    let response = handle_request(request, state).await;
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": e,
                "status": "error",
            }),
        ),
    }
}

fn bad_request(message: String) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({
            "error": message,
            "status": "error",
        }),
    )
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    let (status, body) = match validate_generate(req) {
        Ok(request) => dispatch_inner(&state, request).await,
        Err(message) => bad_request(message),
    };
    (status, Json(body))
}

pub async fn topology_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch_inner(&state, CanopyRequest::GetGraph { topology_id: id }).await;
    (status, Json(body))
}

pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch_inner(&state, CanopyRequest::Status { topology_id: id }).await;
    (status, Json(body))
}

pub async fn regenerate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    req: Option<Json<RegenerateRequest>>,
) -> impl IntoResponse {
    let max_nodes = req.and_then(|Json(r)| r.max_nodes);
    let (status, body) = dispatch_inner(
        &state,
        CanopyRequest::Regenerate {
            topology_id: id,
            max_nodes,
        },
    )
    .await;
    (status, Json(body))
}

pub async fn max_nodes_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MaxNodesRequest>,
) -> impl IntoResponse {
    let (status, body) = dispatch_inner(
        &state,
        CanopyRequest::SetMaxNodes {
            topology_id: id,
            max_nodes: req.max_nodes,
        },
    )
    .await;
    (status, Json(body))
}

pub async fn ignore_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<IgnoreRequest>,
) -> impl IntoResponse {
    let (status, body) = dispatch_inner(
        &state,
        CanopyRequest::IgnoreNodes {
            topology_id: id,
            labels: req.ignored_nodes,
        },
    )
    .await;
    (status, Json(body))
}

pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) =
        dispatch_inner(&state, CanopyRequest::ResetMastery { topology_id: id }).await;
    (status, Json(body))
}

pub async fn question_handler(
    State(state): State<Arc<AppState>>,
    Path((id, label)): Path<(Uuid, String)>,
    Query(query): Query<QuestionQuery>,
) -> impl IntoResponse {
    let (status, body) = dispatch_inner(
        &state,
        CanopyRequest::Question {
            topology_id: id,
            label,
            session_id: query.session_id,
        },
    )
    .await;
    (status, Json(body))
}

pub async fn answer_handler(
    State(state): State<Arc<AppState>>,
    Path((id, qid)): Path<(Uuid, Uuid)>,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    let (status, body) = match validate_answer(id, qid, req) {
        Ok(request) => dispatch_inner(&state, request).await,
        Err(message) => bad_request(message),
    };
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an IPC `CanopyResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: CanopyResponse) -> std::result::Result<serde_json::Value, String> {
    if response.status == "ok" {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
