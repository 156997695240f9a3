//! HTTP transport for the FAQ service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer `{"question": "..."}` with `{"answer": "..."}` |
//! | `GET`  | `/history?limit=N` | Most recent interactions, newest first (`n` is accepted as an alias) |
//! | `GET`  | `/health` | Status, version and document count |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid request: question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `backend_unavailable` (503), `internal` (500).
//! Malformed bodies and query strings are reported as `bad_request` too.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::RagError;
use crate::service::RagService;

/// Start the service and serve it on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::start(config).await?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "FAQ server listening");

    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// Routes with CORS and request tracing applied.
pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/history", get(handle_history))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
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

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::BackendUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable")
            }
            RagError::IndexBuild(_) | RagError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: usize,
}

async fn handle_health(State(service): State<Arc<RagService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        documents: service.document_count(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(service): State<Arc<RagService>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = payload?;
    let answer = service.ask(&req.question).await?;
    Ok(Json(AskResponse {
        answer: answer.text,
    }))
}

// ============ GET /history ============

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(alias = "n")]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct HistoryEntry {
    question: String,
    answer: String,
    timestamp: DateTime<Utc>,
}

async fn handle_history(
    State(service): State<Arc<RagService>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let Query(params) = params?;
    let records = service.history(params.limit).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| HistoryEntry {
                question: r.question,
                answer: r.answer,
                timestamp: r.timestamp,
            })
            .collect(),
    ))
}
