#![allow(clippy::multiple_crate_versions)]

//! Operator surface for the pipeline: health, metrics, task counts, task
//! detail, dependency status, and dead letters. Not wire-versioned.

pub mod models;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sluice_engine::{Coordinator, EngineError, NewTaskRequest};
use sluice_tasks::TypeClass;
use sluice_telemetry::build_sha;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use models::{DeadLetterView, HealthResponse, SubmitTaskRequest, TaskView};

/// Error type surfaced by API construction and serving.
#[derive(Debug, Error)]
pub enum ApiServerError {
    /// Binding or serving the listener failed.
    #[error("api server io failure")]
    Serve {
        /// Underlying IO error.
        source: std::io::Error,
    },
}

#[derive(Clone)]
struct ApiState {
    coordinator: Arc<Coordinator>,
}

/// HTTP server wrapping the operator routes.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the operator router over a running coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let state = ApiState { coordinator };
        let router = Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics))
            .route("/api/tasks", post(submit_task))
            .route("/api/tasks/counts", get(task_counts))
            .route("/api/tasks/{id}", get(task_detail))
            .route("/api/dependencies", get(dependencies))
            .route("/api/dead-letters", get(dead_letters))
            .layer(TraceLayer::new_for_http())
            .with_state(state);
        Self { router }
    }

    /// Bind and serve until the shutdown future resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or serving fails.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<(), ApiServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Serve { source })?;
        info!(addr = %addr, "operator API listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })?;
        Ok(())
    }
}

enum ApiError {
    NotFound,
    Unauthorized,
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            Self::Unauthorized => (StatusCode::FORBIDDEN, "not authorised".to_string()),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => {
                warn!(detail = %message, "operator API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unauthorized { .. } => Self::Unauthorized,
            other => Self::Internal(other.to_string()),
        }
    }
}

async fn healthz(State(state): State<ApiState>) -> Response {
    let snapshot = state.coordinator.context().metrics.snapshot();
    let degraded: Vec<String> = state
        .coordinator
        .dependency_snapshots()
        .into_iter()
        .filter(|dep| dep.status != sluice_engine::DependencyStatus::Available)
        .map(|dep| dep.name)
        .collect();

    Json(HealthResponse {
        status: if degraded.is_empty() { "ok" } else { "degraded" },
        build_sha: build_sha(),
        metrics: snapshot,
        degraded,
    })
    .into_response()
}

async fn metrics(State(state): State<ApiState>) -> Response {
    match state.coordinator.context().metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => ApiError::Internal(err.to_string()).into_response(),
    }
}

async fn submit_task(
    State(state): State<ApiState>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<Response, ApiError> {
    let type_class = match request.file_type.as_str() {
        "archive" => TypeClass::Archive,
        "text" => TypeClass::Text,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown file_type '{other}' (expected archive or text)"
            )));
        }
    };

    let task = state
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: request.owner_id,
            channel_id: request.channel_id,
            file_name: request.file_name,
            file_size: request.file_size,
            type_class,
            uplink_handle: request.uplink_handle,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(TaskView::from(&task))).into_response())
}

async fn task_counts(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let counts = state.coordinator.counts().await?;
    Ok(Json(counts).into_response())
}

async fn task_detail(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest("invalid task id".into()))?;
    let task = state
        .coordinator
        .context()
        .store
        .by_id(id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(TaskView::from(&task)).into_response())
}

async fn dependencies(State(state): State<ApiState>) -> Response {
    Json(state.coordinator.dependency_snapshots()).into_response()
}

async fn dead_letters(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let letters = state
        .coordinator
        .context()
        .store
        .dead_letters(100)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let views: Vec<DeadLetterView> = letters.iter().map(DeadLetterView::from).collect();
    Ok(Json(views).into_response())
}
