//! HTTP request handlers.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::jockey::{AssistantInfo, StreamMode};
use crate::relay::RunRequest;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: HealthServices,
}

#[derive(Debug, Serialize)]
pub struct HealthServices {
    pub jockey_service: String,
    pub active_threads: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: HealthServices {
            jockey_service: "available".to_string(),
            active_threads: state.registry.thread_count(),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct IndexIdResponse {
    pub index_id: Option<String>,
}

/// Default index id from configuration.
pub async fn get_index_id(State(state): State<AppState>) -> Json<IndexIdResponse> {
    Json(IndexIdResponse {
        index_id: state.default_index_id().map(str::to_string),
    })
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Allocate a thread id for a new processing session.
#[instrument(skip(state))]
pub async fn init_process(State(state): State<AppState>) -> Json<ThreadResponse> {
    let thread_id = uuid::Uuid::new_v4().to_string();
    state.registry.register_thread(&thread_id);
    info!(thread_id = %thread_id, "Initialized processing thread");

    Json(ThreadResponse {
        thread_id,
        status: Some("initialized".to_string()),
    })
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub text: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub index_id: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub stream_mode: Option<StreamMode>,
}

#[derive(Debug, Serialize)]
pub struct Timeline {
    pub start_time: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub operation_id: String,
    pub status: String,
    pub thread_id: String,
    pub timeline: Timeline,
}

/// Start a streaming session; results are delivered over SSE or WebSocket.
#[instrument(skip(state, request))]
pub async fn process(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::bad_request("Text must not be empty"));
    }

    let index_id = state
        .orchestrator
        .resolve_index_id(request.index_id.as_deref())
        .ok_or_else(|| {
            ApiError::bad_request("Index ID must be provided for video processing.")
        })?;

    let thread_id = request
        .thread_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let session = state.orchestrator.spawn(RunRequest {
        text: request.text,
        thread_id: thread_id.clone(),
        index_id: Some(index_id),
        assistant_id: request.assistant_id,
        stream_mode: request
            .stream_mode
            .unwrap_or(state.stream.default_stream_mode),
    });

    info!(
        operation_id = %session.operation_id,
        thread_id = %thread_id,
        "Started processing session"
    );

    Ok(Json(ProcessResponse {
        operation_id: session.operation_id,
        status: "processing".to_string(),
        thread_id,
        timeline: Timeline {
            start_time: chrono::Utc::now().to_rfc3339(),
        },
    }))
}

/// List the assistants offered by Jockey.
#[instrument(skip(state))]
pub async fn list_assistants(State(state): State<AppState>) -> ApiResult<Json<Vec<AssistantInfo>>> {
    let assistants = state.jockey.search_assistants().await?;
    info!(count = assistants.len(), "Listed Jockey assistants");
    Ok(Json(assistants))
}

/// Create a Jockey thread and make it known to the registry.
#[instrument(skip(state))]
pub async fn create_thread(State(state): State<AppState>) -> ApiResult<Json<ThreadResponse>> {
    let thread_id = state.jockey.create_thread().await?;
    state.registry.register_thread(&thread_id);
    info!(thread_id = %thread_id, "Created Jockey thread");

    Ok(Json(ThreadResponse {
        thread_id,
        status: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    #[serde(default)]
    pub thread_id: String,
}

/// List the runs of a Jockey thread.
#[instrument(skip(state))]
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ThreadQuery>,
) -> ApiResult<Json<Value>> {
    if query.thread_id.is_empty() {
        return Err(ApiError::bad_request("thread_id is required"));
    }
    let runs = state.jockey.list_runs(&query.thread_id).await?;
    Ok(Json(runs))
}

/// Relay a rendered video from the static asset origin.
#[instrument(skip(state))]
pub async fn get_video(
    State(state): State<AppState>,
    Path((index_id, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    if [&index_id, &filename]
        .iter()
        .any(|part| part.is_empty() || part.contains("..") || part.contains('/'))
    {
        return Err(ApiError::bad_request("Invalid video path"));
    }

    let upstream = state.jockey.fetch_video(&index_id, &filename).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4");
    if let Some(length) = upstream.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Fallback for unknown API paths.
pub async fn not_found() -> impl IntoResponse {
    ApiError::not_found("No such endpoint")
}
