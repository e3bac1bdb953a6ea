//! REST handlers.

use std::sync::{Arc, PoisonError};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use super::AppState;
use crate::bridge::BridgeStatus;
use crate::monitor::MonitorStats;
use crate::summarizer::{Summary, SummarizerError};
use crate::transcript::TranscriptLog;

/// Error response rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        error!(error = %e, "Storage error");
        Self::Internal(e.to_string())
    }
}

impl From<SummarizerError> for ApiError {
    fn from(e: SummarizerError) -> Self {
        match e {
            e @ SummarizerError::Unavailable => Self::Unavailable(e.to_string()),
            SummarizerError::NotFound(_) => Self::NotFound,
            other => {
                warn!(error = %other, "Summarization failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    bridge: BridgeStatus,
    external_service_available: bool,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (bridge, external_service_available) =
        tokio::join!(state.bridge.status(), state.summarizer.check_available());
    Json(StatusResponse {
        bridge,
        external_service_available,
    })
}

pub async fn list_logs(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.transcripts.list().await?))
}

pub async fn read_log(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let content = state
        .transcripts
        .read(&filename)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct SummarizeRequest {
    #[serde(default)]
    filename: Option<String>,
}

/// Summarize a transcript; defaults to today's plain transcript.
pub async fn summarize(
    State(state): State<AppState>,
    body: Option<Json<SummarizeRequest>>,
) -> Result<Json<Summary>, ApiError> {
    let filename = body
        .and_then(|Json(req)| req.filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| TranscriptLog::plain_name(Utc::now().date_naive()));
    Ok(Json(state.summarizer.summarize(&filename).await?))
}

pub async fn list_summaries(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.summarizer.summaries().list().await?))
}

pub async fn read_summary(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let content = state
        .summarizer
        .summaries()
        .read(&filename)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], content).into_response())
}

pub async fn monitor(State(state): State<AppState>) -> Result<Json<MonitorStats>, ApiError> {
    let monitor = Arc::clone(&state.monitor);
    let stats = tokio::task::spawn_blocking(move || {
        monitor.lock().unwrap_or_else(PoisonError::into_inner).sample()
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(stats))
}
