//! Upload endpoints. Each accepted upload becomes a background job whose
//! progress is polled via GET /api/ingest/:job_id/status.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::models::{IngestAccepted, IngestUrlRequest};
use crate::routes::admin::{require_admin, AdminQuery};
use crate::routes::{api_error, ApiError};
use crate::services::ingest::{IngestPayload, StartError};
use crate::AppState;

/// Only absolute http(s) URLs with a host are fetched
fn validate_source_url(raw: &str) -> Result<String, ApiError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid URL"))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Only http and https URLs are supported"));
    }

    Ok(parsed.to_string())
}

fn require_body(body: String) -> Result<String, ApiError> {
    if body.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Request body is empty"));
    }
    Ok(body)
}

async fn start_job(state: &AppState, payload: IngestPayload) -> Result<impl IntoResponse, ApiError> {
    match state.ingest.start(payload).await {
        Ok(progress) => Ok((
            StatusCode::ACCEPTED,
            Json(IngestAccepted {
                job_id: progress.job_id,
                kind: progress.kind,
                status: progress.status,
            }),
        )),
        Err(StartError::AlreadyRunning(job_id)) => Err((
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "This upload is already being processed",
                "jobId": job_id
            })),
        )),
        Err(StartError::Other(e)) => {
            tracing::error!("Failed to start ingest job: {:#}", e);
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "Could not start ingest job"))
        }
    }
}

/// POST /api/ingest/m3u - Raw M3U playlist body
pub async fn ingest_m3u(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;
    let body = require_body(body)?;
    start_job(&state, IngestPayload::M3uText(body)).await
}

/// POST /api/ingest/m3u/url - Fetch and ingest a remote playlist
pub async fn ingest_m3u_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    Json(request): Json<IngestUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;
    let url = validate_source_url(&request.url)?;
    start_job(&state, IngestPayload::M3uUrl(url)).await
}

/// POST /api/ingest/json - JSON catalog body
pub async fn ingest_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;
    let body = require_body(body)?;
    start_job(&state, IngestPayload::Json(body)).await
}

/// POST /api/ingest/xmltv - Raw XMLTV document
pub async fn ingest_xmltv(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;
    let body = require_body(body)?;
    start_job(&state, IngestPayload::XmltvText(body)).await
}

/// POST /api/ingest/xmltv/url - Fetch and ingest a remote XMLTV guide
pub async fn ingest_xmltv_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    Json(request): Json<IngestUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;
    let url = validate_source_url(&request.url)?;
    start_job(&state, IngestPayload::XmltvUrl(url)).await
}

/// GET /api/ingest/:job_id/status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state.ingest.progress(&job_id).await.map_err(|e| {
        tracing::error!("Failed to read ingest progress: {:#}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, "Progress store unavailable")
    })?;

    match progress {
        Some(progress) => Ok(Json(progress)),
        None => Err(api_error(StatusCode::NOT_FOUND, "Unknown or expired job")),
    }
}
