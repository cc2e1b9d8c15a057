//! Admin/Management endpoints (protected by ADMIN_KEY)

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::repository::{catalog, enrichment, epg, notifications};
use crate::routes::{api_error, db_error, ApiError};
use crate::services::cleanup::{cleanup_expired_programs, CleanupConfig};
use crate::services::notifier::run_fanout;
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Query params for admin operations
#[derive(Debug, Default, Deserialize)]
pub struct AdminQuery {
    /// Admin key, when not sent in the header
    pub key: Option<String>,
}

/// The header wins over the query parameter. No configured key means no access.
fn admin_key_matches(configured: Option<&str>, headers: &HeaderMap, query_key: Option<&str>) -> bool {
    let Some(expected) = configured else {
        return false;
    };

    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query_key);

    provided == Some(expected)
}

/// Reject the request unless it carries the admin key
pub fn require_admin(state: &AppState, headers: &HeaderMap, query: &AdminQuery) -> Result<(), ApiError> {
    if admin_key_matches(state.config.admin_key.as_deref(), headers, query.key.as_deref()) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "Invalid or missing admin key"))
    }
}

/// Stats response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub catalog: BTreeMap<String, i64>,
    pub enrichment_queue: BTreeMap<String, i64>,
    pub epg_channels: i64,
    pub epg_programs: i64,
    pub users: i64,
    pub notifications: i64,
}

/// GET /api/admin/stats - Table counts and enrichment queue breakdown
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;

    let catalog = catalog::count_by_type(&state.pool)
        .await
        .map_err(|e| db_error("Failed to count catalog items", e))?;

    let queue = enrichment::status_counts(&state.pool)
        .await
        .map_err(|e| db_error("Failed to count enrichment queue", e))?;

    let (epg_channels, epg_programs) = epg::counts(&state.pool)
        .await
        .map_err(|e| db_error("Failed to count EPG rows", e))?;

    let users = notifications::count_users(&state.pool).await.unwrap_or(0);
    let notification_count = notifications::count(&state.pool).await.unwrap_or(0);

    Ok(Json(StatsResponse {
        catalog: catalog.into_iter().collect(),
        enrichment_queue: queue.into_iter().map(|row| (row.status, row.count)).collect(),
        epg_channels,
        epg_programs,
        users,
        notifications: notification_count,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueRequest {
    /// Also retry items TMDB had no match for
    #[serde(default)]
    pub include_not_found: bool,
}

/// POST /api/admin/enrichment/requeue - Put failed (and optionally not-found) items back in the queue
pub async fn requeue_enrichment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    body: Option<Json<RequeueRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;

    let request = body.map(|Json(r)| r).unwrap_or_default();
    let requeued = enrichment::requeue_finished(&state.pool, request.include_not_found)
        .await
        .map_err(|e| db_error("Failed to requeue enrichment", e))?;

    tracing::info!("Admin: requeued {} enrichment items", requeued);

    Ok(Json(serde_json::json!({
        "success": true,
        "requeued": requeued
    })))
}

/// POST /api/admin/notifications/fanout - Run the favorite-team fan-out now
pub async fn trigger_fanout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;

    let lookahead = chrono::Duration::hours(state.config.notify_lookahead_hours.max(1));
    let report = run_fanout(&state.pool, Utc::now(), lookahead, "manual")
        .await
        .map_err(|e| {
            tracing::error!("Manual fan-out failed: {:#}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Notification fan-out failed")
        })?;

    tracing::info!("Admin: fan-out inserted {} notifications", report.inserted);
    Ok(Json(report))
}

/// DELETE /api/admin/epg/expired - Delete programmes past the retention window
pub async fn delete_expired_epg(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers, &query)?;

    let config = CleanupConfig::from(&state.config);
    let deleted = cleanup_expired_programs(&state.pool, &config)
        .await
        .map_err(|e| db_error("Failed to delete expired programmes", e))?;

    tracing::info!("Admin: deleted {} expired programmes", deleted);

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Deleted {} expired programmes", deleted),
        "deleted": deleted
    })))
}
