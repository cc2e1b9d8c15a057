use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repository::notifications;
use crate::models::{FavoriteTeamRequest, Notification, NotificationsQuery};
use crate::routes::{api_error, db_error, ApiError};
use crate::AppState;

const MAX_NOTIFICATIONS: i64 = 200;
const MAX_TEAM_LEN: usize = 100;

fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() || user_id.len() > 128 {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid user id"));
    }
    Ok(())
}

/// Blank names clear the team
fn normalize_team(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    let team = raw.map(str::trim).filter(|t| !t.is_empty());
    match team {
        Some(t) if t.chars().count() > MAX_TEAM_LEN => Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Team name is limited to {} characters", MAX_TEAM_LEN),
        )),
        other => Ok(other.map(str::to_string)),
    }
}

/// GET /api/users/:user_id/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<NotificationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_user_id(&user_id)?;
    let limit = query.limit.clamp(1, MAX_NOTIFICATIONS);

    let items: Vec<Notification> = notifications::list_for_user(&state.pool, &user_id, query.unread_only, limit)
        .await
        .map_err(|e| db_error("Failed to list notifications", e))?
        .into_iter()
        .map(Notification::from)
        .collect();

    Ok(Json(serde_json::json!({ "notifications": items })))
}

/// POST /api/users/:user_id/notifications/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path((user_id, id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    validate_user_id(&user_id)?;

    let updated = notifications::mark_read(&state.pool, &user_id, id)
        .await
        .map_err(|e| db_error("Failed to mark notification read", e))?;

    if !updated {
        return Err(api_error(StatusCode::NOT_FOUND, "Notification not found"));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// PUT /api/users/:user_id/favorite-team
pub async fn set_favorite_team(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<FavoriteTeamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_user_id(&user_id)?;
    let team = normalize_team(request.favorite_team.as_deref())?;

    notifications::upsert_favorite_team(&state.pool, &user_id, team.as_deref(), request.notifications_enabled)
        .await
        .map_err(|e| db_error("Failed to save favorite team", e))?;

    tracing::info!("user_id" = %user_id, "team" = ?team, "Favorite team updated");

    Ok(Json(serde_json::json!({
        "success": true,
        "favoriteTeam": team
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_team() {
        assert_eq!(normalize_team(Some("  Flamengo ")).unwrap().as_deref(), Some("Flamengo"));
        assert_eq!(normalize_team(Some("   ")).unwrap(), None);
        assert_eq!(normalize_team(None).unwrap(), None);
        assert!(normalize_team(Some(&"x".repeat(101))).is_err());
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("device-42").is_ok());
        assert!(validate_user_id(" ").is_err());
        assert!(validate_user_id(&"u".repeat(129)).is_err());
    }
}
