use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::db::repository::epg;
use crate::models::{ProgramView, ScheduleQuery};
use crate::routes::{api_error, db_error, ApiError};
use crate::AppState;

/// Longest schedule window a client may request
const MAX_WINDOW_DAYS: i64 = 14;

/// Default window is now..+24h; `to` defaults to 24h after `from`
fn schedule_window(query: &ScheduleQuery, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let from = query.from.unwrap_or(now);
    let to = query.to.unwrap_or(from + Duration::hours(24));

    if to <= from {
        return Err(api_error(StatusCode::BAD_REQUEST, "`to` must be after `from`"));
    }
    if to - from > Duration::days(MAX_WINDOW_DAYS) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Schedule window is limited to {} days", MAX_WINDOW_DAYS),
        ));
    }

    Ok((from, to))
}

/// GET /api/epg/channels
pub async fn list_channels(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let channels = epg::list_channels(&state.pool)
        .await
        .map_err(|e| db_error("Failed to list EPG channels", e))?;

    Ok(Json(serde_json::json!({ "channels": channels })))
}

/// GET /api/epg/now - Programme currently airing on each channel
pub async fn now_playing(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let programs: Vec<ProgramView> = epg::now_playing(&state.pool, Utc::now())
        .await
        .map_err(|e| db_error("Failed to load current programmes", e))?
        .into_iter()
        .map(ProgramView::from)
        .collect();

    Ok(Json(serde_json::json!({ "programs": programs })))
}

/// GET /api/epg/channel/:channel_id
pub async fn channel_schedule(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (from, to) = schedule_window(&query, Utc::now())?;

    let programs: Vec<ProgramView> = epg::schedule(&state.pool, &channel_id, from, to)
        .await
        .map_err(|e| db_error("Failed to load schedule", e))?
        .into_iter()
        .map(ProgramView::from)
        .collect();

    Ok(Json(serde_json::json!({
        "channelId": channel_id,
        "from": from,
        "to": to,
        "programs": programs
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schedule_window_defaults() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        let query = ScheduleQuery { from: None, to: None };

        let (from, to) = schedule_window(&query, now).unwrap();
        assert_eq!(from, now);
        assert_eq!(to, now + Duration::hours(24));
    }

    #[test]
    fn test_schedule_window_validation() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();

        let reversed = ScheduleQuery {
            from: Some(now),
            to: Some(now - Duration::hours(1)),
        };
        assert!(schedule_window(&reversed, now).is_err());

        let too_long = ScheduleQuery {
            from: Some(now),
            to: Some(now + Duration::days(30)),
        };
        assert!(schedule_window(&too_long, now).is_err());

        let explicit_from = ScheduleQuery {
            from: Some(now + Duration::days(1)),
            to: None,
        };
        let (from, to) = schedule_window(&explicit_from, now).unwrap();
        assert_eq!(to - from, Duration::hours(24));
    }
}
