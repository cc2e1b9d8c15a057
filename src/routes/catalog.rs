use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repository::{catalog, CatalogFilter};
use crate::models::{CatalogGroup, CatalogItem, CatalogPage, CatalogQuery, ContentType};
use crate::routes::{api_error, db_error, ApiError};
use crate::AppState;

const MAX_PAGE_SIZE: i64 = 500;

/// Unknown type names are rejected rather than silently ignored
fn parse_type(raw: Option<&str>) -> Result<Option<ContentType>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => ContentType::from_loose(value)
            .map(Some)
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("Unknown content type: {}", value))),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// GET /api/catalog - Paginated catalog listing
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);

    let filter = CatalogFilter {
        content_type: parse_type(query.content_type.as_deref())?,
        group: non_empty(&query.group),
        search: non_empty(&query.q),
    };

    let rows = catalog::list(&state.pool, &filter, limit, offset)
        .await
        .map_err(|e| db_error("Failed to list catalog", e))?;
    let total = catalog::count(&state.pool, &filter)
        .await
        .map_err(|e| db_error("Failed to count catalog", e))?;

    let items: Vec<CatalogItem> = rows.into_iter().map(CatalogItem::from).collect();
    let has_more = offset + (items.len() as i64) < total;

    Ok(Json(CatalogPage {
        items,
        total,
        limit,
        offset,
        has_more,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GroupsQuery {
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
}

/// GET /api/catalog/groups
pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = parse_type(query.content_type.as_deref())?;

    let groups: Vec<CatalogGroup> = catalog::list_groups(&state.pool, content_type)
        .await
        .map_err(|e| db_error("Failed to list groups", e))?
        .into_iter()
        .map(CatalogGroup::from)
        .collect();

    Ok(Json(serde_json::json!({ "groups": groups })))
}

/// GET /api/catalog/:id
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = catalog::find_by_id(&state.pool, id)
        .await
        .map_err(|e| db_error("Failed to load catalog item", e))?;

    match row {
        Some(row) => Ok(Json(CatalogItem::from(row))),
        None => Err(api_error(StatusCode::NOT_FOUND, "Item not found")),
    }
}
