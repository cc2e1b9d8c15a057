use axum::{http::StatusCode, Json};

pub mod admin;
pub mod catalog;
pub mod epg;
pub mod health;
pub mod ingest;
pub mod notifications;

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Log a database failure and hide its details from the client
pub fn db_error(context: &str, e: sqlx::Error) -> ApiError {
    tracing::error!("{}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}
