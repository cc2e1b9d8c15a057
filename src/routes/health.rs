use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::db;
use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "IPTV Catalog Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    environment: String,
    postgres: bool,
    redis: bool,
    enrichment_enabled: bool,
}

/// Postgres is required for everything; Redis only for ingest jobs
fn overall_status(postgres_ok: bool, redis_ok: bool) -> &'static str {
    match (postgres_ok, redis_ok) {
        (true, true) => "ok",
        (true, false) => "degraded",
        (false, _) => "unhealthy",
    }
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let postgres_ok = db::health_check(&state.pool).await;
    let redis_ok = state.redis.ping().await.unwrap_or(false);

    Json(HealthResponse {
        status: overall_status(postgres_ok, redis_ok),
        uptime: state.start_time.elapsed().as_secs(),
        environment: state.config.app_env.clone(),
        postgres: postgres_ok,
        redis: redis_ok,
        enrichment_enabled: state.config.tmdb_api_key.is_some(),
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness check
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let postgres_ok = db::health_check(&state.pool).await;
    let redis_ok = state.redis.ping().await.unwrap_or(false);

    match overall_status(postgres_ok, redis_ok) {
        "ok" => (StatusCode::OK, "ready"),
        "degraded" => (StatusCode::OK, "ready (redis degraded)"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready - postgres unavailable"),
    }
}

/// Liveness check
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_overall_status() {
        assert_eq!(overall_status(true, true), "ok");
        assert_eq!(overall_status(true, false), "degraded");
        assert_eq!(overall_status(false, true), "unhealthy");
    }

    #[tokio::test]
    async fn test_root_and_live() {
        let app = Router::new().route("/", get(root)).route("/live", get(live));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["name"], "IPTV Catalog Server");

        let response = app
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        crate::services::metrics::record_enrichment("found");

        let app = Router::new().route("/metrics", get(metrics));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("enrichment_requests_total"));
    }
}
