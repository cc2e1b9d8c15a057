mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::services::{
    cleanup::{start_cleanup_task, CleanupConfig},
    enrichment::start_enrichment_task,
    ingest::IngestService,
    notifier::start_notifier_task,
    redis::RedisService,
    tmdb::TmdbClient,
};
use sqlx::PgPool;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub redis: RedisService,
    pub ingest: Arc<IngestService>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iptv_catalog_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting IPTV Catalog Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app_env);

    if config.admin_key.is_none() {
        tracing::warn!("ADMIN_KEY is not set; admin and ingest endpoints will reject every request");
    }

    let pool = create_pool(&config).await?;
    tracing::info!("PostgreSQL connected");

    run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let redis = RedisService::new(&config.redis_url).await?;
    tracing::info!("Redis connected");

    let ingest = Arc::new(IngestService::new(&config, pool.clone(), redis.clone())?);

    // Background tasks
    tokio::spawn(start_cleanup_task(pool.clone(), CleanupConfig::from(&config)));
    tokio::spawn(start_notifier_task(
        pool.clone(),
        config.notify_interval_secs,
        config.notify_lookahead_hours,
    ));

    match &config.tmdb_api_key {
        Some(api_key) => {
            let tmdb = TmdbClient::new(
                api_key,
                &config.tmdb_base_url,
                &config.tmdb_image_base_url,
                &config.tmdb_language,
            )?;
            start_enrichment_task(pool.clone(), tmdb, config.enrichment_settings());
            tracing::info!("Enrichment worker started");
        }
        None => tracing::warn!("TMDB_API_KEY is not set; enrichment worker disabled"),
    }

    let max_upload_bytes = config.max_upload_bytes();

    let state = Arc::new(AppState {
        config,
        pool,
        redis,
        ingest,
        start_time: Instant::now(),
    });

    let app = Router::new()
        // Health endpoints
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/ready", get(routes::health::ready))
        .route("/live", get(routes::health::live))
        // Ingest endpoints (protected by ADMIN_KEY)
        .route("/api/ingest/m3u", post(routes::ingest::ingest_m3u))
        .route("/api/ingest/m3u/url", post(routes::ingest::ingest_m3u_url))
        .route("/api/ingest/json", post(routes::ingest::ingest_json))
        .route("/api/ingest/xmltv", post(routes::ingest::ingest_xmltv))
        .route("/api/ingest/xmltv/url", post(routes::ingest::ingest_xmltv_url))
        .route("/api/ingest/:job_id/status", get(routes::ingest::get_status))
        // Catalog
        .route("/api/catalog", get(routes::catalog::list_items))
        .route("/api/catalog/groups", get(routes::catalog::list_groups))
        .route("/api/catalog/:id", get(routes::catalog::get_item))
        // EPG
        .route("/api/epg/channels", get(routes::epg::list_channels))
        .route("/api/epg/now", get(routes::epg::now_playing))
        .route("/api/epg/channel/:channel_id", get(routes::epg::channel_schedule))
        // Users & notifications
        .route(
            "/api/users/:user_id/notifications",
            get(routes::notifications::list_notifications),
        )
        .route(
            "/api/users/:user_id/notifications/:id/read",
            post(routes::notifications::mark_read),
        )
        .route(
            "/api/users/:user_id/favorite-team",
            put(routes::notifications::set_favorite_team),
        )
        // Admin endpoints (protected by ADMIN_KEY)
        .route("/api/admin/stats", get(routes::admin::get_stats))
        .route(
            "/api/admin/enrichment/requeue",
            post(routes::admin::requeue_enrichment),
        )
        .route(
            "/api/admin/notifications/fanout",
            post(routes::admin::trigger_fanout),
        )
        .route("/api/admin/epg/expired", delete(routes::admin::delete_expired_epg))
        // Middleware
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
