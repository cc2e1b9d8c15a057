//! Database connection pool management

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;
use crate::services::retry::{retry_with_backoff, RetryPolicy};

/// Create a PostgreSQL connection pool
///
/// The database often comes up after the server in container setups, so the
/// first connect is retried with backoff.
pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    info!("Connecting to PostgreSQL...");

    let policy = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(15),
    };

    let url = config.database_url.as_str();
    let max_connections = config.db_max_connections;

    let pool = retry_with_backoff(&policy, "postgres_connect", move || {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(url)
    })
    .await?;

    info!("PostgreSQL connection pool created with max {} connections", config.db_max_connections);

    Ok(pool)
}

/// Run embedded migrations from ./migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations...");

    sqlx::migrate!("./migrations").run(pool).await?;

    info!("Database migrations completed");

    Ok(())
}

/// Health check for the database
pub async fn health_check(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(e) => {
            error!("Database health check failed: {}", e);
            false
        }
    }
}
