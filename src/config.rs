use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub app_env: String,
    pub admin_key: Option<String>,
    pub max_upload_mb: usize,

    // Redis
    pub redis_url: String,

    // PostgreSQL
    pub database_url: String,
    pub db_max_connections: u32,

    // Remote fetch
    pub user_agent: String,
    pub fetch_timeout_ms: u64,
    pub fetch_max_retries: u32,

    // Catalog upsert
    pub upsert_chunk_size: usize,
    pub upsert_max_retries: u32,
    pub upsert_backoff_base_ms: u64,
    pub upsert_backoff_max_ms: u64,

    // TMDB enrichment
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub tmdb_image_base_url: String,
    pub tmdb_language: String,
    pub enrich_request_interval_ms: u64,
    pub enrich_batch_size: i64,
    pub enrich_idle_poll_secs: u64,
    pub enrich_max_attempts: i32,

    // Notifications
    pub notify_interval_secs: u64,
    pub notify_lookahead_hours: i64,

    // Maintenance
    pub epg_retention_hours: i64,
    pub notification_retention_days: i64,
    pub cleanup_interval_secs: u64,
    pub ingest_progress_ttl_secs: u64,
}

/// Read an env var and parse it, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env_or("PORT", 3001),
            app_env: env_string("APP_ENV", "development"),
            admin_key: env_optional("ADMIN_KEY"),
            max_upload_mb: env_or("MAX_UPLOAD_MB", 200),

            // Redis
            redis_url: env_string("REDIS_URL", "redis://localhost:6379"),

            // PostgreSQL
            database_url: env_string("DATABASE_URL", "postgres://localhost/iptv_catalog"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 15),

            // Remote fetch - VLC user agent avoids IPTV server blocks
            user_agent: env_string("USER_AGENT", "VLC/3.0.20 LibVLC/3.0.20"),
            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", 300_000), // 5 minutes
            fetch_max_retries: env_or("FETCH_MAX_RETRIES", 3),

            // Catalog upsert
            upsert_chunk_size: env_or("UPSERT_CHUNK_SIZE", 500),
            upsert_max_retries: env_or("UPSERT_MAX_RETRIES", 3),
            upsert_backoff_base_ms: env_or("UPSERT_BACKOFF_BASE_MS", 500),
            upsert_backoff_max_ms: env_or("UPSERT_BACKOFF_MAX_MS", 10_000),

            // TMDB enrichment
            tmdb_api_key: env_optional("TMDB_API_KEY"),
            tmdb_base_url: env_string("TMDB_BASE_URL", "https://api.themoviedb.org/3"),
            tmdb_image_base_url: env_string("TMDB_IMAGE_BASE_URL", "https://image.tmdb.org/t/p"),
            tmdb_language: env_string("TMDB_LANGUAGE", "en-US"),
            enrich_request_interval_ms: env_or("ENRICH_REQUEST_INTERVAL_MS", 260),
            enrich_batch_size: env_or("ENRICH_BATCH_SIZE", 20),
            enrich_idle_poll_secs: env_or("ENRICH_IDLE_POLL_SECS", 30),
            enrich_max_attempts: env_or("ENRICH_MAX_ATTEMPTS", 5),

            // Notifications
            notify_interval_secs: env_or("NOTIFY_INTERVAL_SECS", 900), // 15 minutes
            notify_lookahead_hours: env_or("NOTIFY_LOOKAHEAD_HOURS", 24),

            // Maintenance
            epg_retention_hours: env_or("EPG_RETENTION_HOURS", 48),
            notification_retention_days: env_or("NOTIFICATION_RETENTION_DAYS", 30),
            cleanup_interval_secs: env_or("CLEANUP_INTERVAL_SECS", 3600),
            ingest_progress_ttl_secs: env_or("INGEST_PROGRESS_TTL_SECS", 86_400),
        }
    }

    /// Retry policy for catalog and EPG chunk upserts
    pub fn upsert_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.upsert_max_retries,
            base_delay: Duration::from_millis(self.upsert_backoff_base_ms),
            max_delay: Duration::from_millis(self.upsert_backoff_max_ms),
        }
    }

    /// Retry policy for remote playlist/EPG downloads
    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.fetch_max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn enrichment_settings(&self) -> EnrichmentSettings {
        EnrichmentSettings {
            request_interval: Duration::from_millis(self.enrich_request_interval_ms.max(1)),
            batch_size: self.enrich_batch_size.max(1),
            idle_poll: Duration::from_secs(self.enrich_idle_poll_secs),
            max_attempts: self.enrich_max_attempts.max(1),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Knobs for the enrichment polling loop
#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    /// Minimum spacing between two external API calls
    pub request_interval: Duration,
    pub batch_size: i64,
    /// Sleep when the queue is empty
    pub idle_poll: Duration,
    pub max_attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("IPTV_TEST_GARBAGE_PORT", "not-a-number");
        let port: u16 = env_or("IPTV_TEST_GARBAGE_PORT", 3001);
        assert_eq!(port, 3001);
        env::remove_var("IPTV_TEST_GARBAGE_PORT");
    }

    #[test]
    fn test_env_optional_ignores_blank() {
        env::set_var("IPTV_TEST_BLANK_KEY", "   ");
        assert_eq!(env_optional("IPTV_TEST_BLANK_KEY"), None);
        env::remove_var("IPTV_TEST_BLANK_KEY");
    }

    #[test]
    fn test_enrichment_settings_clamps_zero_values() {
        let mut config = Config::from_env();
        config.enrich_request_interval_ms = 0;
        config.enrich_batch_size = 0;
        config.enrich_max_attempts = 0;

        let settings = config.enrichment_settings();
        assert_eq!(settings.request_interval, Duration::from_millis(1));
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.max_attempts, 1);
    }
}
