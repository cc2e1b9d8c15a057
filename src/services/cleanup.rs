//! Cleanup service for stale EPG data and old notifications
//!
//! Runs as a background task on startup, then periodically.
//! - Deletes programmes that ended more than `epg_retention_hours` ago
//! - Deletes read notifications older than `notification_retention_days`

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time;

use crate::config::Config;
use crate::db::repository;

/// Configuration for the cleanup service
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often to run cleanup (in seconds)
    pub interval_secs: u64,
    pub epg_retention_hours: i64,
    pub notification_retention_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600, // Run every hour
            epg_retention_hours: 48,
            notification_retention_days: 30,
        }
    }
}

impl From<&Config> for CleanupConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval_secs: config.cleanup_interval_secs,
            epg_retention_hours: config.epg_retention_hours,
            notification_retention_days: config.notification_retention_days,
        }
    }
}

impl CleanupConfig {
    pub fn epg_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::hours(self.epg_retention_hours.max(0))
    }

    pub fn notification_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(self.notification_retention_days.max(0))
    }
}

/// Result of a cleanup operation
#[derive(Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub programs_deleted: u64,
    pub notifications_deleted: u64,
    pub errors: Vec<String>,
}

impl CleanupResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn total_deleted(&self) -> u64 {
        self.programs_deleted + self.notifications_deleted
    }
}

/// Delete programmes that ended before the EPG cutoff
pub async fn cleanup_expired_programs(pool: &PgPool, config: &CleanupConfig) -> Result<u64, sqlx::Error> {
    repository::epg::delete_ended_before(pool, config.epg_cutoff(Utc::now())).await
}

/// Run a single cleanup cycle
pub async fn run_cleanup(pool: &PgPool, config: &CleanupConfig) -> CleanupResult {
    let mut result = CleanupResult::default();

    match cleanup_expired_programs(pool, config).await {
        Ok(count) => {
            result.programs_deleted = count;
            if count > 0 {
                tracing::info!("Cleanup: deleted {} expired EPG programmes", count);
            }
        }
        Err(e) => {
            result.errors.push(format!("EPG cleanup failed: {}", e));
            tracing::error!("Cleanup: EPG cleanup failed: {}", e);
        }
    }

    let cutoff = config.notification_cutoff(Utc::now());
    match repository::notifications::delete_read_before(pool, cutoff).await {
        Ok(count) => {
            result.notifications_deleted = count;
            if count > 0 {
                tracing::info!("Cleanup: deleted {} old notifications", count);
            }
        }
        Err(e) => {
            result.errors.push(format!("Notification cleanup failed: {}", e));
            tracing::error!("Cleanup: notification cleanup failed: {}", e);
        }
    }

    result
}

/// Start the background cleanup task
///
/// Runs immediately on startup, then periodically at the configured interval.
/// This should be spawned as a background task using `tokio::spawn`.
pub async fn start_cleanup_task(pool: PgPool, config: CleanupConfig) {
    tracing::info!(
        "Starting cleanup task (interval: {}s, epg retention: {}h, notification retention: {}d)",
        config.interval_secs,
        config.epg_retention_hours,
        config.notification_retention_days
    );

    // The first tick completes immediately, so this also covers startup
    let mut interval = time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        interval.tick().await;

        let result = run_cleanup(&pool, &config).await;
        if !result.is_success() {
            for error in &result.errors {
                tracing::warn!("Cleanup error: {}", error);
            }
        } else if result.total_deleted() > 0 {
            tracing::info!(
                "Cleanup complete: {} programmes, {} notifications deleted",
                result.programs_deleted,
                result.notifications_deleted
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cutoffs() {
        let config = CleanupConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();

        assert_eq!(config.epg_cutoff(now), Utc.with_ymd_and_hms(2025, 3, 8, 12, 0, 0).unwrap());
        assert_eq!(config.notification_cutoff(now), Utc.with_ymd_and_hms(2025, 2, 8, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_negative_retention_is_clamped() {
        let config = CleanupConfig {
            epg_retention_hours: -5,
            ..Default::default()
        };
        let now = Utc::now();
        assert_eq!(config.epg_cutoff(now), now);
    }

    #[test]
    fn test_result_totals() {
        let result = CleanupResult {
            programs_deleted: 3,
            notifications_deleted: 2,
            errors: vec![],
        };
        assert!(result.is_success());
        assert_eq!(result.total_deleted(), 5);
    }
}
