//! Enrichment queue repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ClaimedRow, StatusCountRow};
use crate::db::repository::catalog;
use crate::models::ItemMetadata;

/// Claim due queue rows and mark them in progress
///
/// Rows left `in_progress` longer than `stale_after_secs` (crashed worker)
/// are claimable again.
pub async fn claim_batch(pool: &PgPool, limit: i64, stale_after_secs: f64) -> Result<Vec<ClaimedRow>, sqlx::Error> {
    sqlx::query_as::<_, ClaimedRow>(
        r#"
        WITH claimable AS (
            SELECT item_id
            FROM enrichment_queue
            WHERE (status = 'pending' AND next_attempt_at <= NOW())
               OR (status = 'in_progress' AND claimed_at < NOW() - make_interval(secs => $2))
            ORDER BY next_attempt_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE enrichment_queue q
        SET status = 'in_progress', claimed_at = NOW(), updated_at = NOW()
        FROM claimable c, catalog_items i
        WHERE q.item_id = c.item_id AND i.id = q.item_id
        RETURNING q.item_id, q.attempts, i.content_type, i.title, i.year, i.series_name
        "#,
    )
    .bind(limit)
    .bind(stale_after_secs)
    .fetch_all(pool)
    .await
}

/// Store metadata on the catalog row and close the queue entry
pub async fn mark_done(pool: &PgPool, item_id: Uuid, metadata: &ItemMetadata) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    catalog::apply_metadata(&mut *tx, item_id, metadata).await?;

    sqlx::query(
        "UPDATE enrichment_queue SET status = 'done', last_error = NULL, claimed_at = NULL, updated_at = NOW() WHERE item_id = $1",
    )
    .bind(item_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Close a queue entry that TMDB has no match for
pub async fn mark_not_found(pool: &PgPool, item_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE enrichment_queue SET status = 'not_found', claimed_at = NULL, updated_at = NOW() WHERE item_id = $1",
    )
    .bind(item_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Put a row back to `pending` for a later attempt
pub async fn reschedule(
    pool: &PgPool,
    item_id: Uuid,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE enrichment_queue
        SET status = 'pending', attempts = $2, next_attempt_at = $3,
            last_error = COALESCE($4, last_error), claimed_at = NULL, updated_at = NOW()
        WHERE item_id = $1
        "#,
    )
    .bind(item_id)
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Give up on a row after too many failures
pub async fn mark_failed(pool: &PgPool, item_id: Uuid, attempts: i32, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE enrichment_queue
        SET status = 'failed', attempts = $2, last_error = $3, claimed_at = NULL, updated_at = NOW()
        WHERE item_id = $1
        "#,
    )
    .bind(item_id)
    .bind(attempts)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Reset `failed` and `not_found` rows so the worker retries them
pub async fn requeue_finished(pool: &PgPool, include_not_found: bool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE enrichment_queue
        SET status = 'pending', attempts = 0, next_attempt_at = NOW(), last_error = NULL, updated_at = NOW()
        WHERE status = 'failed' OR ($1 AND status = 'not_found')
        "#,
    )
    .bind(include_not_found)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Queue size per status
pub async fn status_counts(pool: &PgPool) -> Result<Vec<StatusCountRow>, sqlx::Error> {
    sqlx::query_as::<_, StatusCountRow>(
        "SELECT status, COUNT(*) AS count FROM enrichment_queue GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await
}
