//! Notifications and user profile repository

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::models::{NotificationRow, UserProfileRow};
use crate::models::NewNotification;

/// Insert notifications, ignoring (user, programme) pairs that already exist
///
/// Returns the number of rows actually inserted.
pub async fn insert_many(pool: &PgPool, notifications: &[NewNotification]) -> Result<u64, sqlx::Error> {
    if notifications.is_empty() {
        return Ok(0);
    }

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("INSERT INTO notifications (user_id, title, body, program_id, channel_id, starts_at) ");
    qb.push_values(notifications.iter(), |mut b, n| {
        b.push_bind(&n.user_id)
            .push_bind(&n.title)
            .push_bind(&n.body)
            .push_bind(n.program_id)
            .push_bind(&n.channel_id)
            .push_bind(n.starts_at);
    });
    qb.push(" ON CONFLICT (user_id, program_id) DO NOTHING");

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Latest notifications of a user
pub async fn list_for_user(
    pool: &PgPool,
    user_id: &str,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<NotificationRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT id, title, body, program_id, channel_id, starts_at, read_at, created_at
        FROM notifications
        WHERE user_id = $1 AND (NOT $2 OR read_at IS NULL)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Mark one notification read; false when it does not belong to the user
pub async fn mark_read(pool: &PgPool, user_id: &str, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = COALESCE(read_at, NOW()) WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete read notifications created before the cutoff
pub async fn delete_read_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM notifications WHERE read_at IS NOT NULL AND created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Users that want notifications and have a favorite team
pub async fn users_with_favorite_team(pool: &PgPool) -> Result<Vec<UserProfileRow>, sqlx::Error> {
    sqlx::query_as::<_, UserProfileRow>(
        r#"
        SELECT user_id, favorite_team
        FROM user_profiles
        WHERE notifications_enabled AND favorite_team IS NOT NULL AND BTRIM(favorite_team) <> ''
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Create or update a user's favorite team and notification preference
pub async fn upsert_favorite_team(
    pool: &PgPool,
    user_id: &str,
    favorite_team: Option<&str>,
    notifications_enabled: Option<bool>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_profiles (user_id, favorite_team, notifications_enabled)
        VALUES ($1, $2, COALESCE($3, TRUE))
        ON CONFLICT (user_id) DO UPDATE SET
            favorite_team = EXCLUDED.favorite_team,
            notifications_enabled = COALESCE($3, user_profiles.notifications_enabled),
            updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(favorite_team)
    .bind(notifications_enabled)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_users(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_profiles")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
