//! EPG channels and programmes repository

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::db::models::ProgramRow;
use crate::models::{EpgChannel, EpgProgram};

const PROGRAM_SELECT: &str = r#"
    SELECT p.id, p.channel_id, c.display_name AS channel_name, p.title, p.description,
           p.category, p.episode_num, p.icon, p.starts_at, p.ends_at
    FROM epg_programs p
    LEFT JOIN epg_channels c ON c.id = p.channel_id
"#;

/// Insert or update a chunk of channels keyed on their XMLTV id
pub async fn upsert_channels(pool: &PgPool, channels: &[EpgChannel]) -> Result<u64, sqlx::Error> {
    if channels.is_empty() {
        return Ok(0);
    }

    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("INSERT INTO epg_channels (id, display_name, icon) ");
    qb.push_values(channels.iter(), |mut b, channel| {
        b.push_bind(&channel.id)
            .push_bind(&channel.display_name)
            .push_bind(&channel.icon);
    });
    qb.push(
        r#"
        ON CONFLICT (id) DO UPDATE SET
            display_name = EXCLUDED.display_name,
            icon = COALESCE(EXCLUDED.icon, epg_channels.icon),
            updated_at = NOW()
        "#,
    );

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert or update a chunk of programmes keyed on (channel_id, starts_at)
///
/// Rows must be unique on the key within the chunk; `parse_xmltv` output is.
pub async fn upsert_programs(pool: &PgPool, programs: &[EpgProgram]) -> Result<u64, sqlx::Error> {
    if programs.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO epg_programs (channel_id, title, description, category, episode_num, icon, starts_at, ends_at) ",
    );
    qb.push_values(programs.iter(), |mut b, program| {
        b.push_bind(&program.channel_id)
            .push_bind(&program.title)
            .push_bind(&program.description)
            .push_bind(&program.category)
            .push_bind(&program.episode_num)
            .push_bind(&program.icon)
            .push_bind(program.starts_at)
            .push_bind(program.ends_at);
    });
    qb.push(
        r#"
        ON CONFLICT (channel_id, starts_at) DO UPDATE SET
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            category = EXCLUDED.category,
            episode_num = EXCLUDED.episode_num,
            icon = EXCLUDED.icon,
            ends_at = EXCLUDED.ends_at,
            updated_at = NOW()
        "#,
    );

    let result = qb.build().execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(result.rows_affected())
}

/// All channels ordered by name
pub async fn list_channels(pool: &PgPool) -> Result<Vec<EpgChannel>, sqlx::Error> {
    let rows: Vec<(String, String, Option<String>)> =
        sqlx::query_as("SELECT id, display_name, icon FROM epg_channels ORDER BY display_name")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, display_name, icon)| EpgChannel { id, display_name, icon })
        .collect())
}

/// Programme airing at `at` on every channel
pub async fn now_playing(pool: &PgPool, at: DateTime<Utc>) -> Result<Vec<ProgramRow>, sqlx::Error> {
    sqlx::query_as::<_, ProgramRow>(&format!(
        "{} WHERE p.starts_at <= $1 AND p.ends_at > $1 ORDER BY channel_name NULLS LAST, p.channel_id",
        PROGRAM_SELECT
    ))
    .bind(at)
    .fetch_all(pool)
    .await
}

/// Programmes of one channel overlapping [from, to)
pub async fn schedule(
    pool: &PgPool,
    channel_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ProgramRow>, sqlx::Error> {
    sqlx::query_as::<_, ProgramRow>(&format!(
        "{} WHERE p.channel_id = $1 AND p.ends_at > $2 AND p.starts_at < $3 ORDER BY p.starts_at",
        PROGRAM_SELECT
    ))
    .bind(channel_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
}

/// Programmes starting in [from, to), used by the notifier
pub async fn starting_between(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ProgramRow>, sqlx::Error> {
    sqlx::query_as::<_, ProgramRow>(&format!(
        "{} WHERE p.starts_at >= $1 AND p.starts_at < $2 ORDER BY p.starts_at",
        PROGRAM_SELECT
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
}

/// Delete programmes that ended before the cutoff
pub async fn delete_ended_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM epg_programs WHERE ends_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// (channels, programmes) row counts
pub async fn counts(pool: &PgPool) -> Result<(i64, i64), sqlx::Error> {
    sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM epg_channels), (SELECT COUNT(*) FROM epg_programs)",
    )
    .fetch_one(pool)
    .await
}
