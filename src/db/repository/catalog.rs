//! Catalog items repository

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::models::{CatalogRow, GroupRow, UpsertedRow, CATALOG_COLUMNS};
use crate::models::{CatalogEntry, ContentType, ItemMetadata};

/// Rows written by one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub upserted: u64,
    pub queued: u64,
}

/// Upsert one chunk of entries and queue new movies/series for enrichment
///
/// Runs in a single transaction. TMDB columns are never touched here so a
/// re-import keeps previously fetched metadata. Entries must have unique
/// stream URLs within the chunk.
pub async fn upsert_chunk(pool: &PgPool, entries: &[CatalogEntry]) -> Result<ChunkCounts, sqlx::Error> {
    if entries.is_empty() {
        return Ok(ChunkCounts::default());
    }

    let mut tx = pool.begin().await?;

    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO catalog_items (stream_url, name, title, content_type, quality, group_name, logo, \
         epg_id, year, season, episode, series_name, source) ",
    );
    qb.push_values(entries.iter(), |mut b, entry| {
        b.push_bind(&entry.stream_url)
            .push_bind(&entry.name)
            .push_bind(&entry.title)
            .push_bind(entry.content_type.as_str())
            .push_bind(entry.quality.map(|q| q.as_str()))
            .push_bind(&entry.group)
            .push_bind(&entry.logo)
            .push_bind(&entry.epg_id)
            .push_bind(entry.year.map(i32::from))
            .push_bind(entry.season.map(i32::from))
            .push_bind(entry.episode.map(i32::from))
            .push_bind(&entry.series_name)
            .push_bind(entry.source.as_str());
    });
    qb.push(
        r#"
        ON CONFLICT (stream_url) DO UPDATE SET
            name = EXCLUDED.name,
            title = EXCLUDED.title,
            content_type = EXCLUDED.content_type,
            quality = EXCLUDED.quality,
            group_name = EXCLUDED.group_name,
            logo = EXCLUDED.logo,
            epg_id = EXCLUDED.epg_id,
            year = EXCLUDED.year,
            season = EXCLUDED.season,
            episode = EXCLUDED.episode,
            series_name = EXCLUDED.series_name,
            source = EXCLUDED.source,
            updated_at = NOW()
        RETURNING id, content_type, tmdb_id
        "#,
    );

    let rows: Vec<UpsertedRow> = qb.build_query_as().fetch_all(&mut *tx).await?;

    let to_queue: Vec<Uuid> = rows.iter().filter(|r| r.needs_enrichment()).map(|r| r.id).collect();
    let queued = if to_queue.is_empty() {
        0
    } else {
        sqlx::query(
            r#"
            INSERT INTO enrichment_queue (item_id)
            SELECT UNNEST($1::uuid[])
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(&to_queue)
        .execute(&mut *tx)
        .await?
        .rows_affected()
    };

    tx.commit().await?;

    Ok(ChunkCounts {
        upserted: rows.len() as u64,
        queued,
    })
}

/// Filters for catalog listing
#[derive(Debug, Default)]
pub struct CatalogFilter<'a> {
    pub content_type: Option<ContentType>,
    pub group: Option<&'a str>,
    pub search: Option<&'a str>,
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &CatalogFilter<'a>) {
    qb.push(" WHERE TRUE");
    if let Some(content_type) = filter.content_type {
        qb.push(" AND content_type = ").push_bind(content_type.as_str());
    }
    if let Some(group) = filter.group {
        qb.push(" AND group_name = ").push_bind(group);
    }
    if let Some(search) = filter.search {
        qb.push(" AND LOWER(title) LIKE ")
            .push_bind(format!("%{}%", escape_like(&search.to_lowercase())))
            .push(" ESCAPE '\\'");
    }
}

/// Escape LIKE wildcards so user input matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Get items with pagination and optional filters
pub async fn list(
    pool: &PgPool,
    filter: &CatalogFilter<'_>,
    limit: i64,
    offset: i64,
) -> Result<Vec<CatalogRow>, sqlx::Error> {
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!("SELECT {} FROM catalog_items", CATALOG_COLUMNS));
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY title, season NULLS FIRST, episode NULLS FIRST, id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    qb.build_query_as().fetch_all(pool).await
}

/// Count items matching the filters
pub async fn count(pool: &PgPool, filter: &CatalogFilter<'_>) -> Result<i64, sqlx::Error> {
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM catalog_items");
    push_filters(&mut qb, filter);

    let (count,): (i64,) = qb.build_query_as().fetch_one(pool).await?;
    Ok(count)
}

/// Get a single item by id
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<CatalogRow>, sqlx::Error> {
    sqlx::query_as::<_, CatalogRow>(&format!("SELECT {} FROM catalog_items WHERE id = $1", CATALOG_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Group names with item counts, optionally for one content type
pub async fn list_groups(pool: &PgPool, content_type: Option<ContentType>) -> Result<Vec<GroupRow>, sqlx::Error> {
    sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT group_name, content_type, COUNT(*) AS item_count
        FROM catalog_items
        WHERE $1::text IS NULL OR content_type = $1
        GROUP BY group_name, content_type
        ORDER BY content_type, group_name
        "#,
    )
    .bind(content_type.map(|t| t.as_str()))
    .fetch_all(pool)
    .await
}

/// Write TMDB metadata onto a catalog row
pub async fn apply_metadata<'e, E>(executor: E, item_id: Uuid, metadata: &ItemMetadata) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE catalog_items SET
            tmdb_id = $2,
            overview = $3,
            poster_url = $4,
            backdrop_url = $5,
            rating = $6,
            release_date = $7,
            enriched_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(item_id)
    .bind(metadata.tmdb_id)
    .bind(&metadata.overview)
    .bind(&metadata.poster_url)
    .bind(&metadata.backdrop_url)
    .bind(metadata.rating)
    .bind(&metadata.release_date)
    .execute(executor)
    .await?;

    Ok(())
}

/// Item counts per content type
pub async fn count_by_type(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as("SELECT content_type, COUNT(*) FROM catalog_items GROUP BY content_type ORDER BY content_type")
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_wildcards() {
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("top_gun"), "top\\_gun");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain title"), "plain title");
    }

    #[test]
    fn test_search_filter_declares_escape() {
        let filter = CatalogFilter {
            search: Some("50%_off"),
            ..Default::default()
        };
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM catalog_items");
        push_filters(&mut qb, &filter);

        assert!(qb.sql().ends_with("AND LOWER(title) LIKE $1 ESCAPE '\\'"), "{}", qb.sql());
    }
}
