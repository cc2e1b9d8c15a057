//! Database row types for PostgreSQL
//!
//! These types map directly to database rows and convert into the API
//! response types in `models/`.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{
    CatalogGroup, CatalogItem, ContentType, ItemMetadata, Notification, ProgramView, Quality,
};

// ============================================================================
// Catalog
// ============================================================================

/// Catalog row from database
#[derive(Debug, Clone, FromRow)]
pub struct CatalogRow {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub stream_url: String,
    pub logo: Option<String>,
    pub group_name: String,
    pub epg_id: Option<String>,
    pub content_type: String,
    pub quality: Option<String>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub series_name: Option<String>,
    pub tmdb_id: Option<i64>,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub rating: Option<f32>,
    pub release_date: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching `CatalogRow`
pub const CATALOG_COLUMNS: &str = "id, name, title, stream_url, logo, group_name, epg_id, content_type, \
    quality, year, season, episode, series_name, tmdb_id, overview, poster_url, backdrop_url, \
    rating, release_date, updated_at";

fn to_u16(value: Option<i32>) -> Option<u16> {
    value.and_then(|v| u16::try_from(v).ok())
}

impl From<CatalogRow> for CatalogItem {
    fn from(row: CatalogRow) -> Self {
        let metadata = row.tmdb_id.map(|tmdb_id| ItemMetadata {
            tmdb_id,
            overview: row.overview,
            poster_url: row.poster_url,
            backdrop_url: row.backdrop_url,
            rating: row.rating,
            release_date: row.release_date,
        });

        CatalogItem {
            id: row.id,
            name: row.name,
            title: row.title,
            stream_url: row.stream_url,
            logo: row.logo,
            group: row.group_name,
            epg_id: row.epg_id,
            content_type: ContentType::from_loose(&row.content_type).unwrap_or_default(),
            quality: row.quality.as_deref().and_then(Quality::from_stored),
            year: to_u16(row.year),
            season: to_u16(row.season),
            episode: to_u16(row.episode),
            series_name: row.series_name,
            metadata,
            updated_at: row.updated_at,
        }
    }
}

/// Row returned by the chunk upsert
#[derive(Debug, Clone, FromRow)]
pub struct UpsertedRow {
    pub id: Uuid,
    pub content_type: String,
    pub tmdb_id: Option<i64>,
}

impl UpsertedRow {
    /// Movies and series without TMDB data go to the enrichment queue
    pub fn needs_enrichment(&self) -> bool {
        self.tmdb_id.is_none()
            && ContentType::from_loose(&self.content_type).is_some_and(|t| t.is_enrichable())
    }
}

/// Group summary row
#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub group_name: String,
    pub content_type: String,
    pub item_count: i64,
}

impl From<GroupRow> for CatalogGroup {
    fn from(row: GroupRow) -> Self {
        CatalogGroup {
            name: row.group_name,
            content_type: ContentType::from_loose(&row.content_type).unwrap_or_default(),
            item_count: row.item_count,
        }
    }
}

// ============================================================================
// Enrichment queue
// ============================================================================

/// Queue row claimed by the enrichment worker, joined with its catalog item
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedRow {
    pub item_id: Uuid,
    pub attempts: i32,
    pub content_type: String,
    pub title: String,
    pub year: Option<i32>,
    pub series_name: Option<String>,
}

/// Queue size per status
#[derive(Debug, Clone, FromRow)]
pub struct StatusCountRow {
    pub status: String,
    pub count: i64,
}

// ============================================================================
// EPG
// ============================================================================

/// Programme row joined with its channel name
#[derive(Debug, Clone, FromRow)]
pub struct ProgramRow {
    pub id: Uuid,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub episode_num: Option<String>,
    pub icon: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl From<ProgramRow> for ProgramView {
    fn from(row: ProgramRow) -> Self {
        ProgramView {
            id: row.id,
            channel_id: row.channel_id,
            channel_name: row.channel_name,
            title: row.title,
            description: row.description,
            category: row.category,
            episode_num: row.episode_num,
            icon: row.icon,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Notification row from database
#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub program_id: Option<Uuid>,
    pub channel_id: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            title: row.title,
            body: row.body,
            program_id: row.program_id,
            channel_id: row.channel_id,
            starts_at: row.starts_at,
            read: row.read_at.is_some(),
            created_at: row.created_at,
        }
    }
}

/// User with a favorite team set
#[derive(Debug, Clone, FromRow)]
pub struct UserProfileRow {
    pub user_id: String,
    pub favorite_team: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_row() -> CatalogRow {
        CatalogRow {
            id: Uuid::new_v4(),
            name: "Heat (1995) FHD".to_string(),
            title: "Heat".to_string(),
            stream_url: "http://h/movie/1.mkv".to_string(),
            logo: None,
            group_name: "Movies".to_string(),
            epg_id: None,
            content_type: "movie".to_string(),
            quality: Some("FHD".to_string()),
            year: Some(1995),
            season: None,
            episode: None,
            series_name: None,
            tmdb_id: None,
            overview: None,
            poster_url: None,
            backdrop_url: None,
            rating: None,
            release_date: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_catalog_row_conversion() {
        let item = CatalogItem::from(catalog_row());
        assert_eq!(item.content_type, ContentType::Movie);
        assert_eq!(item.quality, Some(Quality::Fhd));
        assert_eq!(item.year, Some(1995));
        assert!(item.metadata.is_none());

        let mut enriched = catalog_row();
        enriched.tmdb_id = Some(949);
        enriched.overview = Some("Heist".to_string());
        let item = CatalogItem::from(enriched);
        let metadata = item.metadata.unwrap();
        assert_eq!(metadata.tmdb_id, 949);
        assert_eq!(metadata.overview.as_deref(), Some("Heist"));
    }

    #[test]
    fn test_needs_enrichment() {
        let row = |content_type: &str, tmdb_id: Option<i64>| UpsertedRow {
            id: Uuid::new_v4(),
            content_type: content_type.to_string(),
            tmdb_id,
        };

        assert!(row("movie", None).needs_enrichment());
        assert!(row("series", None).needs_enrichment());
        assert!(!row("movie", Some(1)).needs_enrichment());
        assert!(!row("channel", None).needs_enrichment());
    }
}
