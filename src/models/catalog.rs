use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog content classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Series,
    Channel,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Channel
    }
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Series => "series",
            ContentType::Channel => "channel",
        }
    }

    /// Parse stored values plus the loose aliases uploads use ("vod", "live", ...)
    pub fn from_loose(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "movie" | "movies" | "vod" | "film" => Some(ContentType::Movie),
            "series" | "show" | "tv_series" | "serie" => Some(ContentType::Series),
            "channel" | "live" | "tv" | "stream" => Some(ContentType::Channel),
            _ => None,
        }
    }

    /// Whether the enrichment worker should look this type up on TMDB
    pub fn is_enrichable(&self) -> bool {
        matches!(self, ContentType::Movie | ContentType::Series)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream quality tier detected from the entry name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "HD")]
    Hd,
    #[serde(rename = "FHD")]
    Fhd,
    #[serde(rename = "4K")]
    Uhd4k,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Sd => "SD",
            Quality::Hd => "HD",
            Quality::Fhd => "FHD",
            Quality::Uhd4k => "4K",
        }
    }

    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "SD" => Some(Quality::Sd),
            "HD" => Some(Quality::Hd),
            "FHD" => Some(Quality::Fhd),
            "4K" => Some(Quality::Uhd4k),
            _ => None,
        }
    }
}

/// Where a catalog entry was ingested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    M3u,
    Json,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::M3u => "m3u",
            EntrySource::Json => "json",
        }
    }
}

/// Raw entry as read from a playlist, before classification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistEntry {
    pub name: String,
    pub url: String,
    pub logo: Option<String>,
    pub group: String,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub duration: i32,
    /// Explicit type supplied by the upload (JSON imports only)
    pub type_hint: Option<ContentType>,
}

/// Title metadata extracted from an entry name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTitle {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
}

/// Classified entry ready for the catalog upsert
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub title: String,
    pub stream_url: String,
    pub logo: Option<String>,
    pub group: String,
    pub epg_id: Option<String>,
    pub content_type: ContentType,
    pub quality: Option<Quality>,
    pub year: Option<u16>,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub series_name: Option<String>,
    pub source: EntrySource,
}

/// Catalog item as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg_id: Option<String>,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ItemMetadata>,
    pub updated_at: DateTime<Utc>,
}

/// TMDB metadata attached by the enrichment worker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub tmdb_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backdrop_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

/// Group summary for catalog browsing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGroup {
    pub name: String,
    pub content_type: ContentType,
    pub item_count: i64,
}

/// Query parameters for the catalog listing
#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Paginated catalog response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_aliases() {
        assert_eq!(ContentType::from_loose("VOD"), Some(ContentType::Movie));
        assert_eq!(ContentType::from_loose(" live "), Some(ContentType::Channel));
        assert_eq!(ContentType::from_loose("tv_series"), Some(ContentType::Series));
        assert_eq!(ContentType::from_loose("podcast"), None);
    }

    #[test]
    fn test_quality_serializes_as_label() {
        let json = serde_json::to_string(&Quality::Uhd4k).unwrap();
        assert_eq!(json, "\"4K\"");
        assert_eq!(Quality::from_stored("FHD"), Some(Quality::Fhd));
        assert!(Quality::Uhd4k > Quality::Hd);
    }
}
