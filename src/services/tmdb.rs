//! TMDB search client
//!
//! Only the two search endpoints are used. The enrichment worker decides
//! what to do with each error variant, so this client never retries.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::ItemMetadata;

/// Fallback when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TmdbError {
    #[error("TMDB rate limit reached, retry after {0:?}")]
    RateLimited(Duration),

    #[error("TMDB rejected the API credential")]
    Unauthorized,

    #[error("TMDB returned HTTP {0}")]
    Http(u16),

    #[error("TMDB request failed: {0}")]
    Network(String),

    #[error("Invalid TMDB response: {0}")]
    Parse(String),
}

/// Which search endpoint to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    Movie,
    Tv,
}

impl SearchKind {
    fn path(&self) -> &'static str {
        match self {
            SearchKind::Movie => "/search/movie",
            SearchKind::Tv => "/search/tv",
        }
    }

    fn year_param(&self) -> &'static str {
        match self {
            SearchKind::Movie => "year",
            SearchKind::Tv => "first_air_date_year",
        }
    }
}

/// Source of catalog metadata
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Best match for `query`, or `None` when the search has no results
    async fn search(&self, kind: SearchKind, query: &str, year: Option<u16>) -> Result<Option<ItemMetadata>, TmdbError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TmdbItem>,
}

/// Search result; movie and tv payloads differ only in field names
#[derive(Debug, Clone, Deserialize)]
struct TmdbItem {
    id: i64,
    #[serde(alias = "name")]
    title: Option<String>,
    #[serde(alias = "original_name")]
    original_title: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    #[serde(alias = "first_air_date")]
    release_date: Option<String>,
    vote_average: Option<f64>,
}

impl TmdbItem {
    fn year(&self) -> Option<u16> {
        self.release_date.as_deref()?.get(..4)?.parse().ok()
    }

    fn title_matches(&self, wanted: &str) -> bool {
        [&self.title, &self.original_title]
            .iter()
            .filter_map(|t| t.as_deref())
            .any(|t| t.trim().to_lowercase() == wanted)
    }
}

/// Exact title + year, then exact title, then the first result
fn pick_best_match<'a>(results: &'a [TmdbItem], query: &str, year: Option<u16>) -> Option<&'a TmdbItem> {
    let wanted = query.trim().to_lowercase();

    year.and_then(|y| {
        results
            .iter()
            .find(|item| item.title_matches(&wanted) && item.year() == Some(y))
    })
    .or_else(|| results.iter().find(|item| item.title_matches(&wanted)))
    .or_else(|| results.first())
}

/// TMDB v4 read tokens are JWTs; v3 keys go in the query string
fn is_access_token(credential: &str) -> bool {
    credential.starts_with("eyJ")
}

fn parse_retry_after(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// reqwest-backed TMDB client
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
    image_base_url: String,
    language: String,
}

impl TmdbClient {
    pub fn new(api_key: &str, base_url: &str, image_base_url: &str, language: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            image_base_url: image_base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        })
    }

    fn image_url(&self, size: &str, path: Option<String>) -> Option<String> {
        non_empty(path).map(|p| format!("{}/{}{}", self.image_base_url, size, p))
    }

    fn to_metadata(&self, item: &TmdbItem) -> ItemMetadata {
        ItemMetadata {
            tmdb_id: item.id,
            overview: non_empty(item.overview.clone()),
            poster_url: self.image_url("w500", item.poster_path.clone()),
            backdrop_url: self.image_url("w1280", item.backdrop_path.clone()),
            rating: item.vote_average.map(|v| v as f32),
            release_date: non_empty(item.release_date.clone()),
        }
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    async fn search(&self, kind: SearchKind, query: &str, year: Option<u16>) -> Result<Option<ItemMetadata>, TmdbError> {
        let mut request = self
            .client
            .get(format!("{}{}", self.base_url, kind.path()))
            .query(&[("query", query), ("language", self.language.as_str()), ("include_adult", "false")]);

        if let Some(year) = year {
            request = request.query(&[(kind.year_param(), year.to_string())]);
        }

        request = if is_access_token(&self.api_key) {
            request.bearer_auth(&self.api_key)
        } else {
            request.query(&[("api_key", self.api_key.as_str())])
        };

        let response = request.send().await.map_err(|e| TmdbError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok());
                return Err(TmdbError::RateLimited(parse_retry_after(retry_after)));
            }
            StatusCode::UNAUTHORIZED => return Err(TmdbError::Unauthorized),
            status if !status.is_success() => return Err(TmdbError::Http(status.as_u16())),
            _ => {}
        }

        let body: SearchResponse = response.json().await.map_err(|e| TmdbError::Parse(e.to_string()))?;

        Ok(pick_best_match(&body.results, query, year).map(|item| self.to_metadata(item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::HeaderMap, routing::get, Json, Router};
    use std::collections::HashMap;

    fn item(id: i64, title: &str, date: &str) -> TmdbItem {
        TmdbItem {
            id,
            title: Some(title.to_string()),
            original_title: None,
            overview: None,
            poster_path: None,
            backdrop_path: None,
            release_date: Some(date.to_string()),
            vote_average: None,
        }
    }

    #[test]
    fn test_best_match_prefers_title_and_year() {
        let results = vec![
            item(1, "Dune: Part One", "2021-09-15"),
            item(2, "Dune", "1984-12-14"),
            item(3, "Dune", "2021-09-15"),
        ];

        assert_eq!(pick_best_match(&results, "Dune", Some(2021)).map(|i| i.id), Some(3));
        assert_eq!(pick_best_match(&results, "dune", None).map(|i| i.id), Some(2));
        assert_eq!(pick_best_match(&results, "Dune", Some(1999)).map(|i| i.id), Some(2));
        assert_eq!(pick_best_match(&results, "Arrakis", None).map(|i| i.id), Some(1));
        assert!(pick_best_match(&[], "Dune", None).is_none());
    }

    #[test]
    fn test_original_title_counts_as_exact() {
        let mut amelie = item(194, "Amélie", "2001-04-25");
        amelie.original_title = Some("Le Fabuleux Destin d'Amélie Poulain".to_string());
        let results = vec![item(1, "Amelia", "2009-10-23"), amelie];

        let best = pick_best_match(&results, "Le fabuleux destin d'Amélie Poulain", Some(2001));
        assert_eq!(best.map(|i| i.id), Some(194));
    }

    #[test]
    fn test_credential_and_retry_after_parsing() {
        assert!(is_access_token("eyJhbGciOiJIUzI1NiJ9.payload.sig"));
        assert!(!is_access_token("0123456789abcdef"));

        assert_eq!(parse_retry_after(Some("7")), Duration::from_secs(7));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
    }

    async fn spawn_fake_tmdb() -> String {
        async fn search_tv(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
            assert_eq!(params.get("first_air_date_year").map(String::as_str), Some("2008"));
            assert_eq!(params.get("api_key").map(String::as_str), Some("plain-key"));
            Json(serde_json::json!({
                "results": [
                    {"id": 99, "name": "Breaking", "first_air_date": "2001-01-01"},
                    {"id": 1396, "name": "Breaking Bad", "original_name": "Breaking Bad",
                     "first_air_date": "2008-01-20", "poster_path": "/bb.jpg", "vote_average": 8.9,
                     "overview": "A chemistry teacher..."}
                ]
            }))
        }

        async fn search_movie() -> (axum::http::StatusCode, HeaderMap, &'static str) {
            let mut headers = HeaderMap::new();
            headers.insert("retry-after", "3".parse().unwrap());
            (axum::http::StatusCode::TOO_MANY_REQUESTS, headers, "slow down")
        }

        let app = Router::new()
            .route("/3/search/tv", get(search_tv))
            .route("/3/search/movie", get(search_movie));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}/3", addr)
    }

    #[tokio::test]
    async fn test_search_against_fake_server() {
        let base_url = spawn_fake_tmdb().await;
        let client = TmdbClient::new("plain-key", &base_url, "https://img.example/t/p/", "en-US").unwrap();

        let found = client
            .search(SearchKind::Tv, "Breaking Bad", Some(2008))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tmdb_id, 1396);
        assert_eq!(found.poster_url.as_deref(), Some("https://img.example/t/p/w500/bb.jpg"));
        assert_eq!(found.backdrop_url, None);
        assert_eq!(found.release_date.as_deref(), Some("2008-01-20"));
        assert!((found.rating.unwrap() - 8.9).abs() < 0.001);

        let err = client.search(SearchKind::Movie, "Heat", None).await.unwrap_err();
        assert_eq!(err, TmdbError::RateLimited(Duration::from_secs(3)));
    }
}
