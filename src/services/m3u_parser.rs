use anyhow::{anyhow, bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Response};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

use crate::models::PlaylistEntry;
use crate::services::error::IngestError;
use crate::services::retry::RetryPolicy;

// Defensive limits for streamed parsing
const MAX_LINE_BYTES: usize = 32 * 1024; // protect against maliciously long lines
const READ_LINE_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_GROUP: &str = "Uncategorized";

lazy_static! {
    /// Regex to normalize multiple whitespaces into single space
    static ref MULTI_SPACE_REGEX: Regex = Regex::new(r"\s{2,}").unwrap();
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"([\w-]+)="([^"]*)""#).unwrap();
    /// Regex to extract duration from EXTINF line
    static ref DURATION_REGEX: Regex = Regex::new(r"^\s*-?\d+").unwrap();
}

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    duration: i32,
    attributes: HashMap<String, String>,
    title: String,
}

/// Result of parsing a whole playlist
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub entries: Vec<PlaylistEntry>,
    pub duplicates: usize,
    pub skipped: usize,
    /// EPG source advertised by the header (`url-tvg` / `x-tvg-url`)
    pub epg_url: Option<String>,
}

/// Find the comma separating the EXTINF header from the title,
/// ignoring commas inside quoted attribute values
fn split_header_title(content: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (idx, ch) in content.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some((&content[..idx], &content[idx + 1..])),
            _ => {}
        }
    }
    None
}

fn parse_attributes(header: &str) -> HashMap<String, String> {
    ATTR_REGEX
        .captures_iter(header)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_lowercase();
            let value = caps.get(2)?.as_str().trim().to_string();
            Some((key, value))
        })
        .collect()
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." tvg-logo="..." group-title="...",Title
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let content = line.strip_prefix("#EXTINF:")?;
    let (header, title) = split_header_title(content)?;

    let duration = DURATION_REGEX
        .find(header)
        .and_then(|m| m.as_str().trim().parse().ok())
        .unwrap_or(-1);

    Some(ExtinfData {
        duration,
        attributes: parse_attributes(header),
        title: title.trim().to_string(),
    })
}

/// Normalize text: trim and collapse multiple spaces into single space
fn normalize_text(text: &str) -> String {
    MULTI_SPACE_REGEX.replace_all(text.trim(), " ").to_string()
}

/// Hash used for URL deduplication (cheaper to keep than the full URL)
fn url_dedup_hash(url: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    url.hash(&mut hasher);
    hasher.finish()
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Incremental, line-fed M3U parser
///
/// Used both for uploaded text and for playlists streamed from a remote URL.
#[derive(Debug, Default)]
pub struct M3uParser {
    line_no: usize,
    found_header: bool,
    current_extinf: Option<ExtinfData>,
    current_group: Option<String>,
    seen_urls: HashSet<u64>,
    outcome: ParseOutcome,
}

impl M3uParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line (with or without trailing newline)
    pub fn push_line(&mut self, raw: &str) -> Result<(), IngestError> {
        self.line_no += 1;

        if raw.len() > MAX_LINE_BYTES {
            return Err(IngestError::LineTooLong {
                line: self.line_no,
                max: MAX_LINE_BYTES,
            });
        }

        let line = raw.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            return Ok(());
        }

        if !self.found_header {
            if !line.starts_with("#EXTM3U") {
                return Err(IngestError::MissingHeader);
            }
            self.found_header = true;
            let attributes = parse_attributes(line);
            self.outcome.epg_url = non_empty(attributes.get("url-tvg"))
                .or_else(|| non_empty(attributes.get("x-tvg-url")));
            return Ok(());
        }

        if line.starts_with("#EXTINF:") {
            if self.current_extinf.is_some() {
                // EXTINF without a URL line
                self.outcome.skipped += 1;
            }
            self.current_extinf = parse_extinf(line);
            if self.current_extinf.is_none() {
                self.outcome.skipped += 1;
            }
            return Ok(());
        }

        if let Some(group) = line.strip_prefix("#EXTGRP:") {
            let group = normalize_text(group);
            self.current_group = (!group.is_empty()).then_some(group);
            return Ok(());
        }

        // Other directives (#EXTVLCOPT, #KODIPROP, comments)
        if line.starts_with('#') {
            return Ok(());
        }

        if !line.contains("://") {
            self.outcome.skipped += 1;
            return Ok(());
        }

        let Some(extinf) = self.current_extinf.take() else {
            // URL without metadata
            self.outcome.skipped += 1;
            return Ok(());
        };
        let fallback_group = self.current_group.take();

        if !self.seen_urls.insert(url_dedup_hash(line)) {
            self.outcome.duplicates += 1;
            return Ok(());
        }

        let tvg_name = non_empty(extinf.attributes.get("tvg-name"));
        let mut name = normalize_text(&extinf.title);
        if name.is_empty() {
            name = tvg_name.clone().unwrap_or_default();
        }
        if name.is_empty() {
            self.outcome.skipped += 1;
            return Ok(());
        }

        let group = non_empty(extinf.attributes.get("group-title"))
            .map(|g| normalize_text(&g))
            .or(fallback_group)
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());

        self.outcome.entries.push(PlaylistEntry {
            name,
            url: line.to_string(),
            logo: non_empty(extinf.attributes.get("tvg-logo")),
            group,
            tvg_id: non_empty(extinf.attributes.get("tvg-id")),
            tvg_name,
            duration: extinf.duration,
            type_hint: None,
        });

        Ok(())
    }

    pub fn entries_parsed(&self) -> usize {
        self.outcome.entries.len()
    }

    pub fn finish(mut self) -> Result<ParseOutcome, IngestError> {
        if !self.found_header {
            return Err(IngestError::MissingHeader);
        }
        if self.current_extinf.is_some() {
            self.outcome.skipped += 1;
        }
        Ok(self.outcome)
    }
}

/// Parse a complete M3U document held in memory
pub fn parse_m3u(text: &str) -> Result<ParseOutcome, IngestError> {
    let mut parser = M3uParser::new();
    for line in text.lines() {
        parser.push_line(line)?;
    }
    parser.finish()
}

/// Downloads playlists and EPG documents with retry and size limits
pub struct PlaylistFetcher {
    client: Client,
    retry: RetryPolicy,
    max_bytes: u64,
}

impl PlaylistFetcher {
    pub fn new(user_agent: &str, timeout_ms: u64, retry: RetryPolicy, max_bytes: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_millis(timeout_ms))
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            retry,
            max_bytes,
        })
    }

    fn check_size(&self, len: u64) -> Result<()> {
        if len > self.max_bytes {
            return Err(IngestError::TooLarge {
                size_mb: len as f64 / 1024.0 / 1024.0,
                limit_mb: (self.max_bytes / 1024 / 1024) as usize,
            }
            .into());
        }
        Ok(())
    }

    /// GET with retry on network errors and HTTP 429; other statuses fail fast
    async fn fetch_with_retry(&self, url: &str) -> Result<Response> {
        let mut attempt = 0u32;

        loop {
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if let Some(len) = resp.content_length() {
                        self.check_size(len)?;
                    }
                    return Ok(resp);
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < self.retry.max_retries {
                        let backoff = self.retry.delay_for(attempt);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "429", "backoff_ms" = backoff.as_millis() as u64);
                        sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }

                    let friendly = match status {
                        reqwest::StatusCode::NOT_FOUND => "Source not found (404). Check the URL.".to_string(),
                        reqwest::StatusCode::FORBIDDEN => "Access denied (403). The source may require authentication.".to_string(),
                        reqwest::StatusCode::TOO_MANY_REQUESTS => "Too many requests (429). The source is rate limiting.".to_string(),
                        _ => format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Error")
                        ),
                    };
                    bail!("{}", friendly);
                }
                Err(err) if attempt < self.retry.max_retries => {
                    let backoff = self.retry.delay_for(attempt);
                    tracing::warn!("fetch_retry" = attempt + 1, "reason" = "network", "backoff_ms" = backoff.as_millis() as u64, "error" = %err);
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(anyhow!(err).context(format!("Failed to fetch {}", url))),
            }
        }
    }

    /// Stream a remote playlist line by line into the parser
    pub async fn fetch_m3u(&self, url: &str) -> Result<ParseOutcome> {
        let response = self.fetch_with_retry(url).await?;
        if let Some(len) = response.content_length() {
            tracing::info!("Playlist size: {:.2} MB", len as f64 / 1024.0 / 1024.0);
        }

        let bytes_stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let mut reader = BufReader::new(StreamReader::new(bytes_stream));

        let mut parser = M3uParser::new();
        let mut buf: Vec<u8> = Vec::new();
        let mut bytes_total = 0u64;

        loop {
            buf.clear();

            let bytes_read = match tokio::time::timeout(READ_LINE_TIMEOUT, reader.read_until(b'\n', &mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(IngestError::Io(e).into()),
                Err(_) => return Err(IngestError::ReadTimeout.into()),
            };

            if bytes_read == 0 {
                break;
            }

            // Servers that omit Content-Length are bounded here
            bytes_total += bytes_read as u64;
            self.check_size(bytes_total)?;

            if buf.len() > MAX_LINE_BYTES {
                return Err(IngestError::LineTooLong {
                    line: parser.line_no + 1,
                    max: MAX_LINE_BYTES,
                }
                .into());
            }

            // Invalid UTF-8 (Latin-1 titles) is replaced, not rejected
            let line = String::from_utf8_lossy(&buf);

            let before = parser.entries_parsed();
            parser.push_line(&line)?;

            let after = parser.entries_parsed();
            if after != before && after % 10_000 == 0 {
                tracing::info!("Parsed {} entries from {}...", after, url);
            }
        }

        Ok(parser.finish()?)
    }

    /// Download a whole text document (XMLTV, JSON) into memory
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.fetch_with_retry(url).await?;
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed while downloading document")?;
            body.extend_from_slice(&chunk);
            self.check_size(body.len() as u64)?;
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_extinf() {
        let line = r#"#EXTINF:-1 tvg-id="bbc1" tvg-name="BBC One" tvg-logo="http://logo.com/bbc.png" group-title="UK",BBC One HD"#;
        let extinf = parse_extinf(line).unwrap();

        assert_eq!(extinf.title, "BBC One HD");
        assert_eq!(extinf.duration, -1);
        assert_eq!(extinf.attributes.get("tvg-id"), Some(&"bbc1".to_string()));
        assert_eq!(extinf.attributes.get("group-title"), Some(&"UK".to_string()));
    }

    #[test]
    fn test_parse_extinf_minimal() {
        let extinf = parse_extinf("#EXTINF:0,Test Channel").unwrap();
        assert_eq!(extinf.title, "Test Channel");
        assert_eq!(extinf.duration, 0);
        assert!(extinf.attributes.is_empty());
    }

    #[test]
    fn test_parse_extinf_comma_inside_attribute() {
        let line = r#"#EXTINF:-1 group-title="Movies, Action",Heat (1995)"#;
        let extinf = parse_extinf(line).unwrap();
        assert_eq!(extinf.title, "Heat (1995)");
        assert_eq!(extinf.attributes.get("group-title"), Some(&"Movies, Action".to_string()));
    }

    #[test]
    fn test_parse_playlist() {
        let text = "\u{feff}#EXTM3U url-tvg=\"http://epg.example.com/guide.xml\"\n\
            #EXTINF:-1 tvg-id=\"cnn.us\" tvg-logo=\"http://logo/cnn.png\" group-title=\"News\",CNN   HD\n\
            #EXTVLCOPT:http-user-agent=Foo\n\
            http://host/live/u/p/1.ts\n\
            \n\
            #EXTINF:-1,Heat (1995) 1080p\n\
            #EXTGRP:Movies\n\
            http://host/movie/u/p/2.mkv\n\
            #EXTINF:-1 group-title=\"News\",CNN copy\n\
            http://host/live/u/p/1.ts\n\
            http://orphan/stream.ts\n";

        let outcome = parse_m3u(text).unwrap();
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.epg_url.as_deref(), Some("http://epg.example.com/guide.xml"));

        let cnn = &outcome.entries[0];
        assert_eq!(cnn.name, "CNN HD");
        assert_eq!(cnn.group, "News");
        assert_eq!(cnn.tvg_id.as_deref(), Some("cnn.us"));
        assert_eq!(cnn.logo.as_deref(), Some("http://logo/cnn.png"));

        let heat = &outcome.entries[1];
        assert_eq!(heat.group, "Movies");
        assert_eq!(heat.url, "http://host/movie/u/p/2.mkv");
    }

    #[test]
    fn test_missing_header_is_rejected() {
        let err = parse_m3u("#EXTINF:-1,Foo\nhttp://x/1.ts\n").unwrap_err();
        assert!(matches!(err, IngestError::MissingHeader));

        let err = parse_m3u("   \n\n").unwrap_err();
        assert!(matches!(err, IngestError::MissingHeader));
    }

    #[test]
    fn test_overlong_line_is_rejected() {
        let text = format!("#EXTM3U\n#EXTINF:-1,{}\n", "x".repeat(MAX_LINE_BYTES + 1));
        let err = parse_m3u(&text).unwrap_err();
        assert!(matches!(err, IngestError::LineTooLong { line: 2, .. }));
    }

    #[test]
    fn test_default_group_and_tvg_name_fallback() {
        let text = "#EXTM3U\n#EXTINF:-1 tvg-name=\"Fallback Name\",\nrtmp://host/app/stream\n";
        let outcome = parse_m3u(text).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].name, "Fallback Name");
        assert_eq!(outcome.entries[0].group, DEFAULT_GROUP);
    }

    #[test]
    fn test_dangling_extinf_counts_as_skipped() {
        let outcome = parse_m3u("#EXTM3U\n#EXTINF:-1,One\n#EXTINF:-1,Two\nhttp://h/2.ts\n#EXTINF:-1,Three\n").unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].name, "Two");
        assert_eq!(outcome.skipped, 2);
    }

    fn fetcher(max_bytes: u64) -> PlaylistFetcher {
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        PlaylistFetcher::new("test-agent", 5_000, retry, max_bytes).unwrap()
    }

    fn playlist_lines(count: usize) -> String {
        let mut text = String::from("#EXTM3U\n");
        for i in 0..count {
            text.push_str(&format!("#EXTINF:-1 group-title=\"News\",Channel {}\nhttp://h/{}.ts\n", i, i));
        }
        text
    }

    async fn spawn_fake_source() -> (String, Arc<AtomicUsize>) {
        use axum::{body::Body, http::StatusCode, routing::get, Router};

        let hits = Arc::new(AtomicUsize::new(0));
        let flaky_hits = Arc::clone(&hits);

        let app = Router::new()
            .route(
                "/latin1.m3u",
                get(|| async {
                    let mut body = b"#EXTM3U\n#EXTINF:-1,Plain TV\nhttp://h/1.ts\n#EXTINF:-1,Caf".to_vec();
                    body.push(0xE9);
                    body.extend_from_slice(b" TV\nhttp://h/2.ts\n");
                    body
                }),
            )
            .route(
                "/flaky.m3u",
                get(move || {
                    let hits = Arc::clone(&flaky_hits);
                    async move {
                        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                            (StatusCode::TOO_MANY_REQUESTS, String::from("slow down"))
                        } else {
                            (StatusCode::OK, playlist_lines(2))
                        }
                    }
                }),
            )
            .route(
                "/chunked.m3u",
                get(|| async {
                    let chunks: Vec<Result<String, std::io::Error>> = (0..8).map(|_| Ok(playlist_lines(10))).collect();
                    Body::from_stream(tokio_stream::iter(chunks))
                }),
            )
            .route("/sized.m3u", get(|| async { playlist_lines(200) }))
            .route("/gone.m3u", get(|| async { StatusCode::NOT_FOUND }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_fetch_tolerates_invalid_utf8() {
        let (base, _) = spawn_fake_source().await;
        let outcome = fetcher(1024 * 1024).fetch_m3u(&format!("{}/latin1.m3u", base)).await.unwrap();

        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.entries[0].name, "Plain TV");
        assert_eq!(outcome.entries[1].name, "Caf\u{FFFD} TV");
    }

    #[tokio::test]
    async fn test_fetch_retries_after_429() {
        let (base, hits) = spawn_fake_source().await;
        let outcome = fetcher(1024 * 1024).fetch_m3u(&format!("{}/flaky.m3u", base)).await.unwrap();

        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_enforces_size_limit() {
        let (base, _) = spawn_fake_source().await;
        let small = fetcher(2 * 1024);

        // no Content-Length: caught while streaming
        let err = small.fetch_m3u(&format!("{}/chunked.m3u", base)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<IngestError>(), Some(IngestError::TooLarge { .. })), "{:#}", err);

        // Content-Length: rejected before reading the body
        let err = small.fetch_m3u(&format!("{}/sized.m3u", base)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<IngestError>(), Some(IngestError::TooLarge { .. })), "{:#}", err);

        let err = small.fetch_text(&format!("{}/sized.m3u", base)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<IngestError>(), Some(IngestError::TooLarge { .. })), "{:#}", err);
    }

    #[tokio::test]
    async fn test_fetch_reports_friendly_http_errors() {
        let (base, _) = spawn_fake_source().await;
        let err = fetcher(1024 * 1024).fetch_m3u(&format!("{}/gone.m3u", base)).await.unwrap_err();
        assert!(err.to_string().contains("Source not found (404)"), "{}", err);
    }
}
