use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::models::{CatalogEntry, ContentType, EntrySource, ParsedTitle, PlaylistEntry, Quality};

/// Series name, season and episode pulled out of an episode title
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMarker {
    pub series_name: String,
    pub season: u16,
    pub episode: u16,
}

const SERIES_CACHE_SIZE: usize = 10_000;

lazy_static! {
    static ref SERIES_CACHE: Mutex<LruCache<String, Option<SeriesMarker>>> = Mutex::new(
        LruCache::new(NonZeroUsize::new(SERIES_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN))
    );

    // ============ URL CONVENTIONS ============
    static ref URL_MOVIE_PATH: Regex = Regex::new(r"(?i)/(movie|movies|vod)/").unwrap();
    static ref URL_SERIES_PATH: Regex = Regex::new(r"(?i)/series/").unwrap();
    static ref URL_FILE_EXT: Regex = Regex::new(r"(?i)\.(mp4|mkv|avi|m4v|mov)(\?|$)").unwrap();

    // ============ LIVE MARKERS ============
    static ref ROUND_THE_CLOCK: Regex = Regex::new(r"(?i)24/7|\b24h(rs)?\b").unwrap();
    static ref GROUP_LIVE_WORD: Regex = Regex::new(r"(?i)\b(live|ao vivo|en vivo|en directo)\b").unwrap();
    // Names only count tagged markers: "[LIVE] ...", "(Ao Vivo)", "LIVE: ...", "EN VIVO | ..."
    static ref NAME_LIVE_MARKER: Regex = Regex::new(
        r"(?i)[\[(]\s*(live|ao vivo|en vivo|en directo)\s*[\])]|^\s*(live|ao vivo|en vivo|en directo)\s*[:|\-]"
    )
    .unwrap();
    static ref EVENT_TIME_PREFIX: Regex = Regex::new(r"^\d{1,2}:\d{2}\s+").unwrap();

    // ============ GROUP PATTERNS ============
    static ref GROUP_SPORTS: Regex = Regex::new(
        r"(?i)\b(sports?|football|futbol|fútbol|futebol|soccer|serie a|premier league|la liga|nba|nfl|nhl|ufc|ppv)\b"
    ).unwrap();
    static ref GROUP_SERIES: Regex = Regex::new(
        r"(?i)\b(series?|séries?|shows?|novelas?|animes?|doramas?|k-?dramas?|temporadas?|seasons?|sitcoms?)\b"
    ).unwrap();
    static ref GROUP_MOVIE: Regex = Regex::new(
        r"(?i)\b(movies?|films?|filmes?|pel[ií]culas?|cinema|vod|box ?office|lan[cç]amentos?|estrenos?)\b"
    ).unwrap();
    static ref GROUP_CHANNEL: Regex = Regex::new(
        r"(?i)\b(channels?|canais|canales|tv|news|noticias|not[ií]cias|kids|music|radio|entertainment|documentar(y|ies)|religious)\b"
    ).unwrap();
    static ref GROUP_COUNTRY_PREFIX: Regex = Regex::new(r"^[A-Z]{2,3}\s*[|:]").unwrap();

    // ============ TITLE PATTERNS ============
    static ref TITLE_SERIES_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bs\d{1,2}\s*[._-]?\s*e\d{1,3}\b").unwrap(),
        Regex::new(r"\b\d{1,2}x\d{1,3}\b").unwrap(),
        Regex::new(r"(?i)\bT\d{1,2}\s*E\d{1,3}\b").unwrap(),
        Regex::new(r"(?i)\b(season|temporada|saison)\s*\d+").unwrap(),
        Regex::new(r"(?i)\b(episode|episodio|episódio|cap[ií]tulo)\s*\d+").unwrap(),
    ];

    static ref TITLE_MOVIE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"[\(\[](19|20)\d{2}[\)\]]").unwrap(),
        Regex::new(r"(?i)\b(2160p|1080p|720p|480p|blu-?ray|web-?dl|webrip|hdrip|dvdrip|bdrip|hdcam|hdts|cam)\b").unwrap(),
        Regex::new(r"(?i)\b(dubbed|dublado|dual audio|dual|subbed|legendado|multi|vostfr|vose)\b").unwrap(),
    ];

    // ============ QUALITY ============
    static ref QUALITY_4K: Regex = Regex::new(r"(?i)\b(4k|uhd|2160p)\b").unwrap();
    static ref QUALITY_FHD: Regex = Regex::new(r"(?i)\b(fhd|full ?hd|1080[pi])\b").unwrap();
    static ref QUALITY_HD: Regex = Regex::new(r"(?i)\b(hd|720p)\b").unwrap();
    static ref QUALITY_SD: Regex = Regex::new(r"(?i)\b(sd|576p|480p|360p)\b").unwrap();

    // ============ TITLE EXTRACTORS ============
    static ref EXTRACTOR_YEAR: Regex = Regex::new(r"[\(\[]((?:19|20)\d{2})[\)\]]").unwrap();
    static ref EXTRACTOR_YEAR_STANDALONE: Regex = Regex::new(r"\b((?:19|20)\d{2})\b").unwrap();
    static ref EXTRACTOR_SEASON: Regex = Regex::new(r"(?i)\b(?:season|temporada|saison)\s*(\d{1,2})").unwrap();
    static ref EXTRACTOR_EPISODE: Regex = Regex::new(r"(?i)\b(?:episode|episodio|episódio|ep\.?)\s*(\d{1,3})").unwrap();

    // ============ SERIES NAME PATTERNS ============
    static ref SERIES_MAIN_PATTERN: Regex = Regex::new(r"(?i)^(.+?)[\s._-]+S(\d{1,2})\s*[._-]?\s*E(\d{1,3})").unwrap();
    static ref SERIES_ALT_PATTERN: Regex = Regex::new(r"^(.+?)\s+(\d{1,2})x(\d{1,3})\b").unwrap();
    static ref SERIES_PT_PATTERN: Regex = Regex::new(r"(?i)^(.+?)\s+T(\d{1,2})\s*E(\d{1,3})\b").unwrap();

    // ============ CLEANERS ============
    static ref PREFIX_CLEANER: Regex = Regex::new(r"^(\[[^\]]*\]|⭐|★|•|\+|-|=|#)\s*").unwrap();
    static ref COUNTRY_PREFIX_CLEANER: Regex = Regex::new(r"^([A-Z]{2}\s*[|:]|[A-Z]{3}\s*\|)\s*").unwrap();
    static ref NUMBERING_CLEANER: Regex = Regex::new(r"^\d+\.\s+").unwrap();
    static ref BRACKETS: Regex = Regex::new(r"[\[\(][^\]\)]*[\]\)]").unwrap();
    static ref EPISODE_MARKERS: Regex = Regex::new(r"(?i)\bs\d{1,2}\s*[._-]?\s*e\d{1,3}\b|\b\d{1,2}x\d{1,3}\b").unwrap();
    static ref QUALITY_TAGS: Regex = Regex::new(r"(?i)\b(4k|uhd|2160p|fhd|1080[pi]|hd|720p|sd|576p|480p|360p)\b").unwrap();
    static ref FORMAT_TAGS: Regex = Regex::new(
        r"(?i)\b(aac|ac3|dts|x264|x265|hevc|h264|h265|web-?dl|blu-?ray|bdrip|webrip|hdrip|dvdrip|hdcam|hdts)\b"
    ).unwrap();
    static ref AUDIO_TAGS: Regex = Regex::new(
        r"(?i)\b(dub|dubbed|dublado|leg|legendado|subbed|sub|dual audio|dual|multi|vostfr|vose)\b"
    ).unwrap();
    static ref PIPES: Regex = Regex::new(r"[|]").unwrap();
    static ref MULTI_SPACES: Regex = Regex::new(r"\s+").unwrap();
    static ref TRAILING_PUNCT: Regex = Regex::new(r"[\s.\-_:]+$").unwrap();
}

/// Keyword classifier for playlist entries
pub struct ContentClassifier;

impl ContentClassifier {
    /// Classify an entry as movie, series or channel
    ///
    /// Order: explicit hint, URL conventions, round-the-clock/live markers,
    /// group keywords, title patterns. Entries with no signal are channels.
    pub fn classify(entry: &PlaylistEntry) -> ContentType {
        if let Some(hint) = entry.type_hint {
            return hint;
        }

        if let Some(kind) = Self::classify_by_url(&entry.url) {
            return kind;
        }

        let name = entry.name.as_str();
        let group = entry.group.as_str();

        if ROUND_THE_CLOCK.is_match(name) || ROUND_THE_CLOCK.is_match(group) {
            return ContentType::Channel;
        }
        if GROUP_LIVE_WORD.is_match(group) || NAME_LIVE_MARKER.is_match(name) || EVENT_TIME_PREFIX.is_match(name) {
            return ContentType::Channel;
        }

        if let Some(kind) = Self::classify_by_group(group) {
            return kind;
        }

        Self::classify_by_title(name).unwrap_or(ContentType::Channel)
    }

    /// Xtream-style paths and file extensions
    pub fn classify_by_url(url: &str) -> Option<ContentType> {
        if URL_SERIES_PATH.is_match(url) {
            return Some(ContentType::Series);
        }
        if URL_MOVIE_PATH.is_match(url) || URL_FILE_EXT.is_match(url) {
            return Some(ContentType::Movie);
        }
        None
    }

    /// Classify based on group name
    pub fn classify_by_group(group: &str) -> Option<ContentType> {
        if group.trim().is_empty() {
            return None;
        }

        // "Serie A" and friends are football, not TV series
        if GROUP_SPORTS.is_match(group) {
            return Some(ContentType::Channel);
        }
        // Series before movies so "Movies & Shows" style groups land on series
        if GROUP_SERIES.is_match(group) {
            return Some(ContentType::Series);
        }
        // Movies before channels so "Apple TV Movies" is not a channel
        if GROUP_MOVIE.is_match(group) {
            return Some(ContentType::Movie);
        }
        if GROUP_CHANNEL.is_match(group) || GROUP_COUNTRY_PREFIX.is_match(group) {
            return Some(ContentType::Channel);
        }

        None
    }

    /// Classify based on title alone
    pub fn classify_by_title(name: &str) -> Option<ContentType> {
        if name.trim().is_empty() {
            return None;
        }

        if TITLE_SERIES_PATTERNS.iter().any(|p| p.is_match(name)) {
            return Some(ContentType::Series);
        }

        // A bare "(2020)" is not enough; a year plus a rip or audio tag is
        let movie_score = TITLE_MOVIE_PATTERNS
            .iter()
            .filter(|p| p.is_match(name))
            .count();
        if movie_score >= 2 {
            return Some(ContentType::Movie);
        }

        None
    }

    /// Detect the quality tier advertised in a name
    pub fn detect_quality(name: &str) -> Option<Quality> {
        if QUALITY_4K.is_match(name) {
            Some(Quality::Uhd4k)
        } else if QUALITY_FHD.is_match(name) {
            Some(Quality::Fhd)
        } else if QUALITY_HD.is_match(name) {
            Some(Quality::Hd)
        } else if QUALITY_SD.is_match(name) {
            Some(Quality::Sd)
        } else {
            None
        }
    }

    /// Extract year, season/episode, series name and a clean title
    pub fn parse_title(name: &str) -> ParsedTitle {
        let current_year = chrono::Datelike::year(&chrono::Utc::now()) as u16;
        let plausible = |y: u16| (1900..=current_year + 1).contains(&y);

        let year = EXTRACTOR_YEAR
            .captures(name)
            .or_else(|| EXTRACTOR_YEAR_STANDALONE.captures(name))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|y| plausible(*y));

        let marker = Self::extract_series_marker(name);
        let (season, episode) = match &marker {
            Some(m) => (Some(m.season), Some(m.episode)),
            None => (
                EXTRACTOR_SEASON
                    .captures(name)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok()),
                EXTRACTOR_EPISODE
                    .captures(name)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok()),
            ),
        };

        let mut title = Self::clean_title(name);
        if let Some(y) = year {
            // Standalone years survive bracket removal
            title = TRAILING_PUNCT
                .replace_all(title.trim_end_matches(&y.to_string()), "")
                .trim()
                .to_string();
        }
        if title.is_empty() {
            title = name.trim().to_string();
        }

        ParsedTitle {
            title,
            year,
            season,
            episode,
            series_name: marker.map(|m| m.series_name),
        }
    }

    /// Remove common prefixes (tags, emojis, numbering, country codes)
    fn remove_prefixes(title: &str) -> String {
        let result = PREFIX_CLEANER.replace_all(title.trim(), "");
        let result = COUNTRY_PREFIX_CLEANER.replace_all(&result, "");
        let result = NUMBERING_CLEANER.replace_all(&result, "");
        result.trim().to_string()
    }

    /// Detect SxxEyy, 1x02 and T01E02 episode naming
    ///
    /// Results (including misses) are memoized; playlists repeat the same
    /// names across re-uploads.
    pub fn extract_series_marker(name: &str) -> Option<SeriesMarker> {
        if let Ok(mut cache) = SERIES_CACHE.lock() {
            if let Some(cached) = cache.get(name) {
                return cached.clone();
            }
        }

        let clean_name = Self::remove_prefixes(name);
        let result = [&*SERIES_MAIN_PATTERN, &*SERIES_ALT_PATTERN, &*SERIES_PT_PATTERN]
            .iter()
            .find_map(|pattern| pattern.captures(&clean_name))
            .and_then(|caps| {
                let series_name = Self::clean_title(caps.get(1)?.as_str());
                if series_name.is_empty() {
                    return None;
                }
                Some(SeriesMarker {
                    series_name,
                    season: caps.get(2)?.as_str().parse().ok()?,
                    episode: caps.get(3)?.as_str().parse().ok()?,
                })
            });

        if let Ok(mut cache) = SERIES_CACHE.lock() {
            cache.put(name.to_string(), result.clone());
        }
        result
    }

    /// Clean title removing tags and special characters
    pub fn clean_title(title: &str) -> String {
        let result = Self::remove_prefixes(title);
        let result = BRACKETS.replace_all(&result, "");
        let result = EPISODE_MARKERS.replace_all(&result, "");
        let result = QUALITY_TAGS.replace_all(&result, "");
        let result = FORMAT_TAGS.replace_all(&result, "");
        let result = AUDIO_TAGS.replace_all(&result, "");
        let result = PIPES.replace_all(&result, " ");
        let result = MULTI_SPACES.replace_all(&result, " ");
        let result = TRAILING_PUNCT.replace_all(result.trim(), "");
        result.trim().to_string()
    }

    /// Turn a raw playlist entry into a catalog row
    pub fn to_catalog_entry(entry: PlaylistEntry, source: EntrySource) -> CatalogEntry {
        let content_type = Self::classify(&entry);
        let quality = Self::detect_quality(&entry.name);
        let parsed = Self::parse_title(&entry.name);

        let (season, episode, series_name) = if content_type == ContentType::Series {
            let series_name = parsed.series_name.clone().or_else(|| Some(parsed.title.clone()));
            (parsed.season, parsed.episode, series_name)
        } else {
            (None, None, None)
        };

        // Channels carry no release year; "Channel 2000" is a name, not a date
        let year = if content_type == ContentType::Channel {
            None
        } else {
            parsed.year
        };

        CatalogEntry {
            name: entry.name,
            title: parsed.title,
            stream_url: entry.url,
            logo: entry.logo,
            group: entry.group,
            epg_id: entry.tvg_id,
            content_type,
            quality,
            year,
            season,
            episode,
            series_name,
            source,
        }
    }
}
