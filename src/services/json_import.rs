//! JSON catalog import
//!
//! Accepts either a bare array of entries or an object wrapping the array
//! under `items`, `channels` or `entries`. Field names are matched loosely
//! since exports from different panels disagree on naming.

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::models::{ContentType, PlaylistEntry};
use crate::services::error::IngestError;
use crate::services::m3u_parser::ParseOutcome;

const DEFAULT_GROUP: &str = "Uncategorized";

const NAME_KEYS: &[&str] = &["name", "title"];
const URL_KEYS: &[&str] = &["url", "stream_url", "link"];
const LOGO_KEYS: &[&str] = &["logo", "tvg_logo", "icon", "poster"];
const GROUP_KEYS: &[&str] = &["group", "group_title", "category"];
const EPG_KEYS: &[&str] = &["tvg_id", "epg_id"];
const TYPE_KEYS: &[&str] = &["type", "kind"];
const WRAPPER_KEYS: &[&str] = &["items", "channels", "entries"];

/// First non-empty string value among `keys`
fn pick_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

fn entry_array(root: Value) -> Result<Vec<Value>, IngestError> {
    match root {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => WRAPPER_KEYS
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                IngestError::InvalidJson("expected an array or an object with items/channels/entries".to_string())
            }),
        _ => Err(IngestError::InvalidJson("expected an array of entries".to_string())),
    }
}

/// Parse a JSON catalog upload into playlist entries
pub fn parse_json_catalog(text: &str) -> Result<ParseOutcome, IngestError> {
    let root: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))
        .map_err(|e| IngestError::InvalidJson(e.to_string()))?;

    let mut outcome = ParseOutcome::default();
    let mut seen_urls = HashSet::new();

    for item in entry_array(root)? {
        let Value::Object(obj) = item else {
            outcome.skipped += 1;
            continue;
        };

        let (Some(name), Some(url)) = (pick_str(&obj, NAME_KEYS), pick_str(&obj, URL_KEYS)) else {
            outcome.skipped += 1;
            continue;
        };

        if !seen_urls.insert(url.clone()) {
            outcome.duplicates += 1;
            continue;
        }

        outcome.entries.push(PlaylistEntry {
            name,
            url,
            logo: pick_str(&obj, LOGO_KEYS),
            group: pick_str(&obj, GROUP_KEYS).unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            tvg_id: pick_str(&obj, EPG_KEYS),
            tvg_name: None,
            duration: -1,
            type_hint: pick_str(&obj, TYPE_KEYS).and_then(|t| ContentType::from_loose(&t)),
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_array_with_aliases() {
        let text = r#"[
            {"title": "Heat", "stream_url": "http://h/movie/1.mkv", "poster": "http://img/heat.jpg", "category": "Action", "kind": "vod"},
            {"name": "CNN", "link": "http://h/live/2.ts", "epg_id": "cnn.us", "type": "live"},
            {"name": "No url"},
            {"name": "CNN again", "url": "http://h/live/2.ts"},
            "garbage"
        ]"#;

        let outcome = parse_json_catalog(text).unwrap();
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.duplicates, 1);

        let heat = &outcome.entries[0];
        assert_eq!(heat.name, "Heat");
        assert_eq!(heat.logo.as_deref(), Some("http://img/heat.jpg"));
        assert_eq!(heat.group, "Action");
        assert_eq!(heat.type_hint, Some(ContentType::Movie));

        let cnn = &outcome.entries[1];
        assert_eq!(cnn.group, DEFAULT_GROUP);
        assert_eq!(cnn.tvg_id.as_deref(), Some("cnn.us"));
        assert_eq!(cnn.type_hint, Some(ContentType::Channel));
    }

    #[test]
    fn test_wrapped_object() {
        let text = r#"{"channels": [{"name": "Dark S01E01", "url": "http://h/series/3.mkv", "type": "show"}]}"#;
        let outcome = parse_json_catalog(text).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].type_hint, Some(ContentType::Series));
    }

    #[test]
    fn test_unknown_type_is_left_to_classifier() {
        let text = r#"[{"name": "X", "url": "http://h/x", "type": "podcast"}]"#;
        let outcome = parse_json_catalog(text).unwrap();
        assert_eq!(outcome.entries[0].type_hint, None);
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(parse_json_catalog("{not json"), Err(IngestError::InvalidJson(_))));
        assert!(matches!(parse_json_catalog(r#"{"foo": []}"#), Err(IngestError::InvalidJson(_))));
        assert!(matches!(parse_json_catalog("42"), Err(IngestError::InvalidJson(_))));
    }
}
