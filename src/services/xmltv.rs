//! XMLTV (EPG) parser
//!
//! Event-driven so multi-megabyte guides never build a DOM. Only the
//! elements the EPG screens and the notifier read are kept.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

use crate::models::{EpgChannel, EpgProgram};
use crate::services::error::IngestError;

/// Duration assumed when a programme has no usable stop time and no successor
const DEFAULT_PROGRAM_MINUTES: i64 = 30;

/// Parsed XMLTV document
#[derive(Debug, Default)]
pub struct XmltvDocument {
    pub channels: Vec<EpgChannel>,
    pub programs: Vec<EpgProgram>,
    /// Programmes dropped for missing channel/start/title
    pub skipped: usize,
    /// Repeat listings of a (channel, start) slot; the last one wins
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    Root,
    Channel,
    DisplayName,
    Programme,
    Title,
    Desc,
    Category,
    EpisodeNum,
}

#[derive(Debug, Default)]
struct PendingChannel {
    id: String,
    display_name: String,
    icon: Option<String>,
}

#[derive(Debug, Default)]
struct PendingProgram {
    channel_id: String,
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    title: String,
    description: Option<String>,
    category: Option<String>,
    episode_num: Option<String>,
    icon: Option<String>,
}

fn attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Parse `±hhmm` / `±hh:mm` / `Z` / `UTC` into seconds east of UTC
fn parse_offset(tz: &str) -> Option<i32> {
    let tz = tz.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("z") || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("gmt") {
        return Some(0);
    }

    let sign = match tz.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = tz[1..].chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

/// Parse an XMLTV timestamp: `YYYYMMDDhhmm[ss][ ][±zzzz]`
pub fn parse_xmltv_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let digits_end = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, rest) = raw.split_at(digits_end);
    if digits.len() != 12 && digits.len() != 14 {
        return None;
    }

    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();
    let year: i32 = digits[..4].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?;
    let seconds = if digits.len() == 14 { field(12..14)? } else { 0 };
    let naive = date.and_hms_opt(field(8..10)?, field(10..12)?, seconds)?;

    let offset = FixedOffset::east_opt(parse_offset(rest)?)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Keep one programme per start time; the sort is stable so the last listing wins
fn dedup_slots(list: Vec<(DateTime<Utc>, PendingProgram)>, duplicates: &mut usize) -> Vec<(DateTime<Utc>, PendingProgram)> {
    let mut unique: Vec<(DateTime<Utc>, PendingProgram)> = Vec::with_capacity(list.len());
    for (start, program) in list {
        match unique.last_mut() {
            Some(last) if last.0 == start => {
                *last = (start, program);
                *duplicates += 1;
            }
            _ => unique.push((start, program)),
        }
    }
    unique
}

/// Fill missing or inverted stop times from the next programme on the same channel
///
/// Programmes are unique on (channel_id, starts_at) afterwards, which the
/// programme upsert relies on.
fn resolve_stop_times(pending: Vec<PendingProgram>, skipped: &mut usize, duplicates: &mut usize) -> Vec<EpgProgram> {
    let mut by_channel: HashMap<String, Vec<(DateTime<Utc>, PendingProgram)>> = HashMap::new();

    for program in pending {
        match program.start {
            Some(start) if !program.channel_id.is_empty() && !program.title.is_empty() => {
                by_channel
                    .entry(program.channel_id.clone())
                    .or_default()
                    .push((start, program));
            }
            _ => *skipped += 1,
        }
    }

    let mut programs = Vec::new();
    for (_, mut list) in by_channel {
        list.sort_by_key(|(start, _)| *start);
        let list = dedup_slots(list, duplicates);
        let next_starts: Vec<Option<DateTime<Utc>>> = list
            .iter()
            .skip(1)
            .map(|(start, _)| Some(*start))
            .chain(std::iter::once(None))
            .collect();

        for ((start, program), next_start) in list.into_iter().zip(next_starts) {
            let ends_at = program
                .stop
                .filter(|stop| *stop > start)
                .or_else(|| next_start.filter(|next| *next > start))
                .unwrap_or_else(|| start + Duration::minutes(DEFAULT_PROGRAM_MINUTES));

            programs.push(EpgProgram {
                channel_id: program.channel_id,
                title: program.title,
                description: program.description,
                category: program.category,
                episode_num: program.episode_num,
                icon: program.icon,
                starts_at: start,
                ends_at,
            });
        }
    }

    programs.sort_by(|a, b| a.channel_id.cmp(&b.channel_id).then(a.starts_at.cmp(&b.starts_at)));
    programs
}

/// Parse an XMLTV document held in memory
pub fn parse_xmltv(xml: &str) -> Result<XmltvDocument, IngestError> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
    let config = reader.config_mut();
    config.trim_text(true);
    config.expand_empty_elements = true;

    let mut doc = XmltvDocument::default();
    let mut pending_programs = Vec::new();
    let mut seen_channels = HashMap::new();

    let mut state = ParserState::Root;
    let mut current_channel: Option<PendingChannel> = None;
    let mut current_program: Option<PendingProgram> = None;
    let mut text_buf = String::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"channel" if state == ParserState::Root => {
                    state = ParserState::Channel;
                    current_channel = Some(PendingChannel {
                        id: attribute(e, b"id").unwrap_or_default(),
                        ..Default::default()
                    });
                }
                b"programme" if state == ParserState::Root => {
                    state = ParserState::Programme;
                    let start = attribute(e, b"start").and_then(|s| parse_xmltv_time(&s));
                    let stop = attribute(e, b"stop").and_then(|s| parse_xmltv_time(&s));
                    current_program = Some(PendingProgram {
                        channel_id: attribute(e, b"channel").unwrap_or_default(),
                        start,
                        stop,
                        ..Default::default()
                    });
                }
                b"display-name" if state == ParserState::Channel => {
                    state = ParserState::DisplayName;
                    text_buf.clear();
                }
                b"title" if state == ParserState::Programme => {
                    state = ParserState::Title;
                    text_buf.clear();
                }
                b"desc" if state == ParserState::Programme => {
                    state = ParserState::Desc;
                    text_buf.clear();
                }
                b"category" if state == ParserState::Programme => {
                    state = ParserState::Category;
                    text_buf.clear();
                }
                b"episode-num" if state == ParserState::Programme => {
                    state = ParserState::EpisodeNum;
                    text_buf.clear();
                }
                b"icon" => {
                    let src = attribute(e, b"src");
                    match state {
                        ParserState::Channel => {
                            if let Some(chan) = current_channel.as_mut() {
                                chan.icon = chan.icon.take().or(src);
                            }
                        }
                        ParserState::Programme => {
                            if let Some(prog) = current_program.as_mut() {
                                prog.icon = prog.icon.take().or(src);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if !matches!(state, ParserState::Root | ParserState::Channel | ParserState::Programme) {
                    match e.unescape() {
                        Ok(text) => text_buf.push_str(&text),
                        Err(_) => text_buf.push_str(&String::from_utf8_lossy(&e)),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if !matches!(state, ParserState::Root | ParserState::Channel | ParserState::Programme) {
                    text_buf.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"channel" => {
                    if let Some(chan) = current_channel.take() {
                        if !chan.id.is_empty() && !seen_channels.contains_key(&chan.id) {
                            seen_channels.insert(chan.id.clone(), doc.channels.len());
                            let display_name = if chan.display_name.is_empty() {
                                chan.id.clone()
                            } else {
                                chan.display_name
                            };
                            doc.channels.push(EpgChannel {
                                id: chan.id,
                                display_name,
                                icon: chan.icon,
                            });
                        }
                    }
                    state = ParserState::Root;
                }
                b"programme" => {
                    if let Some(prog) = current_program.take() {
                        pending_programs.push(prog);
                    }
                    state = ParserState::Root;
                }
                b"display-name" if state == ParserState::DisplayName => {
                    if let Some(chan) = current_channel.as_mut() {
                        if chan.display_name.is_empty() {
                            chan.display_name = text_buf.trim().to_string();
                        }
                    }
                    state = ParserState::Channel;
                }
                b"title" if state == ParserState::Title => {
                    if let Some(prog) = current_program.as_mut() {
                        if prog.title.is_empty() {
                            prog.title = text_buf.trim().to_string();
                        }
                    }
                    state = ParserState::Programme;
                }
                b"desc" if state == ParserState::Desc => {
                    if let Some(prog) = current_program.as_mut() {
                        prog.description = prog.description.take().or_else(|| non_empty(&text_buf));
                    }
                    state = ParserState::Programme;
                }
                b"category" if state == ParserState::Category => {
                    if let Some(prog) = current_program.as_mut() {
                        prog.category = prog.category.take().or_else(|| non_empty(&text_buf));
                    }
                    state = ParserState::Programme;
                }
                b"episode-num" if state == ParserState::EpisodeNum => {
                    if let Some(prog) = current_program.as_mut() {
                        prog.episode_num = prog.episode_num.take().or_else(|| non_empty(&text_buf));
                    }
                    state = ParserState::Programme;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::Xml(format!("at byte {}: {}", position, e))),
        }
    }

    if state != ParserState::Root {
        return Err(IngestError::Xml("unexpected end of document".to_string()));
    }

    doc.programs = resolve_stop_times(pending_programs, &mut doc.skipped, &mut doc.duplicates);
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="test">
  <channel id="sport1.uk">
    <display-name>Sport 1</display-name>
    <display-name>S1</display-name>
    <icon src="http://img/sport1.png"/>
  </channel>
  <channel id="news.uk">
    <display-name>News &amp; Weather</display-name>
  </channel>
  <programme start="20250301150000 +0000" stop="20250301170000 +0000" channel="sport1.uk">
    <title lang="en">Arsenal v Chelsea</title>
    <desc><![CDATA[Premier League live]]></desc>
    <category>Football</category>
    <category>Sport</category>
    <episode-num system="onscreen">R27</episode-num>
  </programme>
  <programme start="20250301170000 +0000" channel="sport1.uk">
    <title>Post-match</title>
  </programme>
  <programme start="20250301180000 +0000" channel="sport1.uk">
    <title>Highlights</title>
  </programme>
  <programme start="bogus" channel="news.uk">
    <title>Broken</title>
  </programme>
  <programme start="202503011200 +0100" stop="202503011300 +0100" channel="news.uk">
    <title>Lunchtime News</title>
  </programme>
</tv>"#;

    #[test]
    fn test_parse_time_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 15, 0, 0).unwrap();
        assert_eq!(parse_xmltv_time("20250301150000 +0000"), Some(expected));
        assert_eq!(parse_xmltv_time("20250301150000+0000"), Some(expected));
        assert_eq!(parse_xmltv_time("20250301150000"), Some(expected));
        assert_eq!(parse_xmltv_time("202503011500"), Some(expected));
        assert_eq!(parse_xmltv_time("20250301170000 +0200"), Some(expected));
        assert_eq!(parse_xmltv_time("20250301100000 -05:00"), Some(expected));
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert_eq!(parse_xmltv_time(""), None);
        assert_eq!(parse_xmltv_time("2025-03-01"), None);
        assert_eq!(parse_xmltv_time("20251301150000 +0000"), None);
        assert_eq!(parse_xmltv_time("20250301150000 CET"), None);
    }

    #[test]
    fn test_parse_document() {
        let doc = parse_xmltv(SAMPLE).unwrap();

        assert_eq!(doc.channels.len(), 2);
        assert_eq!(doc.channels[0].display_name, "Sport 1");
        assert_eq!(doc.channels[0].icon.as_deref(), Some("http://img/sport1.png"));
        assert_eq!(doc.channels[1].display_name, "News & Weather");

        assert_eq!(doc.skipped, 1);
        assert_eq!(doc.programs.len(), 4);

        let lunch = &doc.programs[0];
        assert_eq!(lunch.channel_id, "news.uk");
        assert_eq!(lunch.starts_at, Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap());

        let matchday = &doc.programs[1];
        assert_eq!(matchday.title, "Arsenal v Chelsea");
        assert_eq!(matchday.description.as_deref(), Some("Premier League live"));
        assert_eq!(matchday.category.as_deref(), Some("Football"));
        assert_eq!(matchday.episode_num.as_deref(), Some("R27"));
    }

    #[test]
    fn test_missing_stop_uses_next_start_then_default() {
        let doc = parse_xmltv(SAMPLE).unwrap();
        let post_match = doc.programs.iter().find(|p| p.title == "Post-match").unwrap();
        assert_eq!(post_match.ends_at, Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap());

        let highlights = doc.programs.iter().find(|p| p.title == "Highlights").unwrap();
        assert_eq!(highlights.ends_at, highlights.starts_at + Duration::minutes(30));
    }

    #[test]
    fn test_repeat_listing_keeps_last() {
        let xml = r#"<tv>
  <programme start="20250301150000 +0000" channel="a"><title>First listing</title></programme>
  <programme start="20250301150000 +0000" stop="20250301160000 +0000" channel="a"><title>Second listing</title></programme>
  <programme start="20250301150000 +0000" channel="b"><title>Other channel</title></programme>
</tv>"#;
        let doc = parse_xmltv(xml).unwrap();

        assert_eq!(doc.duplicates, 1);
        assert_eq!(doc.programs.len(), 2);

        let on_a: Vec<_> = doc.programs.iter().filter(|p| p.channel_id == "a").collect();
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].title, "Second listing");
        assert_eq!(on_a[0].ends_at, Utc.with_ymd_and_hms(2025, 3, 1, 16, 0, 0).unwrap());

        let mut keys: Vec<_> = doc.programs.iter().map(|p| (&p.channel_id, p.starts_at)).collect();
        keys.dedup();
        assert_eq!(keys.len(), doc.programs.len());
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_xmltv("<tv><channel id=\"a\"><display-name>A</channel></tv>").unwrap_err();
        assert!(matches!(err, IngestError::Xml(_)));

        let err = parse_xmltv("<tv><programme start=\"20250301150000\" channel=\"a\">").unwrap_err();
        assert!(matches!(err, IngestError::Xml(_)));
    }
}
