//! Favorite-team notification fan-out
//!
//! Scans programmes starting within the lookahead window and creates one
//! notification per (user, programme) whose title or description mentions
//! the user's favorite team. Inserts are idempotent, so overlapping runs
//! never duplicate notifications.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::db::repository;
use crate::models::{NewNotification, ProgramView, UserProfile};
use crate::services::metrics;

const INSERT_CHUNK: usize = 1_000;

/// Accent-, case- and punctuation-insensitive form used for matching
///
/// "Atlético-MG" becomes "atletico mg". Words are separated by single spaces.
pub fn normalize_for_match(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment on normalized strings
fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || haystack.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

/// Build the notifications for every user whose team appears in a programme
pub fn match_favorites(programs: &[ProgramView], users: &[UserProfile]) -> Vec<NewNotification> {
    let teams: Vec<(&UserProfile, String)> = users
        .iter()
        .map(|u| (u, normalize_for_match(&u.favorite_team)))
        .filter(|(_, team)| !team.is_empty())
        .collect();

    let mut notifications = Vec::new();

    for program in programs {
        let title = normalize_for_match(&program.title);
        let description = program.description.as_deref().map(normalize_for_match).unwrap_or_default();

        for (user, team) in &teams {
            if !contains_words(&title, team) && !contains_words(&description, team) {
                continue;
            }

            let channel = program.channel_name.as_deref().unwrap_or(&program.channel_id);
            notifications.push(NewNotification {
                user_id: user.user_id.clone(),
                title: format!("{} is on soon", user.favorite_team.trim()),
                body: format!(
                    "{} on {} at {} UTC",
                    program.title,
                    channel,
                    program.starts_at.format("%H:%M")
                ),
                program_id: program.id,
                channel_id: program.channel_id.clone(),
                starts_at: program.starts_at,
            });
        }
    }

    notifications
}

/// Result of one fan-out run
#[derive(Debug, Default, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport {
    pub programs_scanned: usize,
    pub users_scanned: usize,
    pub matches: usize,
    pub inserted: u64,
}

/// Run the fan-out for programmes starting in [now, now + lookahead)
pub async fn run_fanout(
    pool: &PgPool,
    now: DateTime<Utc>,
    lookahead: chrono::Duration,
    trigger: &str,
) -> anyhow::Result<FanoutReport> {
    let programs: Vec<ProgramView> = repository::epg::starting_between(pool, now, now + lookahead)
        .await?
        .into_iter()
        .map(ProgramView::from)
        .collect();

    let users: Vec<UserProfile> = repository::notifications::users_with_favorite_team(pool)
        .await?
        .into_iter()
        .map(|row| UserProfile {
            user_id: row.user_id,
            favorite_team: row.favorite_team,
        })
        .collect();

    let mut report = FanoutReport {
        programs_scanned: programs.len(),
        users_scanned: users.len(),
        ..Default::default()
    };

    if programs.is_empty() || users.is_empty() {
        return Ok(report);
    }

    let notifications = match_favorites(&programs, &users);
    report.matches = notifications.len();

    for chunk in notifications.chunks(INSERT_CHUNK) {
        report.inserted += repository::notifications::insert_many(pool, chunk).await?;
    }

    metrics::record_notifications(trigger, report.inserted);
    Ok(report)
}

/// Start the periodic fan-out task
pub async fn start_notifier_task(pool: PgPool, interval_secs: u64, lookahead_hours: i64) {
    tracing::info!(
        "Starting notifier task (interval: {}s, lookahead: {}h)",
        interval_secs,
        lookahead_hours
    );

    let lookahead = chrono::Duration::hours(lookahead_hours.max(1));
    let mut interval = time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match run_fanout(&pool, Utc::now(), lookahead, "scheduled").await {
            Ok(report) if report.inserted > 0 => tracing::info!(
                "programs" = report.programs_scanned,
                "users" = report.users_scanned,
                "inserted" = report.inserted,
                "Notification fan-out complete"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!("Notification fan-out failed: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn program(title: &str, description: Option<&str>) -> ProgramView {
        ProgramView {
            id: Uuid::new_v4(),
            channel_id: "sport1.uk".to_string(),
            channel_name: Some("Sport 1".to_string()),
            title: title.to_string(),
            description: description.map(str::to_string),
            category: None,
            episode_num: None,
            icon: None,
            starts_at: Utc.with_ymd_and_hms(2025, 3, 1, 19, 45, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2025, 3, 1, 21, 45, 0).unwrap(),
        }
    }

    fn user(id: &str, team: &str) -> UserProfile {
        UserProfile {
            user_id: id.to_string(),
            favorite_team: team.to_string(),
        }
    }

    #[test]
    fn test_normalize_for_match() {
        assert_eq!(normalize_for_match("São Paulo"), "sao paulo");
        assert_eq!(normalize_for_match("  Atlético-MG  "), "atletico mg");
        assert_eq!(normalize_for_match("Borussia Mönchengladbach!!"), "borussia monchengladbach");
        assert_eq!(normalize_for_match("..."), "");
    }

    #[test]
    fn test_whole_word_matching() {
        assert!(contains_words("arsenal v chelsea", "arsenal"));
        assert!(contains_words("live real madrid v getafe", "real madrid"));
        assert!(!contains_words("inter milan v roma", "inter miami"));
        assert!(!contains_words("romania v italy", "roma"));
        assert!(!contains_words("anything", ""));
    }

    #[test]
    fn test_match_favorites() {
        let programs = vec![
            program("Arsenal v Chelsea", Some("Premier League")),
            program("Football Tonight", Some("Preview featuring São Paulo and Flamengo")),
            program("Romania v Italy", None),
        ];
        let users = vec![user("u1", "Arsenal"), user("u2", "Sao Paulo"), user("u3", "Roma"), user("u4", "  ")];

        let notifications = match_favorites(&programs, &users);
        assert_eq!(notifications.len(), 2);

        let arsenal = &notifications[0];
        assert_eq!(arsenal.user_id, "u1");
        assert_eq!(arsenal.title, "Arsenal is on soon");
        assert_eq!(arsenal.body, "Arsenal v Chelsea on Sport 1 at 19:45 UTC");
        assert_eq!(arsenal.program_id, programs[0].id);

        let sao_paulo = &notifications[1];
        assert_eq!(sao_paulo.user_id, "u2");
        assert_eq!(sao_paulo.program_id, programs[1].id);
    }

    #[test]
    fn test_channel_id_used_when_name_missing() {
        let mut p = program("Arsenal v Spurs", None);
        p.channel_name = None;
        let notifications = match_favorites(&[p], &[user("u1", "arsenal")]);
        assert_eq!(notifications[0].body, "Arsenal v Spurs on sport1.uk at 19:45 UTC");
        assert_eq!(notifications[0].title, "arsenal is on soon");
    }
}
