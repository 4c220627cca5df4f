//! Session reconstruction over the flat chat message collection.
//!
//! Sessions are never persisted: they are rebuilt on every list request by
//! grouping the most recent messages on their session id.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{ChatMessage, ChatRole, SessionSummary};

pub const PREVIEW_MAX_CHARS: usize = 40;
pub const EMPTY_PREVIEW: &str = "New conversation";
pub const UNKNOWN_DATE: &str = "Unknown date";

struct TimedMessage<'a> {
    message: &'a ChatMessage,
    at: Option<DateTime<Utc>>,
    position: usize,
}

/// Groups `messages` into one summary per session, most recent first.
///
/// Unparsable timestamps never fail the aggregation: the affected message
/// still counts towards its session but reports [`UNKNOWN_DATE`] and sorts
/// after every parsable timestamp.
pub fn summarize_sessions(messages: &[ChatMessage], now: DateTime<Utc>) -> Vec<SessionSummary> {
    let groups = group_by_session(messages);

    let mut summaries = groups
        .into_iter()
        .map(|(session_id, mut group)| {
            group.sort_by(|a, b| chronological(a, b));
            summarize_group(session_id, &group, now)
        })
        .collect::<Vec<_>>();

    summaries.sort_by(|a, b| {
        match (a.last_message_at, b.last_message_at) {
            (Some(left), Some(right)) => right.cmp(&left),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.session_id.cmp(&b.session_id))
    });

    summaries
}

fn group_by_session(messages: &[ChatMessage]) -> HashMap<&str, Vec<TimedMessage<'_>>> {
    let mut groups: HashMap<&str, Vec<TimedMessage<'_>>> = HashMap::new();
    for (position, message) in messages.iter().enumerate() {
        groups
            .entry(message.session_id.as_str())
            .or_default()
            .push(TimedMessage {
                message,
                at: parse_timestamp(&message.timestamp),
                position,
            });
    }
    groups
}

/// Oldest first; unparsable timestamps keep their fetch order at the end.
fn chronological(a: &TimedMessage<'_>, b: &TimedMessage<'_>) -> Ordering {
    match (a.at, b.at) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.position.cmp(&a.position))
}

fn summarize_group(
    session_id: &str,
    group: &[TimedMessage<'_>],
    now: DateTime<Utc>,
) -> SessionSummary {
    let started_at = group
        .iter()
        .find_map(|timed| timed.at)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string());
    let last_message_at = group.iter().filter_map(|timed| timed.at).max();
    let preview = group
        .iter()
        .find(|timed| timed.message.role == ChatRole::User)
        .map(|timed| preview_text(&timed.message.content))
        .unwrap_or_else(|| EMPTY_PREVIEW.to_string());

    SessionSummary {
        session_id: session_id.to_string(),
        started_at,
        preview,
        last_active: last_message_at
            .map(|at| relative_time(at, now))
            .unwrap_or_else(|| UNKNOWN_DATE.to_string()),
        message_count: group.len(),
        last_message_at,
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Whitespace-collapsed `content`, cut to [`PREVIEW_MAX_CHARS`] characters.
pub fn preview_text(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return EMPTY_PREVIEW.to_string();
    }
    if collapsed.chars().count() <= PREVIEW_MAX_CHARS {
        return collapsed;
    }
    let truncated = collapsed.chars().take(PREVIEW_MAX_CHARS).collect::<String>();
    format!("{}...", truncated.trim_end())
}

pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = elapsed.num_days();
    if days < 7 {
        return plural(days, "day");
    }
    at.format("%Y-%m-%d").to_string()
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{
        EMPTY_PREVIEW, UNKNOWN_DATE, preview_text, relative_time, summarize_sessions,
    };
    use crate::models::{ChatMessage, ChatRole};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn message(session: &str, role: ChatRole, content: &str, minutes_ago: i64) -> ChatMessage {
        ChatMessage {
            id: format!("{session}-{minutes_ago}-{}", role.as_str()),
            user_id: "user-1".to_string(),
            session_id: session.to_string(),
            role,
            content: content.to_string(),
            timestamp: (now() - Duration::minutes(minutes_ago)).to_rfc3339(),
        }
    }

    #[test]
    fn groups_two_sessions_with_expected_counts() {
        let messages = vec![
            message("s1", ChatRole::User, "Is it safe to eat sushi?", 30),
            message("s1", ChatRole::Assistant, "Cooked rolls are fine.", 29),
            message("s1", ChatRole::User, "What about tuna?", 5),
            message("s2", ChatRole::User, "Tips for back pain", 120),
            message("s2", ChatRole::Assistant, "Try prenatal yoga.", 119),
        ];

        let summaries = summarize_sessions(&messages, now());

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].session_id, "s1");
        assert_eq!(summaries[0].message_count, 3);
        assert_eq!(summaries[0].preview, "Is it safe to eat sushi?");
        assert_eq!(summaries[0].last_active, "5 minutes ago");
        assert_eq!(summaries[1].session_id, "s2");
        assert_eq!(summaries[1].message_count, 2);
        assert_eq!(summaries[1].last_active, "1 hour ago");
    }

    #[test]
    fn counts_are_conserved_across_groups() {
        let mut messages = Vec::new();
        for index in 0..37 {
            let session = format!("s{}", index % 5);
            let role = if index % 2 == 0 {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            messages.push(message(&session, role, "hello", index));
        }

        let summaries = summarize_sessions(&messages, now());
        let total = summaries.iter().map(|summary| summary.message_count).sum::<usize>();
        assert_eq!(total, messages.len());
        assert_eq!(summaries.len(), 5);
    }

    #[test]
    fn sorted_by_latest_message_descending_with_stable_ties() {
        let messages = vec![
            message("b", ChatRole::User, "b", 10),
            message("a", ChatRole::User, "a", 10),
            message("c", ChatRole::User, "c", 1),
            message("d", ChatRole::User, "d", 300),
        ];

        let order = summarize_sessions(&messages, now())
            .into_iter()
            .map(|summary| summary.session_id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn assistant_only_session_uses_placeholder_preview() {
        let messages = vec![message("s1", ChatRole::Assistant, "Welcome back!", 3)];
        let summaries = summarize_sessions(&messages, now());
        assert_eq!(summaries[0].preview, EMPTY_PREVIEW);
    }

    #[test]
    fn unparsable_timestamps_are_isolated() {
        let mut broken = message("s1", ChatRole::User, "first question", 0);
        broken.timestamp = "yesterday-ish".to_string();
        let messages = vec![
            broken,
            message("s2", ChatRole::User, "other", 60 * 24 * 3),
            {
                let mut only_broken = message("s3", ChatRole::User, "lost", 0);
                only_broken.timestamp = String::new();
                only_broken
            },
        ];

        let summaries = summarize_sessions(&messages, now());
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].session_id, "s2");
        assert_eq!(summaries[0].last_active, "3 days ago");
        assert!(
            summaries[1..]
                .iter()
                .all(|summary| summary.started_at == UNKNOWN_DATE && summary.last_active == UNKNOWN_DATE)
        );
    }

    #[test]
    fn preview_is_truncated_to_forty_characters() {
        let long = "How much water should I drink each day during the third trimester?";
        let preview = preview_text(long);
        assert!(preview.ends_with("..."));
        assert!(preview.trim_end_matches("...").chars().count() <= 40);
        assert_eq!(preview_text("  short\nquestion "), "short question");
    }

    #[test]
    fn relative_time_buckets() {
        let at = now();
        assert_eq!(relative_time(at, at + Duration::seconds(20)), "just now");
        assert_eq!(relative_time(at, at + Duration::minutes(1)), "1 minute ago");
        assert_eq!(relative_time(at, at + Duration::hours(5)), "5 hours ago");
        assert_eq!(relative_time(at, at + Duration::days(2)), "2 days ago");
        assert_eq!(relative_time(at, at + Duration::days(30)), "2026-10-18");
    }
}
