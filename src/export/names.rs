//! Export filename derivation.
//!
//! Artifacts are named `<prefix>-<start time>-<semantic slug>.<ext>` so a
//! directory of exports sorts chronologically and reads at a glance.

use chrono::{TimeZone, Utc};

use crate::data::models::Session;

/// Application keywords matched against the session name and origin url
/// when no detected app identity is available.
const APP_KEYWORDS: &[&str] = &[
    "supplier", "purchase", "order", "invoice", "inventory", "customer", "billing", "approval",
    "shipment",
];

/// Build the export filename for a session artifact.
pub fn export_filename(session: &Session, prefix: &str, ext: &str) -> String {
    format!(
        "{prefix}-{}-{}.{ext}",
        start_stamp(session.started_at),
        semantic_slug(session)
    )
}

/// ISO-8601 start time with filename-safe separators.
fn start_stamp(epoch_ms: u64) -> String {
    Utc.timestamp_millis_opt(epoch_ms as i64)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H-%M-%SZ").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

/// Semantic slug fallback chain: detected app identity, then a keyword hit
/// in the session name or origin url, then the sanitized session name, then
/// `unknown`.
fn semantic_slug(session: &Session) -> String {
    if let Some(slug) = session
        .meta
        .app_id
        .as_deref()
        .map(sanitize_slug)
        .filter(|s| !s.is_empty())
    {
        return slug;
    }

    let haystack = format!(
        "{} {}",
        session.name,
        session.meta.origin_url.as_deref().unwrap_or("")
    )
    .to_lowercase();
    if let Some(keyword) = APP_KEYWORDS.iter().find(|k| haystack.contains(*k)) {
        return (*keyword).to_string();
    }

    if !session.has_default_name() {
        let slug = sanitize_slug(&session.name);
        if !slug.is_empty() {
            return slug;
        }
    }

    "unknown".to_string()
}

/// Lowercase, alphanumeric runs joined by dashes, capped at 30 chars.
fn sanitize_slug(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(30)
        .collect()
}
