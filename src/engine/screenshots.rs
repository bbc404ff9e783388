//! Screenshot identities and bounded retention.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::models::{CapturedEvent, ElementInfo, EventKind, Session};

/// Substrings that refine an element slug, checked against text, id and
/// classes in order.
const ELEMENT_KEYWORDS: &[&str] = &[
    "save", "create", "submit", "delete", "cancel", "search", "assign", "filter", "date",
    "amount", "supplier", "upload",
];

/// A captured image with its derived identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    /// Semantic identity, unique per capture within a session.
    pub id: String,
    /// Raw encoded image bytes.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Media type of `bytes`.
    pub media_type: String,
    /// Capture timestamp (epoch milliseconds).
    pub captured_at: u64,
    /// Id of the owning event.
    pub event_id: String,
    /// Kind of the owning event.
    pub event_kind: EventKind,
    /// Element region the capture focused on, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

/// Pixel region of the element an event targeted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
}

/// Derive the semantic identity for a screenshot of `event`.
///
/// Parts: sequential event id (timestamp when absent), event kind, app
/// context slug, element-semantics slug. Unresolvable parts are omitted.
pub fn screenshot_id(session: &Session, event: &CapturedEvent) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4);

    if event.id.is_empty() {
        parts.push(event.timestamp.to_string());
    } else {
        parts.push(event.id.clone());
    }
    parts.push(event.kind.label().to_string());

    if let Some(app) = app_slug(session, event) {
        parts.push(app);
    }
    if let Some(element) = event.element.as_ref().and_then(element_slug) {
        parts.push(element);
    }

    parts.join("-")
}

/// App-context slug: detected semantics first, session display name second.
fn app_slug(session: &Session, event: &CapturedEvent) -> Option<String> {
    let from_context = event
        .context
        .as_ref()
        .and_then(|c| c.app_id.as_deref())
        .map(slugify)
        .filter(|s| !s.is_empty());
    if from_context.is_some() {
        return from_context;
    }
    if session.has_default_name() {
        return None;
    }
    Some(slugify(&session.name)).filter(|s| !s.is_empty())
}

/// Element-semantics slug from tag/class/id/text heuristics.
///
/// `button` whose text mentions "save" becomes `button-save`; an input whose
/// id mentions "date" becomes `input-date`; untitled buttons and inputs fall
/// back to the bare tag; anything else resolves to nothing.
pub fn element_slug(element: &ElementInfo) -> Option<String> {
    let base = if element.is_button_like() {
        Some("button")
    } else if element
        .tag
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("input") || t.eq_ignore_ascii_case("textarea"))
    {
        Some("input")
    } else if element.is_anchor() {
        Some("link")
    } else {
        None
    }?;

    let haystack = format!(
        "{} {} {}",
        element.text.as_deref().unwrap_or(""),
        element.id.as_deref().unwrap_or(""),
        element.classes.join(" ")
    )
    .to_ascii_lowercase();

    let keyword = ELEMENT_KEYWORDS.iter().find(|k| haystack.contains(*k));
    Some(match keyword {
        Some(k) => format!("{base}-{k}"),
        None => base.to_string(),
    })
}

fn slugify(input: &str) -> String {
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

/// Per-session image store with oldest-first eviction.
#[derive(Debug, Default)]
pub struct ScreenshotRegistry {
    retention: usize,
    by_session: HashMap<String, Vec<Screenshot>>,
}

impl ScreenshotRegistry {
    /// Registry retaining at most `retention` images per session.
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            by_session: HashMap::new(),
        }
    }

    /// Insert a capture, evicting oldest-by-timestamp beyond the bound.
    pub fn insert(&mut self, session_id: &str, screenshot: Screenshot) {
        let entries = self.by_session.entry(session_id.to_string()).or_default();
        entries.push(screenshot);
        if entries.len() > self.retention {
            entries.sort_by_key(|s| s.captured_at);
            let overflow = entries.len() - self.retention;
            entries.drain(0..overflow);
        }
    }

    /// All retained images for a session.
    pub fn images_for(&self, session_id: &str) -> &[Screenshot] {
        self.by_session
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Retained image count for a session.
    pub fn count_for(&self, session_id: &str) -> usize {
        self.by_session.get(session_id).map_or(0, Vec::len)
    }

    /// Drop every image of a session.
    pub fn clear_session(&mut self, session_id: &str) {
        self.by_session.remove(session_id);
    }
}
