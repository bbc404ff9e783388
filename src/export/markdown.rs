//! Deterministic Markdown report generation.
//!
//! Pure text assembly from a session's data: a header, an OData usage
//! summary, one subsection per event, and a request appendix. Output for
//! the same session is byte-identical across runs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{SecondsFormat, TimeZone, Utc};
use regex::Regex;

use crate::data::models::{CapturedEvent, CausationDirection, NetworkRequest, Session};

/// Render the full report for a session.
pub fn render_markdown(session: &Session) -> String {
    let mut out = String::new();

    writeln!(out, "# Session trace: {}", session.name).ok();
    writeln!(out).ok();
    writeln!(out, "- Session: `{}`", session.id).ok();
    writeln!(out, "- Owner: `{}`", session.owner).ok();
    if let Some(url) = session.meta.origin_url.as_deref() {
        writeln!(out, "- Origin: {url}").ok();
    }
    writeln!(out, "- Started: {}", iso(session.started_at)).ok();
    match session.ended_at {
        Some(end) => writeln!(out, "- Ended: {}", iso(end)).ok(),
        None => writeln!(out, "- Ended: in progress").ok(),
    };
    if let Some(duration) = session.duration_ms {
        writeln!(
            out,
            "- Active duration: {} (paused {})",
            human_duration(duration),
            human_duration(session.paused_total_ms)
        )
        .ok();
    }
    writeln!(out, "- Events: {}", session.events.len()).ok();
    writeln!(out, "- Network requests: {}", session.requests.len()).ok();
    writeln!(out).ok();

    render_odata_summary(&mut out, &session.requests);
    render_events(&mut out, session);
    render_request_appendix(&mut out, session);

    out
}

fn render_odata_summary(out: &mut String, requests: &[NetworkRequest]) {
    writeln!(out, "## OData usage").ok();
    writeln!(out).ok();

    // entity → method → count, in lexical order for stable output.
    let mut usage: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
    for request in requests.iter().filter(|r| r.kind.is_odata()) {
        for (entity, method) in odata_operations(request) {
            *usage.entry(entity).or_default().entry(method).or_default() += 1;
        }
    }

    if usage.is_empty() {
        writeln!(out, "No OData traffic captured.").ok();
        writeln!(out).ok();
        return;
    }

    for (entity, methods) in usage {
        let breakdown: Vec<String> = methods
            .iter()
            .map(|(method, count)| format!("{method} {count}"))
            .collect();
        writeln!(out, "- `{entity}`: {}", breakdown.join(", ")).ok();
    }
    writeln!(out).ok();
}

/// Entity/operation tokens for one OData request: the addressed entity from
/// the url, plus any sub-operations inside a `$batch` body.
fn odata_operations(request: &NetworkRequest) -> Vec<(String, String)> {
    let mut ops = Vec::new();

    if let Some(entity) = url_entity(&request.url) {
        ops.push((entity, request.method.to_ascii_uppercase()));
    }
    if let Some(body) = request.body.as_deref() {
        static BATCH_OP: OnceLock<Regex> = OnceLock::new();
        let batch_op = BATCH_OP.get_or_init(|| {
            Regex::new(r"(?m)^(GET|POST|PUT|PATCH|MERGE|DELETE)\s+([A-Za-z_][\w]*)")
                .expect("valid batch pattern")
        });
        for captures in batch_op.captures_iter(body) {
            ops.push((captures[2].to_string(), captures[1].to_string()));
        }
    }
    ops
}

/// The entity segment of an OData url: the last path segment, minus any
/// key predicate, skipping `$`-prefixed system segments.
fn url_entity(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .filter(|s| !s.starts_with('$'))?;
    let entity: String = segment.chars().take_while(|c| *c != '(').collect();
    if entity.is_empty() || !entity.chars().next().is_some_and(char::is_alphabetic) {
        return None;
    }
    Some(entity)
}

fn render_events(out: &mut String, session: &Session) {
    writeln!(out, "## Events").ok();
    writeln!(out).ok();

    if session.events.is_empty() {
        writeln!(out, "No events captured.").ok();
        writeln!(out).ok();
        return;
    }

    for event in &session.events {
        render_event(out, session, event);
    }
}

fn render_event(out: &mut String, session: &Session, event: &CapturedEvent) {
    writeln!(out, "### {} · {}", event.id, event.kind.label()).ok();
    writeln!(out).ok();
    writeln!(
        out,
        "- Time: {} (+{})",
        iso(event.timestamp),
        human_duration(event.timestamp.saturating_sub(session.started_at))
    )
    .ok();

    if let Some(element) = event.element.as_ref() {
        let mut label = element.tag.clone().unwrap_or_else(|| "element".to_string());
        if let Some(text) = element.text.as_deref().filter(|t| !t.is_empty()) {
            write!(label, " \"{text}\"").ok();
        } else if let Some(id) = element.id.as_deref() {
            write!(label, " #{id}").ok();
        }
        writeln!(out, "- Element: {label}").ok();
    }
    if let Some(key) = event.payload.key.as_deref() {
        writeln!(out, "- Key: `{key}`").ok();
    }
    if !event.payload.files.is_empty() {
        writeln!(out, "- Files: {}", event.payload.files.join(", ")).ok();
    }
    if let Some(value) = event.payload.value.as_deref() {
        writeln!(out, "- Value: `{value}`").ok();
    }
    if let Some(screenshot) = event.screenshot_id.as_deref() {
        writeln!(out, "- Screenshot: `{screenshot}`").ok();
    }

    if let Some(trail) = event.edits.as_ref() {
        writeln!(
            out,
            "- Edits: {} inputs over {}, `{}` → `{}`{}{}",
            trail.edit_count,
            human_duration(trail.duration_ms),
            trail.initial_value,
            trail.final_value,
            if trail.had_backspace {
                ", with backspace"
            } else {
                ""
            },
            if trail.had_pause { ", with pause" } else { "" },
        )
        .ok();
    }

    if !event.correlated.is_empty() {
        writeln!(out, "- Correlated requests:").ok();
        for link in &event.correlated {
            let direction = match link.direction {
                CausationDirection::AfterClick => "after",
                CausationDirection::BeforeClick => "before",
            };
            let pattern = link
                .pattern
                .as_deref()
                .map(|p| format!(", pattern {p}"))
                .unwrap_or_default();
            writeln!(
                out,
                "  - `{}`: confidence {:.1}, {}ms {}{}",
                link.request_id,
                link.confidence,
                link.delta_ms.abs(),
                direction,
                pattern
            )
            .ok();
        }
    }
    writeln!(out).ok();
}

fn render_request_appendix(out: &mut String, session: &Session) {
    writeln!(out, "## Network requests").ok();
    writeln!(out).ok();

    if session.requests.is_empty() {
        writeln!(out, "No requests attached.").ok();
        return;
    }

    writeln!(out, "| Id | Kind | Method | Status | Start | Duration | URL |").ok();
    writeln!(out, "|---|---|---|---|---|---|---|").ok();
    for request in &session.requests {
        let status = request
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let duration = request
            .duration_ms()
            .map(human_duration)
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "| `{}` | {} | {} | {} | +{} | {} | {} |",
            request.id,
            request.kind.label(),
            request.method,
            status,
            human_duration(request.started_at.saturating_sub(session.started_at)),
            duration,
            request.url,
        )
        .ok();
    }
}

fn iso(epoch_ms: u64) -> String {
    Utc.timestamp_millis_opt(epoch_ms as i64)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}

fn human_duration(ms: u64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let seconds = ms / 1_000;
    if seconds < 60 {
        return format!("{}.{}s", seconds, (ms % 1_000) / 100);
    }
    format!("{}m {}s", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{
        CorrelatedRequest, EditTrail, ElementInfo, EventKind, EventPayload, RawEvent, RequestKind,
        SessionMeta,
    };

    fn sample_session() -> Session {
        let mut session = Session::new("tab-1", SessionMeta::default(), 1_700_000_000_000);
        session.name = "Manage Suppliers".to_string();

        let id = session.next_event_id();
        let mut click = CapturedEvent::from_raw(
            id,
            RawEvent {
                kind: EventKind::Click,
                timestamp: 1_700_000_001_000,
                element: Some(ElementInfo {
                    tag: Some("button".to_string()),
                    text: Some("Go".to_string()),
                    ..Default::default()
                }),
                context: None,
                payload: EventPayload::default(),
            },
        );
        click.screenshot_id = Some("0001-click-button".to_string());
        click.correlated.push(CorrelatedRequest {
            request_id: "r1".to_string(),
            confidence: 95.0,
            delta_ms: 800,
            direction: CausationDirection::AfterClick,
            pattern: Some("go-search".to_string()),
        });
        session.events.push(click);

        let id = session.next_event_id();
        let mut edit = CapturedEvent::from_raw(
            id,
            RawEvent {
                kind: EventKind::Input,
                timestamp: 1_700_000_002_000,
                element: None,
                context: None,
                payload: EventPayload {
                    value: Some("ACME".to_string()),
                    ..Default::default()
                },
            },
        );
        edit.edits = Some(EditTrail {
            edit_count: 4,
            initial_value: "A".to_string(),
            final_value: "ACME".to_string(),
            intermediate_values: vec!["A".into(), "AC".into(), "ACM".into(), "ACME".into()],
            had_backspace: false,
            had_pause: true,
            ended_at: 1_700_000_003_200,
            duration_ms: 1_200,
        });
        session.events.push(edit);

        session.requests.push(NetworkRequest {
            id: "r1".to_string(),
            owner: "tab-1".to_string(),
            url: "https://host/sap/opu/odata/SRV/Suppliers?$top=20".to_string(),
            method: "GET".to_string(),
            kind: RequestKind::OData,
            started_at: 1_700_000_001_800,
            ended_at: Some(1_700_000_001_950),
            status: Some(200),
            headers: Vec::new(),
            body: None,
            response_body: None,
            matched_events: vec!["0001".to_string()],
        });
        session.finalize(1_700_000_010_000);
        session
    }

    #[test]
    fn report_contains_every_section() {
        let report = render_markdown(&sample_session());
        assert!(report.starts_with("# Session trace: Manage Suppliers"));
        assert!(report.contains("## OData usage"));
        assert!(report.contains("- `Suppliers`: GET 1"));
        assert!(report.contains("### 0001 · click"));
        assert!(report.contains("confidence 95.0, 800ms after, pattern go-search"));
        assert!(report.contains("- Edits: 4 inputs over 1.2s, `A` → `ACME`, with pause"));
        assert!(report.contains("## Network requests"));
        assert!(report.contains("| `r1` | odata | GET | 200 |"));
    }

    #[test]
    fn report_is_deterministic() {
        let session = sample_session();
        assert_eq!(render_markdown(&session), render_markdown(&session));
    }

    #[test]
    fn empty_session_renders_placeholders() {
        let session = Session::new("tab-1", SessionMeta::default(), 0);
        let report = render_markdown(&session);
        assert!(report.contains("No OData traffic captured."));
        assert!(report.contains("No events captured."));
        assert!(report.contains("No requests attached."));
        assert!(report.contains("- Ended: in progress"));
    }

    #[test]
    fn url_entity_extraction() {
        assert_eq!(
            url_entity("https://host/sap/opu/odata/SRV/Suppliers?$top=5"),
            Some("Suppliers".to_string())
        );
        assert_eq!(
            url_entity("https://host/sap/opu/odata/SRV/Suppliers(104)"),
            Some("Suppliers".to_string())
        );
        assert_eq!(url_entity("https://host/sap/opu/odata/SRV/$batch"), None);
    }

    #[test]
    fn batch_bodies_contribute_operations() {
        let request = NetworkRequest {
            id: "r2".to_string(),
            owner: "tab-1".to_string(),
            url: "https://host/sap/opu/odata/SRV/$batch".to_string(),
            method: "POST".to_string(),
            kind: RequestKind::ODataBatch,
            started_at: 0,
            ended_at: None,
            status: None,
            headers: Vec::new(),
            body: Some("--batch\nGET Suppliers?$top=10\n--batch\nPOST Orders\n".to_string()),
            response_body: None,
            matched_events: Vec::new(),
        };
        let ops = odata_operations(&request);
        assert_eq!(
            ops,
            vec![
                ("Suppliers".to_string(), "GET".to_string()),
                ("Orders".to_string(), "POST".to_string()),
            ]
        );
    }
}
