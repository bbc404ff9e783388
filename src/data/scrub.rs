//! Snapshot cleaning before persistence or export.
//!
//! Headers were already reduced to an allow-list at ingestion time; this
//! pass additionally blanks token values, caps request/response bodies and
//! redacts credential-shaped substrings from free text.

use regex::Regex;

use crate::config::BODY_TRUNCATION_MARKER;
use crate::data::models::{NetworkRequest, Session, SessionSnapshot, SNAPSHOT_SCHEMA_VERSION};

/// Header names whose values are blanked rather than dropped.
const REDACTED_HEADER_VALUES: &[&str] = &["x-csrf-token"];

/// Header names dropped outright if a producer bypassed the allow-list.
const DROPPED_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "proxy-authorization"];

#[derive(Debug, Clone)]
pub struct ScrubConfig {
    patterns: Vec<Regex>,
    body_cap_chars: usize,
}

impl ScrubConfig {
    pub fn new(patterns: Vec<Regex>, body_cap_chars: usize) -> Self {
        Self {
            patterns,
            body_cap_chars,
        }
    }

    pub fn default_patterns() -> Vec<Regex> {
        // Keep patterns simple: the Rust `regex` crate doesn't support look-behind.
        let raw = [
            r"Bearer\s+[A-Za-z0-9._-]{10,}",
            r"(?i)(password|passwd|secret|api[_-]?key|access[_-]?token)\s*[=:]\s*[^\s&\x22]{4,}",
            r"(?i)basic\s+[A-Za-z0-9+/=]{16,}",
        ];
        raw.into_iter().filter_map(|p| Regex::new(p).ok()).collect()
    }

    /// Default redaction set with the given body cap.
    pub fn with_body_cap(body_cap_chars: usize) -> Self {
        Self::new(Self::default_patterns(), body_cap_chars)
    }

    pub fn scrub_string(&self, input: &str) -> String {
        let mut out = input.to_string();
        for re in &self.patterns {
            out = re.replace_all(&out, "[REDACTED]").into_owned();
        }
        out
    }

    /// Cap a body at the configured character count, marking the cut.
    pub fn cap_body(&self, body: &str) -> String {
        if body.chars().count() <= self.body_cap_chars {
            return body.to_string();
        }
        let mut capped: String = body.chars().take(self.body_cap_chars).collect();
        capped.push_str(BODY_TRUNCATION_MARKER);
        capped
    }

    /// Produce the persisted form of a live session.
    pub fn clean_snapshot(&self, session: &Session) -> SessionSnapshot {
        let mut session = session.clone();
        for request in &mut session.requests {
            self.scrub_request(request);
        }
        for event in &mut session.events {
            if let Some(value) = event.payload.value.take() {
                event.payload.value = Some(self.scrub_string(&value));
            }
            if let Some(trail) = event.edits.as_mut() {
                trail.initial_value = self.scrub_string(&trail.initial_value);
                trail.final_value = self.scrub_string(&trail.final_value);
                for value in &mut trail.intermediate_values {
                    *value = self.scrub_string(value);
                }
            }
        }
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session,
        }
    }

    fn scrub_request(&self, request: &mut NetworkRequest) {
        request.headers.retain(|(name, _)| {
            !DROPPED_HEADERS
                .iter()
                .any(|dropped| name.eq_ignore_ascii_case(dropped))
        });
        for (name, value) in &mut request.headers {
            if REDACTED_HEADER_VALUES
                .iter()
                .any(|redacted| name.eq_ignore_ascii_case(redacted))
            {
                *value = "[REDACTED]".to_string();
            }
        }
        if let Some(body) = request.body.take() {
            request.body = Some(self.cap_body(&self.scrub_string(&body)));
        }
        if let Some(body) = request.response_body.take() {
            request.response_body = Some(self.cap_body(&self.scrub_string(&body)));
        }
        request.url = self.scrub_string(&request.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::SessionMeta;

    fn cfg() -> ScrubConfig {
        ScrubConfig::with_body_cap(10_000)
    }

    #[test]
    fn scrub_string_redacts_bearer_tokens() {
        let out = cfg().scrub_string("auth: Bearer abc1234567890XYZ done");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("abc1234567890XYZ"));
    }

    #[test]
    fn scrub_string_redacts_key_value_credentials() {
        let out = cfg().scrub_string("password=hunter42&next=/home");
        assert!(out.starts_with("[REDACTED]"));
        assert!(out.contains("next=/home"));
    }

    #[test]
    fn cap_body_marks_truncation() {
        let cfg = ScrubConfig::with_body_cap(5);
        let capped = cfg.cap_body("0123456789");
        assert!(capped.starts_with("01234"));
        assert!(capped.ends_with(BODY_TRUNCATION_MARKER));
        assert_eq!(cfg.cap_body("0123"), "0123");
    }

    #[test]
    fn clean_snapshot_strips_sensitive_headers_and_caps_bodies() {
        let mut session = Session::new("tab-1", SessionMeta::default(), 0);
        session.requests.push(NetworkRequest {
            id: "r1".to_string(),
            owner: "tab-1".to_string(),
            url: "https://host/sap/opu/odata/SRV/Suppliers".to_string(),
            method: "POST".to_string(),
            kind: crate::data::models::RequestKind::OData,
            started_at: 10,
            ended_at: Some(20),
            status: Some(201),
            headers: vec![
                ("authorization".to_string(), "Bearer zzz".to_string()),
                ("x-csrf-token".to_string(), "secrettoken".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body: Some("x".repeat(12_000)),
            response_body: None,
            matched_events: Vec::new(),
        });

        let snapshot = ScrubConfig::with_body_cap(10_000).clean_snapshot(&session);
        let request = &snapshot.session.requests[0];
        assert!(!request
            .headers
            .iter()
            .any(|(name, _)| name == "authorization"));
        let csrf = request
            .headers
            .iter()
            .find(|(name, _)| name == "x-csrf-token")
            .unwrap();
        assert_eq!(csrf.1, "[REDACTED]");

        let body = request.body.as_deref().unwrap();
        assert!(body.ends_with(BODY_TRUNCATION_MARKER));
        assert_eq!(
            body.chars().count(),
            10_000 + BODY_TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn clean_snapshot_scrubs_event_values() {
        let mut session = Session::new("tab-1", SessionMeta::default(), 0);
        let id = session.next_event_id();
        let mut event = crate::data::models::CapturedEvent::from_raw(
            id,
            crate::data::models::RawEvent {
                kind: crate::data::models::EventKind::Input,
                timestamp: 5,
                ..Default::default()
            },
        );
        event.payload.value = Some("api_key=sk12345678 trailing".to_string());
        session.events.push(event);

        let snapshot = cfg().clean_snapshot(&session);
        let value = snapshot.session.events[0].payload.value.as_deref().unwrap();
        assert!(value.contains("[REDACTED]"));
        assert!(!value.contains("sk12345678"));
    }
}
