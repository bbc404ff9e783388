//! Event-to-request correlation.
//!
//! For each accepted event the engine ranks the requests in the correlation
//! pool by a heuristic confidence: closeness in time, known causation
//! patterns, and a penalty for requests that preceded the event. The exact
//! constants live in [`crate::config`] and must not drift; trace consumers
//! compare confidences across exports.

use std::cmp::Ordering;

use crate::config::{
    RecorderConfig, CONFIDENCE_BASE, CONFIDENCE_DECAY, CONFIDENCE_TIE_MARGIN, PATTERN_BOOST,
    PATTERN_BOOST_CAP, PRE_EVENT_PENALTY,
};
use crate::data::models::{
    CapturedEvent, CausationDirection, CorrelatedRequest, ElementInfo, EventKind, NetworkRequest,
};

/// Marker that identifies an assign-style OData function import in a
/// request's url or body.
pub const ASSIGN_ACTION_MARKER: &str = "Assign";

/// A named causation heuristic: if `matches` holds and the request started
/// within `window_ms` after the event, the link's confidence is boosted.
pub struct CausationPattern {
    /// Stable pattern name recorded on the link.
    pub name: &'static str,
    /// How long after the event the request may start.
    pub window_ms: u64,
    /// Element/request predicate.
    pub matches: fn(&CapturedEvent, &NetworkRequest) -> bool,
}

/// Recognized causation patterns, checked in order; the first hit wins.
pub const CAUSATION_PATTERNS: &[CausationPattern] = &[
    CausationPattern {
        name: "button-odata",
        window_ms: 3_000,
        matches: button_click_to_odata,
    },
    CausationPattern {
        name: "go-search",
        window_ms: 5_000,
        matches: go_press_to_odata,
    },
    CausationPattern {
        name: "assign-action",
        window_ms: 3_000,
        matches: assign_to_action_call,
    },
    CausationPattern {
        name: "link-navigation",
        window_ms: 4_000,
        matches: link_to_odata,
    },
    CausationPattern {
        name: "filter-refresh",
        window_ms: 4_000,
        matches: filter_to_odata,
    },
];

fn element(event: &CapturedEvent) -> Option<&ElementInfo> {
    event.element.as_ref()
}

fn button_click_to_odata(event: &CapturedEvent, request: &NetworkRequest) -> bool {
    event.kind == EventKind::Click
        && element(event).is_some_and(ElementInfo::is_button_like)
        && request.kind.is_odata()
}

fn go_press_to_odata(event: &CapturedEvent, request: &NetworkRequest) -> bool {
    element(event).is_some_and(|e| e.text_contains("Go")) && request.kind.is_odata()
}

fn assign_to_action_call(event: &CapturedEvent, request: &NetworkRequest) -> bool {
    element(event).is_some_and(ElementInfo::signals_assign)
        && (request.url.contains(ASSIGN_ACTION_MARKER)
            || request
                .body
                .as_deref()
                .is_some_and(|b| b.contains(ASSIGN_ACTION_MARKER)))
}

fn link_to_odata(event: &CapturedEvent, request: &NetworkRequest) -> bool {
    element(event).is_some_and(ElementInfo::is_anchor) && request.kind.is_odata()
}

fn filter_to_odata(event: &CapturedEvent, request: &NetworkRequest) -> bool {
    element(event).is_some_and(ElementInfo::is_filter_control) && request.kind.is_odata()
}

/// Score a single candidate, or `None` when it is outside the window.
pub fn score(
    event: &CapturedEvent,
    request: &NetworkRequest,
    config: &RecorderConfig,
) -> Option<CorrelatedRequest> {
    let window = config.correlation_window_ms;
    let delta_ms = request.started_at as i64 - event.timestamp as i64;
    if delta_ms.unsigned_abs() > window {
        return None;
    }

    let mut confidence =
        (CONFIDENCE_BASE - (delta_ms.unsigned_abs() as f64 / window as f64) * CONFIDENCE_DECAY)
            .max(0.0);

    // Causation patterns describe forward causality only.
    let pattern = CAUSATION_PATTERNS.iter().find(|p| {
        delta_ms >= 0 && delta_ms.unsigned_abs() <= p.window_ms && (p.matches)(event, request)
    });
    if pattern.is_some() {
        confidence = (confidence + PATTERN_BOOST).min(PATTERN_BOOST_CAP);
    }

    if delta_ms < 0 {
        confidence *= PRE_EVENT_PENALTY;
    }

    Some(CorrelatedRequest {
        request_id: request.id.clone(),
        confidence,
        delta_ms,
        direction: if delta_ms < 0 {
            CausationDirection::BeforeClick
        } else {
            CausationDirection::AfterClick
        },
        pattern: pattern.map(|p| p.name.to_string()),
    })
}

/// Rank every in-window candidate for `event`, confidence-descending with
/// near-ties (within [`CONFIDENCE_TIE_MARGIN`] points) ordered by smaller
/// time distance.
pub fn correlate_event(
    event: &CapturedEvent,
    candidates: &[NetworkRequest],
    config: &RecorderConfig,
) -> Vec<CorrelatedRequest> {
    let mut links: Vec<CorrelatedRequest> = candidates
        .iter()
        .filter_map(|request| score(event, request, config))
        .collect();

    links.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    // Re-order tie groups by |Δt|. A group is anchored at its strongest
    // member; everything within the margin of the anchor belongs to it.
    let mut start = 0;
    while start < links.len() {
        let anchor = links[start].confidence;
        let mut end = start + 1;
        while end < links.len() && anchor - links[end].confidence <= CONFIDENCE_TIE_MARGIN {
            end += 1;
        }
        links[start..end].sort_by_key(|link| link.delta_ms.abs());
        start = end;
    }

    links
}
