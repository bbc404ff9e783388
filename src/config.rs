//! Engine configuration.
//!
//! Every heuristic threshold used by the coalescer, the correlation engine,
//! the screenshot registry and the persistence throttle is a named constant
//! here, so tests can assert the exact values and hosts can tune them.

/// Maximum gap between two input events for them to coalesce into one edit.
pub const COALESCE_WINDOW_MS: u64 = 1_500;

/// A merge gap above this marks the coalesced edit as "had pause".
pub const COALESCE_PAUSE_GAP_MS: u64 = 500;

/// Maximum length difference for the small-edit similarity check.
pub const COALESCE_MAX_LEN_DELTA: usize = 3;

/// Minimum normalized similarity for a small edit to count as progressive.
pub const COALESCE_MIN_SIMILARITY: f64 = 0.7;

/// Requests within this many milliseconds (either direction) of an event are
/// correlation candidates.
pub const CORRELATION_WINDOW_MS: u64 = 10_000;

/// Base confidence at zero time distance.
pub const CONFIDENCE_BASE: f64 = 100.0;

/// Confidence lost across the full correlation window.
pub const CONFIDENCE_DECAY: f64 = 40.0;

/// Confidence added when a causation pattern matches.
pub const PATTERN_BOOST: f64 = 25.0;

/// Ceiling applied to pattern-boosted confidence.
pub const PATTERN_BOOST_CAP: f64 = 95.0;

/// Multiplier applied when the request precedes the event.
pub const PRE_EVENT_PENALTY: f64 = 0.7;

/// Candidates within this many confidence points are tied and ordered by
/// smaller time distance instead.
pub const CONFIDENCE_TIE_MARGIN: f64 = 5.0;

/// Screenshots retained per session; oldest-by-timestamp evicted beyond this.
pub const SCREENSHOT_RETENTION: usize = 100;

/// Completed requests stay in the correlation pool this long.
pub const REQUEST_POOL_RETENTION_MS: u64 = 30_000;

/// A persistence write is triggered every this many ingested events.
pub const PERSIST_EVERY_EVENTS: u64 = 10;

/// A persistence write is triggered every this many attached requests.
pub const PERSIST_EVERY_REQUESTS: u64 = 25;

/// Request/response bodies are capped at this many characters in snapshots.
pub const BODY_CAP_CHARS: usize = 10_000;

/// Suffix appended to a capped body.
pub const BODY_TRUNCATION_MARKER: &str = "… [truncated]";

/// Display name given to sessions whose metadata carried none; the one-shot
/// name-inference rule only fires while the name still equals this.
pub const DEFAULT_SESSION_NAME: &str = "Untitled session";

/// Tunable knobs for a [`Recorder`](crate::engine::recorder::Recorder).
///
/// Defaults mirror the module constants above.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Coalescing window in milliseconds.
    pub coalesce_window_ms: u64,
    /// Gap marking a coalesced edit as paused.
    pub coalesce_pause_gap_ms: u64,
    /// Length-delta bound for the small-edit check.
    pub coalesce_max_len_delta: usize,
    /// Similarity floor for the small-edit check.
    pub coalesce_min_similarity: f64,
    /// Correlation window in milliseconds.
    pub correlation_window_ms: u64,
    /// Retained screenshots per session.
    pub screenshot_retention: usize,
    /// Correlation-pool retention in milliseconds.
    pub request_pool_retention_ms: u64,
    /// Event-count persistence cadence.
    pub persist_every_events: u64,
    /// Request-count persistence cadence.
    pub persist_every_requests: u64,
    /// Snapshot body cap in characters.
    pub body_cap_chars: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: COALESCE_WINDOW_MS,
            coalesce_pause_gap_ms: COALESCE_PAUSE_GAP_MS,
            coalesce_max_len_delta: COALESCE_MAX_LEN_DELTA,
            coalesce_min_similarity: COALESCE_MIN_SIMILARITY,
            correlation_window_ms: CORRELATION_WINDOW_MS,
            screenshot_retention: SCREENSHOT_RETENTION,
            request_pool_retention_ms: REQUEST_POOL_RETENTION_MS,
            persist_every_events: PERSIST_EVERY_EVENTS,
            persist_every_requests: PERSIST_EVERY_REQUESTS,
            body_cap_chars: BODY_CAP_CHARS,
        }
    }
}
