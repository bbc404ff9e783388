//! Data model for recorded sessions, captured events and intercepted requests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DEFAULT_SESSION_NAME;

/// Headers kept on an attached request. Everything else is dropped at
/// ingestion time; the snapshot scrubber additionally redacts token values.
pub const HEADER_ALLOWLIST: &[&str] = &[
    "content-type",
    "accept",
    "x-csrf-token",
    "x-requested-with",
    "odata-version",
    "sap-client",
];

/// Path extensions treated as static assets by the relevance predicate.
const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".map", ".html",
];

/// Recording lifecycle state. `idle` is implicit: no session object exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Recording,
    Paused,
    Stopped,
}

/// Free-form descriptive fields attached to a session at start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Display name supplied by the host, if any.
    pub display_name: Option<String>,
    /// URL of the page the recording started on.
    pub origin_url: Option<String>,
    /// Detected application identity (e.g. a framework component id).
    pub app_id: Option<String>,
    /// Page title at recording start.
    pub page_title: Option<String>,
}

/// The unit of recording: one owner's interaction trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier.
    pub id: String,
    /// The monitored browsing context this session is scoped to.
    pub owner: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Display name; starts as metadata-derived or the default, may be
    /// revised once by name inference.
    pub name: String,
    /// Whether the one-shot name-inference rule has fired.
    pub name_inferred: bool,
    /// Descriptive metadata, mutable only while recording.
    pub meta: SessionMeta,
    /// Start timestamp (epoch milliseconds).
    pub started_at: u64,
    /// End timestamp, set on stop.
    pub ended_at: Option<u64>,
    /// Total paused time folded in so far.
    pub paused_total_ms: u64,
    /// Start of the in-progress pause, if paused.
    pub pause_started_at: Option<u64>,
    /// Final active duration, set on stop: `end − start − paused_total`.
    pub duration_ms: Option<u64>,
    /// Captured events in capture order (post-coalescing).
    pub events: Vec<CapturedEvent>,
    /// Attached network requests in attachment order.
    pub requests: Vec<NetworkRequest>,
    /// Next sequential event id.
    pub next_event_seq: u64,
    /// Raw events accepted pre-coalescing; drives the persistence cadence.
    pub raw_event_count: u64,
}

impl Session {
    /// Create a session in `recording` state for `owner`.
    pub fn new(owner: impl Into<String>, meta: SessionMeta, now_ms: u64) -> Self {
        let name = meta
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            state: SessionState::Recording,
            name,
            name_inferred: false,
            meta,
            started_at: now_ms,
            ended_at: None,
            paused_total_ms: 0,
            pause_started_at: None,
            duration_ms: None,
            events: Vec::new(),
            requests: Vec::new(),
            next_event_seq: 0,
            raw_event_count: 0,
        }
    }

    /// Whether the display name is still the generated default.
    pub fn has_default_name(&self) -> bool {
        self.name == DEFAULT_SESSION_NAME
    }

    /// Allocate the next zero-padded sequential event id.
    pub fn next_event_id(&mut self) -> String {
        self.next_event_seq += 1;
        format!("{:04}", self.next_event_seq)
    }

    /// Active recording time as of `now_ms`, excluding completed pauses and
    /// any pause currently in progress.
    pub fn effective_duration(&self, now_ms: u64) -> u64 {
        let end = self.ended_at.unwrap_or(now_ms);
        let elapsed = end.saturating_sub(self.started_at);
        let active_pause = self
            .pause_started_at
            .map(|p| now_ms.saturating_sub(p))
            .unwrap_or(0);
        elapsed
            .saturating_sub(self.paused_total_ms)
            .saturating_sub(active_pause)
    }

    /// Transition `recording → paused`. Caller checks the precondition.
    pub fn begin_pause(&mut self, now_ms: u64) {
        self.state = SessionState::Paused;
        self.pause_started_at = Some(now_ms);
    }

    /// Transition `paused → recording`, folding the pause interval in.
    pub fn end_pause(&mut self, now_ms: u64) {
        if let Some(start) = self.pause_started_at.take() {
            self.paused_total_ms += now_ms.saturating_sub(start);
        }
        self.state = SessionState::Recording;
    }

    /// Transition to `stopped`, folding any in-progress pause first.
    pub fn finalize(&mut self, now_ms: u64) {
        if let Some(start) = self.pause_started_at.take() {
            self.paused_total_ms += now_ms.saturating_sub(start);
        }
        self.ended_at = Some(now_ms);
        self.duration_ms = Some(
            now_ms
                .saturating_sub(self.started_at)
                .saturating_sub(self.paused_total_ms),
        );
        self.state = SessionState::Stopped;
    }
}

/// Kind of a captured interaction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Click,
    Input,
    EditStart,
    EditEnd,
    Submit,
    Keyboard,
    Drag,
    FileUpload,
    PageUnload,
}

impl EventKind {
    /// Kinds that trigger a screenshot capture. Raw per-keystroke `input`
    /// is excluded; the surrounding edit markers cover it.
    pub fn wants_screenshot(self) -> bool {
        matches!(
            self,
            EventKind::Click
                | EventKind::EditStart
                | EventKind::EditEnd
                | EventKind::Submit
                | EventKind::Keyboard
                | EventKind::FileUpload
        )
    }

    /// Lowercase wire/display label.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::Input => "input",
            EventKind::EditStart => "edit_start",
            EventKind::EditEnd => "edit_end",
            EventKind::Submit => "submit",
            EventKind::Keyboard => "keyboard",
            EventKind::Drag => "drag",
            EventKind::FileUpload => "file_upload",
            EventKind::PageUnload => "page_unload",
        }
    }
}

/// Opaque descriptor of the DOM element an event targeted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementInfo {
    /// Lowercase tag name.
    pub tag: Option<String>,
    /// DOM id attribute.
    pub id: Option<String>,
    /// Class list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    /// Visible text, trimmed by the producer.
    pub text: Option<String>,
    /// Stable structural path used as element identity for coalescing.
    pub path: Option<String>,
}

impl ElementInfo {
    /// Identity used by the coalescer. Two events target the same field
    /// only when both identities resolve and are equal.
    pub fn identity(&self) -> Option<&str> {
        self.path.as_deref().or(self.id.as_deref())
    }

    /// Button heuristics: `<button>` tags or button-ish class names.
    pub fn is_button_like(&self) -> bool {
        if self
            .tag
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("button"))
        {
            return true;
        }
        self.classes
            .iter()
            .any(|c| c.to_ascii_lowercase().contains("btn") || c.contains("Button"))
    }

    /// Anchor/link heuristics.
    pub fn is_anchor(&self) -> bool {
        if self.tag.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("a")) {
            return true;
        }
        self.classes
            .iter()
            .any(|c| c.to_ascii_lowercase().contains("link"))
    }

    /// Filter-control heuristics (filter bars, facet filters).
    pub fn is_filter_control(&self) -> bool {
        let hit = |s: &str| s.to_ascii_lowercase().contains("filter");
        self.id.as_deref().is_some_and(hit) || self.classes.iter().any(|c| hit(c))
    }

    /// Whether the element signals an "assign" action.
    pub fn signals_assign(&self) -> bool {
        let hit = |s: &str| s.to_ascii_lowercase().contains("assign");
        self.text.as_deref().is_some_and(hit) || self.id.as_deref().is_some_and(hit)
    }

    /// Whether the visible text contains `needle` (case-sensitive).
    pub fn text_contains(&self, needle: &str) -> bool {
        self.text.as_deref().is_some_and(|t| t.contains(needle))
    }
}

/// Opaque descriptor of the UI-framework context an event occurred in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkContext {
    /// Framework control type (e.g. `sap.m.Button`).
    pub control_type: Option<String>,
    /// Framework control id.
    pub control_id: Option<String>,
    /// Detected application component id.
    pub app_id: Option<String>,
    /// View the control belongs to.
    pub view_name: Option<String>,
}

/// Kind-specific event payload. Unused fields stay `None`/empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    /// Pointer x coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    /// Pointer y coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    /// Current field value (the displayed value after coalescing).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Key pressed, for keyboard events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Uploaded file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// URL carried by navigation-ish events (anchor href, unload target).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Coalescing trail of a merged edit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditTrail {
    /// Number of raw inputs folded into this event.
    pub edit_count: u32,
    /// Field value at first capture; never overwritten.
    pub initial_value: String,
    /// Field value after the latest merge.
    pub final_value: String,
    /// Every observed value, in order, starting with the initial one.
    pub intermediate_values: Vec<String>,
    /// True if any intermediate value is shorter than its predecessor.
    pub had_backspace: bool,
    /// True if any merge gap exceeded the pause threshold.
    pub had_pause: bool,
    /// Timestamp of the latest merged input.
    pub ended_at: u64,
    /// `ended_at − event timestamp`.
    pub duration_ms: u64,
}

/// Which side of the event a correlated request fell on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CausationDirection {
    /// Request started at or after the event.
    AfterClick,
    /// Request started before the event.
    BeforeClick,
}

/// One confidence-scored causal link from an event to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedRequest {
    /// Id of the linked request.
    pub request_id: String,
    /// Heuristic confidence, 0–100.
    pub confidence: f64,
    /// `request start − event timestamp` in milliseconds.
    pub delta_ms: i64,
    /// Temporal direction of the link.
    pub direction: CausationDirection,
    /// Name of the causation pattern that boosted the link, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A single captured interaction, post-coalescing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Sequential per-session id, zero-padded. Assigned exactly once.
    pub id: String,
    /// Capture timestamp (epoch milliseconds).
    pub timestamp: u64,
    /// Interaction kind.
    pub kind: EventKind,
    /// Element the interaction targeted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementInfo>,
    /// Framework context, when the producer resolved one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<FrameworkContext>,
    /// Kind-specific payload.
    pub payload: EventPayload,
    /// Attached screenshot identity, set once capture succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_id: Option<String>,
    /// Correlated requests, confidence-descending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlated: Vec<CorrelatedRequest>,
    /// Coalescing trail, present once a second input merged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edits: Option<EditTrail>,
}

impl CapturedEvent {
    /// Build an event from a raw notification, under a freshly assigned id.
    pub fn from_raw(id: String, raw: RawEvent) -> Self {
        Self {
            id,
            timestamp: raw.timestamp,
            kind: raw.kind,
            element: raw.element,
            context: raw.context,
            payload: raw.payload,
            screenshot_id: None,
            correlated: Vec::new(),
            edits: None,
        }
    }

    /// Timestamp of the latest input folded into this event.
    pub fn last_edit_at(&self) -> u64 {
        self.edits.as_ref().map_or(self.timestamp, |t| t.ended_at)
    }
}

/// A raw interaction notification from the event source.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    /// Interaction kind.
    pub kind: EventKind,
    /// Producer-side timestamp (epoch milliseconds).
    pub timestamp: u64,
    /// Element descriptor, best-effort.
    pub element: Option<ElementInfo>,
    /// Framework context, best-effort.
    pub context: Option<FrameworkContext>,
    /// Kind-specific payload.
    pub payload: EventPayload,
}

/// Classified type of an intercepted request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// OData entity/service call.
    OData,
    /// OData `$batch` call.
    ODataBatch,
    /// CSRF/auth token fetch.
    CsrfToken,
    /// POST into an SAP path that is not OData.
    SapPost,
    /// Anything else; displayed by its HTTP method.
    Generic,
}

impl RequestKind {
    /// Classify by url, method and (allow-listed) headers.
    pub fn classify(url: &str, method: &str, headers: &[(String, String)]) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.contains("$batch") {
            return RequestKind::ODataBatch;
        }
        if lower.contains("/odata/")
            || lower.contains("/sap/opu/odata")
            || lower.contains("$metadata")
        {
            return RequestKind::OData;
        }
        let token_fetch = headers.iter().any(|(k, v)| {
            k.eq_ignore_ascii_case("x-csrf-token") && v.eq_ignore_ascii_case("fetch")
        });
        if token_fetch
            || lower.contains("csrf")
            || lower.contains("/token")
            || lower.contains("/oauth")
        {
            return RequestKind::CsrfToken;
        }
        if method.eq_ignore_ascii_case("post") && lower.contains("/sap/") {
            return RequestKind::SapPost;
        }
        RequestKind::Generic
    }

    /// Whether this kind is an OData call (plain or batch).
    pub fn is_odata(self) -> bool {
        matches!(self, RequestKind::OData | RequestKind::ODataBatch)
    }

    /// Lowercase wire/display label.
    pub fn label(self) -> &'static str {
        match self {
            RequestKind::OData => "odata",
            RequestKind::ODataBatch => "odata-batch",
            RequestKind::CsrfToken => "csrf-token",
            RequestKind::SapPost => "sap-post",
            RequestKind::Generic => "generic",
        }
    }
}

/// One intercepted HTTP exchange, attached to a session once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    /// Interceptor-assigned request id, unique within the retention window.
    pub id: String,
    /// Owner key of the session this request belongs to.
    pub owner: String,
    /// Full request URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Classified type.
    pub kind: RequestKind,
    /// Request start (epoch milliseconds). Correlation uses this, never
    /// delivery order.
    pub started_at: u64,
    /// Request end, once known.
    pub ended_at: Option<u64>,
    /// Response status, once known.
    pub status: Option<u16>,
    /// Allow-listed headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    /// Request body, best-effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Response body, best-effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Ids of events this request was correlated to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_events: Vec<String>,
}

impl NetworkRequest {
    /// Duration in milliseconds, once the request has ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| end.saturating_sub(self.started_at))
    }

    /// Relevance predicate: whether this request belongs in a session trace.
    ///
    /// Classified kinds are always relevant; generic traffic only when it is
    /// a data-modifying verb against a non-static-asset path.
    pub fn is_relevant(&self) -> bool {
        if self.kind != RequestKind::Generic {
            return true;
        }
        let modifying = matches!(
            self.method.to_ascii_uppercase().as_str(),
            "POST" | "PUT" | "PATCH" | "DELETE"
        );
        modifying && !is_static_asset(&self.url)
    }
}

/// An incremental notification from the network interception hook.
///
/// Updates for one `request_id` are merged; the request finalizes once a
/// status code or end timestamp arrives.
#[derive(Debug, Clone, Default)]
pub struct RequestUpdate {
    /// Interceptor-assigned request id.
    pub request_id: String,
    /// Owner key the interception attributed this request to.
    pub owner: String,
    /// Request URL.
    pub url: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Request start (epoch milliseconds).
    pub timestamp: Option<u64>,
    /// Raw headers as delivered; filtered against the allow-list on merge.
    pub headers: Option<Vec<(String, String)>>,
    /// Request body.
    pub body: Option<String>,
    /// Response status.
    pub status_code: Option<u16>,
    /// Request end (epoch milliseconds).
    pub end_time: Option<u64>,
    /// Response body.
    pub response_body: Option<String>,
}

impl RequestUpdate {
    /// Whether this update carries completion information.
    pub fn completes(&self) -> bool {
        self.status_code.is_some() || self.end_time.is_some()
    }
}

/// Keep only allow-listed headers, lowercasing names.
pub fn filter_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            HEADER_ALLOWLIST
                .iter()
                .any(|allowed| name.eq_ignore_ascii_case(allowed))
        })
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}

/// Whether a URL path points at a static asset.
pub fn is_static_asset(url: &str) -> bool {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    STATIC_ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Version of the persisted snapshot schema.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// The persisted form of a session: cleaned data plus a schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Snapshot schema version.
    pub schema_version: u32,
    /// The cleaned session.
    pub session: Session,
}
