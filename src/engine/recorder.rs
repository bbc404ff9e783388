//! The recording state machine.
//!
//! A [`Recorder`] owns the live session table (one session per owner), the
//! transient request pool, and the screenshot registry. All state mutation
//! happens synchronously under one lock; collaborator work (image capture,
//! persistence writes) is spawned onto the runtime and never blocks the next
//! ingestion. Lifecycle operations with unmet preconditions are logged
//! no-ops rather than errors, since delivery order from the surrounding
//! recorder cannot be guaranteed.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

use crate::config::RecorderConfig;
use crate::data::models::{
    filter_headers, CapturedEvent, NetworkRequest, RawEvent, RequestKind, RequestUpdate, Session,
    SessionMeta, SessionState,
};
use crate::data::{ScrubConfig, SessionSnapshot, SessionStore};
use crate::engine::capture::ScreenshotCapturer;
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::coalesce::{merge_into, should_merge};
use crate::engine::correlate::correlate_event;
use crate::engine::screenshots::{screenshot_id, Region, Screenshot, ScreenshotRegistry};
use crate::export::{
    export_filename, render_markdown, ArchiveExport, ArchiveWriter, ExportError, MarkdownExport,
};

/// Live status of an owner, computed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct RecorderStatus {
    /// `idle`, `recording` or `paused`.
    pub state: String,
    /// Id of the live session, if any.
    pub session_id: Option<String>,
    /// Active recording time so far, excluding pauses.
    pub duration_ms: u64,
    /// Coalesced event count.
    pub event_count: usize,
    /// Attached request count.
    pub request_count: usize,
    /// The most recently accepted event.
    pub last_event: Option<LastEventInfo>,
}

/// Summary of the most recent event, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct LastEventInfo {
    pub id: String,
    pub kind: String,
    pub timestamp: u64,
}

struct RecorderInner {
    /// Live sessions keyed by owner.
    live: HashMap<String, Session>,
    /// In-flight requests keyed by request id, merged incrementally.
    pending: HashMap<String, NetworkRequest>,
    screenshots: ScreenshotRegistry,
}

/// Session recording engine.
///
/// Cheap to clone; clones share the same live state. Ingestion methods may
/// spawn capture and persistence tasks, so the recorder must be used from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct Recorder {
    config: Arc<RecorderConfig>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SessionStore>,
    capturer: Option<Arc<dyn ScreenshotCapturer>>,
    scrub: Arc<ScrubConfig>,
    inner: Arc<Mutex<RecorderInner>>,
}

impl Recorder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(store, RecorderConfig::default())
    }

    pub fn with_config(store: Arc<dyn SessionStore>, config: RecorderConfig) -> Self {
        let scrub = ScrubConfig::with_body_cap(config.body_cap_chars);
        let retention = config.screenshot_retention;
        Self {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            store,
            capturer: None,
            scrub: Arc::new(scrub),
            inner: Arc::new(Mutex::new(RecorderInner {
                live: HashMap::new(),
                pending: HashMap::new(),
                screenshots: ScreenshotRegistry::new(retention),
            })),
        }
    }

    /// Attach an image-capture collaborator. Without one, events record
    /// without screenshots.
    pub fn with_capturer(mut self, capturer: Arc<dyn ScreenshotCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }

    /// Override the time source, mainly for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start recording for `owner`. An existing live session for the same
    /// owner is silently replaced, last writer wins.
    pub fn start(&self, owner: &str, meta: SessionMeta) -> String {
        let now = self.clock.now_ms();
        let session = Session::new(owner, meta, now);
        let id = session.id.clone();

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.live.insert(owner.to_string(), session) {
            tracing::info!(owner, previous = %previous.id, "replaced live session");
            inner.screenshots.clear_session(&previous.id);
        }
        tracing::debug!(owner, session = %id, "recording started");
        id
    }

    /// Pause recording. No-op unless the owner is currently `recording`.
    pub fn pause(&self, owner: &str) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.live.get_mut(owner) {
            Some(session) if session.state == SessionState::Recording => {
                session.begin_pause(now);
                tracing::debug!(owner, session = %session.id, "recording paused");
            }
            _ => tracing::debug!(owner, "pause ignored, not recording"),
        }
    }

    /// Resume recording. No-op unless the owner is currently `paused`.
    pub fn resume(&self, owner: &str) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.live.get_mut(owner) {
            Some(session) if session.state == SessionState::Paused => {
                session.end_pause(now);
                tracing::debug!(owner, session = %session.id, "recording resumed");
            }
            _ => tracing::debug!(owner, "resume ignored, not paused"),
        }
    }

    /// Stop recording, persist the final snapshot, and remove the session
    /// from the live set. Returns the stopped session's id, or `None` when
    /// there was nothing to stop (which is success, not an error).
    pub async fn stop(&self, owner: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let snapshot = {
            let mut inner = self.inner.lock();
            let session = inner.live.get_mut(owner)?;
            session.finalize(now);
            tracing::debug!(owner, session = %session.id, "recording stopped");
            self.scrub.clean_snapshot(session)
        };

        // The durable copy becomes the system of record at this boundary,
        // so the final write is awaited rather than fire-and-forget.
        let id = snapshot.session.id.clone();
        if let Err(err) = self.store.save(&snapshot).await {
            tracing::warn!(error = %err, session = %id, "final persistence write failed");
        }

        let mut inner = self.inner.lock();
        // The owner may have been restarted while the write was in flight.
        if inner.live.get(owner).is_some_and(|s| s.id == id) {
            inner.live.remove(owner);
        }
        Some(id)
    }

    /// Ingest one raw interaction event. Dropped (with a log line) unless
    /// the owner has a live session in exactly the `recording` state.
    pub fn ingest_event(&self, owner: &str, raw: RawEvent) {
        let mut capture_request = None;
        let mut persist = None;
        {
            let mut inner = self.inner.lock();
            let Some(session) = inner.live.get_mut(owner) else {
                tracing::debug!(owner, "event dropped, no live session");
                return;
            };
            if session.state != SessionState::Recording {
                tracing::debug!(owner, session = %session.id, state = ?session.state, "event dropped, not recording");
                return;
            }

            session.raw_event_count += 1;

            let merged = match session.events.last_mut() {
                Some(last) if should_merge(last, &raw, &self.config) => {
                    merge_into(last, &raw, &self.config);
                    true
                }
                _ => false,
            };

            if !merged {
                let id = session.next_event_id();
                let mut event = CapturedEvent::from_raw(id, raw);
                event.correlated = correlate_event(&event, &session.requests, &self.config);
                infer_name(session, &event);

                if event.kind.wants_screenshot() && self.capturer.is_some() {
                    capture_request = Some(CaptureRequest {
                        owner: owner.to_string(),
                        session_id: session.id.clone(),
                        event_id: event.id.clone(),
                        element: event.element.clone(),
                        region: match (event.payload.x, event.payload.y) {
                            (Some(x), Some(y)) => Some(Region { x, y }),
                            _ => None,
                        },
                    });
                }

                session.events.push(event);
                sync_matched_events(session);
            }

            if session.raw_event_count % self.config.persist_every_events == 0 {
                persist = Some(self.scrub.clean_snapshot(session));
            }
        }

        if let Some(request) = capture_request {
            self.spawn_capture(request);
        }
        if let Some(snapshot) = persist {
            self.spawn_persist(snapshot);
        }
    }

    /// Ingest an incremental network-request notification. Requests merge
    /// in the transient pool until completed; completed relevant requests
    /// attach to the owner's live session regardless of pause state.
    pub fn ingest_request(&self, update: RequestUpdate) {
        let now = self.clock.now_ms();
        let mut persist = None;
        {
            let mut inner = self.inner.lock();
            prune_pool(&mut inner.pending, now, self.config.request_pool_retention_ms);

            let entry = inner
                .pending
                .entry(update.request_id.clone())
                .or_insert_with(|| NetworkRequest {
                    id: update.request_id.clone(),
                    owner: update.owner.clone(),
                    url: String::new(),
                    method: String::new(),
                    kind: RequestKind::Generic,
                    started_at: update.timestamp.unwrap_or(now),
                    ended_at: None,
                    status: None,
                    headers: Vec::new(),
                    body: None,
                    response_body: None,
                    matched_events: Vec::new(),
                });

            if let Some(url) = update.url {
                entry.url = url;
            }
            if let Some(method) = update.method {
                entry.method = method;
            }
            if let Some(timestamp) = update.timestamp {
                entry.started_at = timestamp;
            }
            if let Some(headers) = update.headers {
                entry.headers = filter_headers(&headers);
            }
            if let Some(body) = update.body {
                entry.body = Some(body);
            }
            if let Some(body) = update.response_body {
                entry.response_body = Some(body);
            }
            if let Some(status) = update.status_code {
                entry.status = Some(status);
            }
            if let Some(end) = update.end_time {
                entry.ended_at = Some(end);
            }
            entry.kind = RequestKind::classify(&entry.url, &entry.method, &entry.headers);

            if entry.status.is_none() && entry.ended_at.is_none() {
                return;
            }
            let Some(request) = inner.pending.remove(&update.request_id) else {
                return;
            };

            if !request.is_relevant() {
                tracing::debug!(request = %request.id, url = %request.url, "request ignored, not relevant");
                return;
            }
            let Some(session) = inner.live.get_mut(&request.owner) else {
                tracing::debug!(request = %request.id, owner = %request.owner, "request dropped, no live session");
                return;
            };

            tracing::debug!(
                request = %request.id,
                session = %session.id,
                kind = request.kind.label(),
                "request attached"
            );
            let request_ts = request.started_at;
            session.requests.push(request);
            recorrelate_window(session, request_ts, &self.config);

            if session.requests.len() as u64 % self.config.persist_every_requests == 0 {
                persist = Some(self.scrub.clean_snapshot(session));
            }
        }

        if let Some(snapshot) = persist {
            self.spawn_persist(snapshot);
        }
    }

    /// Live status for an owner. Owners without a live session are `idle`.
    pub fn state(&self, owner: &str) -> RecorderStatus {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        match inner.live.get(owner) {
            Some(session) => RecorderStatus {
                state: match session.state {
                    SessionState::Recording => "recording",
                    SessionState::Paused => "paused",
                    SessionState::Stopped => "stopped",
                }
                .to_string(),
                session_id: Some(session.id.clone()),
                duration_ms: session.effective_duration(now),
                event_count: session.events.len(),
                request_count: session.requests.len(),
                last_event: session.events.last().map(|event| LastEventInfo {
                    id: event.id.clone(),
                    kind: event.kind.label().to_string(),
                    timestamp: event.timestamp,
                }),
            },
            None => RecorderStatus {
                state: "idle".to_string(),
                session_id: None,
                duration_ms: 0,
                event_count: 0,
                request_count: 0,
                last_event: None,
            },
        }
    }

    /// Render the Markdown report for a session, live or persisted.
    pub async fn export_markdown(&self, session_id: &str) -> Result<MarkdownExport, ExportError> {
        let session = self.resolve_session(session_id).await?;
        let markdown = render_markdown(&session);
        Ok(MarkdownExport {
            filename: export_filename(&session, "session-trace", "md"),
            markdown,
        })
    }

    /// Build the archive container for a session: the Markdown report, the
    /// JSON snapshot, and every retained screenshot.
    pub async fn export_archive(&self, session_id: &str) -> Result<ArchiveExport, ExportError> {
        let session = self.resolve_session(session_id).await?;
        let images: Vec<Screenshot> = {
            let inner = self.inner.lock();
            inner.screenshots.images_for(&session.id).to_vec()
        };

        let snapshot = SessionSnapshot {
            schema_version: crate::data::SNAPSHOT_SCHEMA_VERSION,
            session: session.clone(),
        };
        let snapshot_json =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| ExportError::Encode(e.to_string()))?;

        let mut writer = ArchiveWriter::new(session.started_at);
        writer.add_file("report.md", render_markdown(&session).as_bytes());
        writer.add_file("session.json", &snapshot_json);
        for image in &images {
            writer.add_file(&format!("images/{}.png", image.id), &image.bytes);
        }

        Ok(ArchiveExport {
            filename: export_filename(&session, "session-archive", "zip"),
            bytes: writer.finish(),
        })
    }

    /// Retained screenshot count for a session, mainly for status surfaces.
    pub fn screenshot_count(&self, session_id: &str) -> usize {
        self.inner.lock().screenshots.count_for(session_id)
    }

    async fn resolve_session(&self, session_id: &str) -> Result<Session, ExportError> {
        let live = {
            let inner = self.inner.lock();
            inner
                .live
                .values()
                .find(|s| s.id == session_id)
                .map(|s| self.scrub.clean_snapshot(s).session)
        };
        if let Some(session) = live {
            return Ok(session);
        }
        self.store
            .load(session_id)
            .await?
            .map(|snapshot| snapshot.session)
            .ok_or_else(|| ExportError::SessionNotFound(session_id.to_string()))
    }

    fn spawn_capture(&self, request: CaptureRequest) {
        let Some(capturer) = self.capturer.clone() else {
            return;
        };
        let recorder = self.clone();
        tokio::spawn(async move {
            let payload = capturer
                .capture(&request.owner, request.element.as_ref())
                .await;
            match payload.and_then(|p| p.into_bytes()) {
                Ok((bytes, media_type)) => {
                    recorder.attach_screenshot(&request, bytes, media_type);
                }
                Err(err) => {
                    tracing::warn!(error = %err, event = %request.event_id, "screenshot capture failed");
                }
            }
        });
    }

    fn attach_screenshot(&self, request: &CaptureRequest, bytes: Vec<u8>, media_type: String) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        // The session may have stopped or been replaced while the capture
        // was in flight; drop the image rather than mutate a stale trace.
        let Some(session) = inner
            .live
            .get_mut(&request.owner)
            .filter(|s| s.id == request.session_id)
        else {
            tracing::debug!(event = %request.event_id, "session gone, discarding capture");
            return;
        };
        let Some(index) = session.events.iter().position(|e| e.id == request.event_id) else {
            tracing::debug!(event = %request.event_id, "event gone, discarding capture");
            return;
        };

        let id = screenshot_id(session, &session.events[index]);
        let event = &mut session.events[index];
        event.screenshot_id = Some(id.clone());
        let shot = Screenshot {
            id,
            bytes,
            media_type,
            captured_at: now,
            event_id: request.event_id.clone(),
            event_kind: event.kind,
            region: request.region,
        };
        let session_id = request.session_id.clone();
        inner.screenshots.insert(&session_id, shot);
    }

    fn spawn_persist(&self, snapshot: SessionSnapshot) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.save(&snapshot).await {
                tracing::warn!(error = %err, session = %snapshot.session.id, "persistence write failed");
            }
        });
    }
}

struct CaptureRequest {
    owner: String,
    session_id: String,
    event_id: String,
    element: Option<crate::data::models::ElementInfo>,
    region: Option<Region>,
}

/// Drop pool entries whose start is older than the retention window.
fn prune_pool(pending: &mut HashMap<String, NetworkRequest>, now: u64, retention_ms: u64) {
    pending.retain(|_, request| now.saturating_sub(request.started_at) <= retention_ms);
}

/// Re-rank every event within the correlation window of `request_ts`.
///
/// Attachment order is delivery order, which the trace must be insensitive
/// to; correlation always reads the request's own timestamp.
fn recorrelate_window(session: &mut Session, request_ts: u64, config: &RecorderConfig) {
    let window = config.correlation_window_ms;
    let candidates = session.requests.clone();
    for event in &mut session.events {
        if event.timestamp.abs_diff(request_ts) <= window {
            event.correlated = correlate_event(event, &candidates, config);
        }
    }
    sync_matched_events(session);
}

/// Rebuild every request's matched-event list from the event links.
fn sync_matched_events(session: &mut Session) {
    for request in &mut session.requests {
        request.matched_events.clear();
    }
    let links: Vec<(String, String)> = session
        .events
        .iter()
        .flat_map(|event| {
            event
                .correlated
                .iter()
                .map(move |link| (link.request_id.clone(), event.id.clone()))
        })
        .collect();
    for (request_id, event_id) in links {
        if let Some(request) = session.requests.iter_mut().find(|r| r.id == request_id) {
            request.matched_events.push(event_id);
        }
    }
}

/// One-shot display-name inference. Fires on the first event that yields a
/// meaningful name, and only while the name is still the generated default.
fn infer_name(session: &mut Session, event: &CapturedEvent) {
    if session.name_inferred || !session.has_default_name() {
        return;
    }

    let inferred = event
        .context
        .as_ref()
        .and_then(|c| c.app_id.as_deref())
        .map(humanize_app_id)
        .or_else(|| {
            event
                .payload
                .url
                .as_deref()
                .or(session.meta.origin_url.as_deref())
                .and_then(hash_route_name)
        })
        .or_else(|| {
            session
                .meta
                .page_title
                .as_ref()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        });

    if let Some(name) = inferred {
        tracing::debug!(session = %session.id, name = %name, "display name inferred");
        session.name = name;
        session.name_inferred = true;
    }
}

fn humanize_app_id(app_id: &str) -> String {
    app_id.replace(['.', '_', '-'], " ").trim().to_string()
}

/// Extract `Object action` from a `#Object-action` hash route.
fn hash_route_name(url: &str) -> Option<String> {
    static ROUTE: OnceLock<Regex> = OnceLock::new();
    let route = ROUTE.get_or_init(|| {
        Regex::new(r"#([A-Za-z][A-Za-z0-9]*)-([A-Za-z][A-Za-z0-9]*)").expect("valid route pattern")
    });
    let captures = route.captures(url)?;
    Some(format!("{} {}", &captures[1], &captures[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{ElementInfo, EventKind, EventPayload, FrameworkContext};
    use crate::data::MemoryStore;
    use crate::engine::capture::{CaptureError, ImagePayload};
    use crate::engine::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticCapturer {
        calls: AtomicUsize,
    }

    impl StaticCapturer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScreenshotCapturer for StaticCapturer {
        async fn capture(
            &self,
            _owner: &str,
            _element: Option<&ElementInfo>,
        ) -> Result<ImagePayload, CaptureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ImagePayload::Bytes {
                bytes: b"PNG!".to_vec(),
                media_type: "image/png".to_string(),
            })
        }
    }

    struct FailingCapturer;

    #[async_trait]
    impl ScreenshotCapturer for FailingCapturer {
        async fn capture(
            &self,
            _owner: &str,
            _element: Option<&ElementInfo>,
        ) -> Result<ImagePayload, CaptureError> {
            Err(CaptureError::Unavailable("no tab".to_string()))
        }
    }

    fn recorder(clock: Arc<ManualClock>) -> (Recorder, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new(store.clone()).with_clock(clock);
        (recorder, store)
    }

    fn click(ts: u64) -> RawEvent {
        RawEvent {
            kind: EventKind::Click,
            timestamp: ts,
            element: Some(ElementInfo {
                tag: Some("button".to_string()),
                text: Some("Save".to_string()),
                ..Default::default()
            }),
            context: None,
            payload: EventPayload::default(),
        }
    }

    fn typed(value: &str, ts: u64) -> RawEvent {
        RawEvent {
            kind: EventKind::Input,
            timestamp: ts,
            element: Some(ElementInfo {
                tag: Some("input".to_string()),
                path: Some("/form/name".to_string()),
                ..Default::default()
            }),
            context: None,
            payload: EventPayload {
                value: Some(value.to_string()),
                ..Default::default()
            },
        }
    }

    fn completed_odata(id: &str, owner: &str, ts: u64) -> RequestUpdate {
        RequestUpdate {
            request_id: id.to_string(),
            owner: owner.to_string(),
            url: Some("https://host/sap/opu/odata/SRV/Suppliers".to_string()),
            method: Some("GET".to_string()),
            timestamp: Some(ts),
            status_code: Some(200),
            end_time: Some(ts + 100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pause_resume_timing_is_exact() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start("tab-1", SessionMeta::default());

        clock.advance(2_000);
        recorder.pause("tab-1");
        clock.advance(5_000);
        recorder.resume("tab-1");
        clock.advance(1_000);
        recorder.pause("tab-1");
        clock.advance(500);
        // stop() folds the in-progress pause before finalizing.
        recorder.stop("tab-1").await.unwrap();

        assert_eq!(recorder.state("tab-1").state, "idle");
    }

    #[tokio::test]
    async fn stop_persists_exact_duration() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (recorder, store) = recorder(clock.clone());
        let id = recorder.start("tab-1", SessionMeta::default());

        clock.advance(2_000);
        recorder.pause("tab-1");
        clock.advance(3_000);
        recorder.resume("tab-1");
        clock.advance(4_000);
        recorder.stop("tab-1").await.unwrap();

        let snapshot = store.load(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.session.duration_ms, Some(6_000));
        assert_eq!(snapshot.session.paused_total_ms, 3_000);
        assert_eq!(snapshot.session.state, SessionState::Stopped);
    }

    #[tokio::test]
    async fn invalid_transitions_are_no_ops() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());

        // No live session: all of these are absorbed.
        recorder.pause("tab-1");
        recorder.resume("tab-1");
        assert!(recorder.stop("tab-1").await.is_none());

        recorder.start("tab-1", SessionMeta::default());
        recorder.resume("tab-1"); // not paused
        assert_eq!(recorder.state("tab-1").state, "recording");
        recorder.pause("tab-1");
        recorder.pause("tab-1"); // already paused
        assert_eq!(recorder.state("tab-1").state, "paused");
    }

    #[tokio::test]
    async fn start_replaces_existing_session() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());
        let first = recorder.start("tab-1", SessionMeta::default());
        let second = recorder.start("tab-1", SessionMeta::default());
        assert_ne!(first, second);
        assert_eq!(recorder.state("tab-1").session_id, Some(second));
    }

    #[tokio::test]
    async fn events_drop_while_paused_but_requests_attach() {
        let clock = Arc::new(ManualClock::new(10_000));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start("tab-1", SessionMeta::default());
        recorder.pause("tab-1");

        recorder.ingest_event("tab-1", click(10_100));
        recorder.ingest_request(completed_odata("r1", "tab-1", 10_200));

        let status = recorder.state("tab-1");
        assert_eq!(status.event_count, 0);
        assert_eq!(status.request_count, 1);
    }

    #[tokio::test]
    async fn events_drop_without_live_session() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());
        recorder.ingest_event("tab-1", click(100));
        recorder.ingest_request(completed_odata("r1", "tab-1", 100));
        assert_eq!(recorder.state("tab-1").state, "idle");
    }

    #[tokio::test]
    async fn input_bursts_coalesce_through_the_engine() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (recorder, store) = recorder(clock.clone());
        let id = recorder.start("tab-1", SessionMeta::default());

        recorder.ingest_event("tab-1", typed("A", 1_000));
        recorder.ingest_event("tab-1", typed("AB", 1_300));
        recorder.ingest_event("tab-1", typed("ABC", 1_600));
        // Gap beyond the window starts a new event.
        recorder.ingest_event("tab-1", typed("ABCD", 3_500));

        let status = recorder.state("tab-1");
        assert_eq!(status.event_count, 2);

        clock.set(5_000);
        recorder.stop("tab-1").await.unwrap();
        let snapshot = store.load(&id).await.unwrap().unwrap();
        let first = &snapshot.session.events[0];
        assert_eq!(first.id, "0001");
        let trail = first.edits.as_ref().unwrap();
        assert_eq!(trail.edit_count, 3);
        assert_eq!(trail.initial_value, "A");
        assert_eq!(trail.final_value, "ABC");
        assert_eq!(snapshot.session.events[1].id, "0002");
    }

    #[tokio::test]
    async fn late_request_correlates_against_earlier_event() {
        let clock = Arc::new(ManualClock::new(20_000));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start("tab-1", SessionMeta::default());

        recorder.ingest_event("tab-1", click(20_000));
        // Request completes (and is delivered) after the event it explains.
        recorder.ingest_request(completed_odata("r1", "tab-1", 20_800));

        let inner = recorder.inner.lock();
        let session = inner.live.get("tab-1").unwrap();
        let event = &session.events[0];
        assert_eq!(event.correlated.len(), 1);
        assert_eq!(event.correlated[0].request_id, "r1");
        assert_eq!(event.correlated[0].confidence, 95.0);
        assert_eq!(session.requests[0].matched_events, vec!["0001".to_string()]);
    }

    #[tokio::test]
    async fn incremental_updates_merge_before_attachment() {
        let clock = Arc::new(ManualClock::new(10_000));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start("tab-1", SessionMeta::default());

        recorder.ingest_request(RequestUpdate {
            request_id: "r1".to_string(),
            owner: "tab-1".to_string(),
            url: Some("https://host/sap/opu/odata/SRV/Suppliers".to_string()),
            method: Some("POST".to_string()),
            timestamp: Some(10_100),
            body: Some("{\"name\":\"ACME\"}".to_string()),
            ..Default::default()
        });
        // Not yet completed, so nothing attaches.
        assert_eq!(recorder.state("tab-1").request_count, 0);

        recorder.ingest_request(RequestUpdate {
            request_id: "r1".to_string(),
            owner: "tab-1".to_string(),
            status_code: Some(201),
            end_time: Some(10_400),
            ..Default::default()
        });
        let status = recorder.state("tab-1");
        assert_eq!(status.request_count, 1);

        let inner = recorder.inner.lock();
        let request = &inner.live.get("tab-1").unwrap().requests[0];
        assert_eq!(request.kind, RequestKind::OData);
        assert_eq!(request.body.as_deref(), Some("{\"name\":\"ACME\"}"));
        assert_eq!(request.duration_ms(), Some(300));
    }

    #[tokio::test]
    async fn irrelevant_requests_never_attach() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start("tab-1", SessionMeta::default());

        recorder.ingest_request(RequestUpdate {
            request_id: "r1".to_string(),
            owner: "tab-1".to_string(),
            url: Some("https://host/resources/library.js".to_string()),
            method: Some("GET".to_string()),
            timestamp: Some(100),
            status_code: Some(200),
            ..Default::default()
        });
        assert_eq!(recorder.state("tab-1").request_count, 0);
    }

    #[tokio::test]
    async fn screenshots_attach_to_qualifying_events() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new());
        let capturer = Arc::new(StaticCapturer::new());
        let recorder = Recorder::new(store)
            .with_clock(clock.clone())
            .with_capturer(capturer.clone());

        let id = recorder.start("tab-1", SessionMeta::default());
        recorder.ingest_event("tab-1", click(1_000));
        // Raw input events never trigger captures.
        recorder.ingest_event("tab-1", typed("A", 1_100));

        // Give the capture task a moment to land.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(capturer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.screenshot_count(&id), 1);
        let inner = recorder.inner.lock();
        let event = &inner.live.get("tab-1").unwrap().events[0];
        assert_eq!(event.screenshot_id.as_deref(), Some("0001-click-button-save"));
    }

    #[tokio::test]
    async fn capture_failure_leaves_event_without_screenshot() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new(store)
            .with_clock(clock.clone())
            .with_capturer(Arc::new(FailingCapturer));

        recorder.start("tab-1", SessionMeta::default());
        recorder.ingest_event("tab-1", click(1_000));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let inner = recorder.inner.lock();
        let event = &inner.live.get("tab-1").unwrap().events[0];
        assert!(event.screenshot_id.is_none());
    }

    #[tokio::test]
    async fn periodic_persistence_fires_on_cadence() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (recorder, store) = recorder(clock.clone());
        let id = recorder.start("tab-1", SessionMeta::default());

        // Distinct elements so nothing coalesces; the 10th raw event
        // triggers a snapshot write.
        for i in 0..10u64 {
            let mut raw = click(1_000 + i * 2_000);
            raw.element.as_mut().unwrap().id = Some(format!("btn-{i}"));
            recorder.ingest_event("tab-1", raw);
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let snapshot = store.load(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.session.events.len(), 10);
        assert_eq!(snapshot.session.state, SessionState::Recording);
    }

    #[tokio::test]
    async fn name_inference_fires_once() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start("tab-1", SessionMeta::default());

        let mut raw = click(100);
        raw.context = Some(FrameworkContext {
            app_id: Some("supplier.manage".to_string()),
            ..Default::default()
        });
        recorder.ingest_event("tab-1", raw);

        let mut later = click(200);
        later.element.as_mut().unwrap().id = Some("other".to_string());
        later.context = Some(FrameworkContext {
            app_id: Some("order.create".to_string()),
            ..Default::default()
        });
        recorder.ingest_event("tab-1", later);

        let inner = recorder.inner.lock();
        let session = inner.live.get("tab-1").unwrap();
        assert_eq!(session.name, "supplier manage");
        assert!(session.name_inferred);
    }

    #[tokio::test]
    async fn name_inference_respects_host_supplied_name() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());
        recorder.start(
            "tab-1",
            SessionMeta {
                display_name: Some("Audit run".to_string()),
                ..Default::default()
            },
        );

        let mut raw = click(100);
        raw.context = Some(FrameworkContext {
            app_id: Some("supplier.manage".to_string()),
            ..Default::default()
        });
        recorder.ingest_event("tab-1", raw);

        let inner = recorder.inner.lock();
        assert_eq!(inner.live.get("tab-1").unwrap().name, "Audit run");
    }

    #[test]
    fn hash_route_extraction() {
        assert_eq!(
            hash_route_name("https://host/launchpad#Supplier-manage?x=1"),
            Some("Supplier manage".to_string())
        );
        assert_eq!(hash_route_name("https://host/launchpad"), None);
    }

    #[tokio::test]
    async fn export_of_unknown_session_reports_not_found() {
        let clock = Arc::new(ManualClock::new(0));
        let (recorder, _store) = recorder(clock.clone());
        let err = recorder.export_markdown("nope").await.unwrap_err();
        assert!(matches!(err, ExportError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn stopped_session_exports_from_the_store() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (recorder, _store) = recorder(clock.clone());
        let id = recorder.start("tab-1", SessionMeta::default());
        recorder.ingest_event("tab-1", click(1_100));
        clock.advance(2_000);
        recorder.stop("tab-1").await.unwrap();

        let export = recorder.export_markdown(&id).await.unwrap();
        assert!(export.markdown.contains(&id));
        assert!(export.filename.ends_with(".md"));
    }
}
