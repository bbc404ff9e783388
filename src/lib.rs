pub mod config;
pub mod data;
pub mod engine;
pub mod export;

pub use config::RecorderConfig;
pub use data::{
    CapturedEvent, CausationDirection, CorrelatedRequest, Database, EditTrail, ElementInfo,
    EventKind, EventPayload, FrameworkContext, MemoryStore, NetworkRequest, RawEvent, RequestKind,
    RequestUpdate, ScrubConfig, Session, SessionMeta, SessionSnapshot, SessionState, SessionStore,
    SqliteSessionStore, StoreError,
};
pub use engine::capture::{CaptureError, ImagePayload, ScreenshotCapturer};
pub use engine::clock::{Clock, ManualClock, SystemClock};
pub use engine::recorder::{LastEventInfo, Recorder, RecorderStatus};
pub use engine::screenshots::{Screenshot, ScreenshotRegistry};
pub use export::{ArchiveExport, ExportError, MarkdownExport};
