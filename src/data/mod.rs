//! Data model and persistence layer.
//!
//! Session/event/request shapes, the snapshot scrubber, and the durable
//! store implementations (in-memory and SQLite).

mod database;
mod migrations;
pub mod models;
mod scrub;
mod store;

pub use database::{Database, DatabaseError, SqliteSessionStore};
pub use models::{
    CapturedEvent, CausationDirection, CorrelatedRequest, EditTrail, ElementInfo, EventKind,
    EventPayload, FrameworkContext, NetworkRequest, RawEvent, RequestKind, RequestUpdate, Session,
    SessionMeta, SessionSnapshot, SessionState, SNAPSHOT_SCHEMA_VERSION,
};
pub use scrub::ScrubConfig;
pub use store::{MemoryStore, SessionStore, StoreError};
