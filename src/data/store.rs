//! Durable session storage.
//!
//! The recorder persists [`SessionSnapshot`]s through this trait; once a
//! session is stopped the store holds the system of record. Two
//! implementations ship with the crate: [`MemoryStore`] for tests and
//! embedders that bring their own persistence, and the SQLite-backed store
//! in [`crate::data::database`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::data::models::SessionSnapshot;

/// Error from a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),
    #[error("snapshot not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Flat id → snapshot persistence the recorder writes through.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a snapshot under its session id, replacing any previous copy.
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;

    /// Retrieve one persisted snapshot.
    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError>;

    /// Retrieve every persisted snapshot.
    async fn load_all(&self) -> Result<Vec<SessionSnapshot>, StoreError>;
}

/// In-memory store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .lock()
            .insert(snapshot.session.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(self.snapshots.lock().get(session_id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<SessionSnapshot>, StoreError> {
        let mut all: Vec<SessionSnapshot> = self.snapshots.lock().values().cloned().collect();
        all.sort_by_key(|s| s.session.started_at);
        Ok(all)
    }
}
