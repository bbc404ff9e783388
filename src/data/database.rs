//! SQLite database management

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use async_trait::async_trait;

use super::migrations;
use super::store::{SessionStore, StoreError};
use crate::data::models::SessionSnapshot;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create data directory: {0}")]
    CreateDir(std::io::Error),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    /// Path to the database file
    pub path: PathBuf,
}

impl Database {
    /// Open or create a database at the specified path
    pub fn open(path: PathBuf) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DatabaseError::CreateDir)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Run migrations
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Open an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Execute a closure with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn).map_err(DatabaseError::Sqlite)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

/// [`SessionStore`] writing snapshots as JSON rows in the `sessions` table.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let session = &snapshot.session;
        self.db
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO sessions (id, owner, name, started_at, snapshot, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                         owner = excluded.owner,
                         name = excluded.name,
                         started_at = excluded.started_at,
                         snapshot = excluded.snapshot,
                         updated_at = excluded.updated_at",
                    params![
                        session.id,
                        session.owner,
                        session.name,
                        session.started_at as i64,
                        json,
                        chrono::Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        let json: Option<String> = self
            .db
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT snapshot FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        json.map(|j| serde_json::from_str(&j).map_err(StoreError::Serialize))
            .transpose()
    }

    async fn load_all(&self) -> Result<Vec<SessionSnapshot>, StoreError> {
        let rows: Vec<String> = self
            .db
            .with_connection(|conn| {
                let mut stmt =
                    conn.prepare("SELECT snapshot FROM sessions ORDER BY started_at, id")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(rows)
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(StoreError::Serialize))
            .collect()
    }
}
