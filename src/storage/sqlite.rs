//! SQLite Session Store
//!
//! Pooled SQLite persistence for sessions:
//! - Connection pooling via r2d2 for concurrent access
//! - WAL mode for optimal read/write performance
//! - Sessions stored as one row each, JSON blobs for nested structures
//!
//! A pipeline snapshot that fails integrity validation on load is dropped
//! (with a warning) rather than trusted; the session itself still loads.

use std::path::Path;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, params};
use tracing::warn;

use super::SessionStore;
use crate::pipeline::state::PipelineState;
use crate::types::{Result, Session, StudyError};

const SCHEMA: &str = include_str!("schema.sql");

/// Thread-safe session store with connection pooling.
pub struct SqliteSessionStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSessionStore {
    /// Open the store at the specified path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);
        let pool = Pool::builder()
            .build(manager)
            .map_err(|e| StudyError::Persistence(format!("failed to create connection pool: {}", e)))?;

        let store = Self { pool };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory store for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(Self::configure_connection);
        // A single connection keeps every caller on the same in-memory db.
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StudyError::Persistence(format!("failed to create in-memory pool: {}", e)))?;

        let store = Self { pool };
        store.initialize()?;
        Ok(store)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| StudyError::Persistence(format!("failed to acquire connection: {}", e)))
    }

    fn initialize(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Session, Option<String>)> {
        let tags_json: String = row.get("tags")?;
        let settings_json: String = row.get("settings")?;
        let output_json: Option<String> = row.get("output_json")?;
        let fingerprint_json: Option<String> = row.get("input_fingerprint")?;
        let pipeline_json: Option<String> = row.get("pipeline_state")?;

        let session = Session {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            title: row.get("title")?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            input_text: row.get("input_text")?,
            model_used: row.get("model_used")?,
            output_markdown: row.get("output_markdown")?,
            output: output_json.and_then(|j| serde_json::from_str(&j).ok()),
            settings: serde_json::from_str(&settings_json).unwrap_or_default(),
            input_fingerprint: fingerprint_json.and_then(|j| serde_json::from_str(&j).ok()),
            pipeline: None,
        };
        Ok((session, pipeline_json))
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_all_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, title, tags, input_text, model_used, output_markdown, \
             output_json, settings, input_fingerprint, pipeline_state \
             FROM sessions ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], Self::row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            let (mut session, pipeline_json) = row?;
            if let Some(json) = pipeline_json {
                match PipelineState::from_json(&json) {
                    Ok(state) => session.pipeline = Some(state),
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "discarding invalid pipeline snapshot");
                    }
                }
            }
            sessions.push(session);
        }
        Ok(sessions)
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let tags = serde_json::to_string(&session.tags)?;
        let settings = serde_json::to_string(&session.settings)?;
        let output = session
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let fingerprint = session
            .input_fingerprint
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let pipeline = session
            .pipeline
            .as_ref()
            .map(PipelineState::to_json)
            .transpose()?;

        self.conn()?.execute(
            "INSERT OR REPLACE INTO sessions \
             (id, created_at, title, tags, input_text, model_used, output_markdown, \
              output_json, settings, input_fingerprint, pipeline_state) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session.id,
                session.created_at,
                session.title,
                tags,
                session.input_text,
                session.model_used,
                session.output_markdown,
                output,
                settings,
                fingerprint,
                pipeline,
            ],
        )?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fingerprint::compute_digest;
    use crate::pipeline::state::{PipelineEvent, PipelinePhase};

    fn session_with_pipeline() -> Session {
        let mut session = Session::new("Sepsis bundle", "give fluids within 1 h");
        let digest = compute_digest(&session.input_text);
        session.input_fingerprint = Some(digest.clone());
        session.pipeline =
            Some(PipelineState::default().apply(PipelineEvent::RunStarted { digest }));
        session
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_in_memory() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let session = session_with_pipeline();
        store.save_session(&session).await.unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, session.id);
        assert_eq!(all[0].input_text, session.input_text);
        let restored = all[0].pipeline.as_ref().unwrap();
        assert_eq!(restored.status, PipelinePhase::Outlining);
        assert!(restored.raw_input_hash.is_some());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_and_delete() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let mut session = Session::new("v1", "text");
        store.save_session(&session).await.unwrap();
        session.title = "v2".into();
        store.save_session(&session).await.unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "v2");

        store.delete_session(&session.id).await.unwrap();
        assert!(store.get_all_sessions().await.unwrap().is_empty());
        // Deleting again is still fine.
        store.delete_session(&session.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_file_backed_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let session = session_with_pipeline();

        {
            let store = SqliteSessionStore::open(&path).unwrap();
            store.save_session(&session).await.unwrap();
        }

        // Reopen and read back across store instances.
        let store = SqliteSessionStore::open(&path).unwrap();
        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, session.id);
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_discarded_not_fatal() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let session = session_with_pipeline();
        store.save_session(&session).await.unwrap();

        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE sessions SET pipeline_state = '{\"garbage\": true' WHERE id = ?1",
                params![session.id],
            )
            .unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].pipeline.is_none());
    }
}
