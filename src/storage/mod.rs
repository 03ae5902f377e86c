//! Session Persistence
//!
//! The `SessionStore` trait is the persistence collaborator of the
//! pipeline: upsert-by-id semantics over plain serializable sessions. The
//! persisted layout *is* the `PipelineState` structure embedded inside a
//! `Session` - no functions, no live references.
//!
//! Two implementations ship with the crate:
//!
//! - `MemoryStore`: process-local, for tests and embedding
//! - `SqliteSessionStore`: pooled SQLite persistence

pub mod sqlite;

pub use sqlite::SqliteSessionStore;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::{Result, Session};

/// Shared session store for the pipeline runner.
pub type SharedStore = Arc<dyn SessionStore>;

/// Persistence collaborator.
///
/// `save_session` is an upsert by id; a snapshot is written after every
/// pipeline transition, so implementations should expect frequent
/// small-delta writes of the same row.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All sessions, newest first.
    async fn get_all_sessions(&self) -> Result<Vec<Session>>;

    /// Insert or replace one session by id.
    async fn save_session(&self, session: &Session) -> Result<()>;

    /// Remove one session by id. Deleting an unknown id is not an error.
    async fn delete_session(&self, id: &str) -> Result<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Process-local session store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_all_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let session = Session::new("Pharmacology", "text");
        store.save_session(&session).await.unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, session.id);

        store.delete_session(&session.id).await.unwrap();
        assert!(store.get_all_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_upserts_by_id() {
        let store = MemoryStore::new();
        let mut session = Session::new("First title", "text");
        store.save_session(&session).await.unwrap();

        session.title = "Second title".into();
        store.save_session(&session).await.unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Second title");
    }

    #[tokio::test]
    async fn test_memory_store_newest_first() {
        let store = MemoryStore::new();
        let mut older = Session::new("older", "a");
        older.created_at = "2024-01-01T00:00:00Z".into();
        let mut newer = Session::new("newer", "b");
        newer.created_at = "2025-01-01T00:00:00Z".into();
        store.save_session(&older).await.unwrap();
        store.save_session(&newer).await.unwrap();

        let all = store.get_all_sessions().await.unwrap();
        assert_eq!(all[0].title, "newer");
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_ok() {
        let store = MemoryStore::new();
        store.delete_session("no-such-id").await.unwrap();
    }
}
