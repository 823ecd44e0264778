//! Checkpoint storage abstraction
//!
//! The graph only talks to a [`CheckpointStore`]; production uses the SQLite
//! adapter, tests use the in-memory store from `graph::testing`.

use super::{ConversationState, StateUpdate, ThreadId};
use crate::db::{Checkpoint, Database};
use async_trait::async_trait;
use std::sync::Arc;

/// Per-thread state snapshots
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest state of a thread, `None` if the thread was never written
    async fn get(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, String>;

    /// Merge an update into the latest state and persist the result as a new
    /// snapshot. Returns the merged state.
    async fn put(
        &self,
        thread_id: &ThreadId,
        update: &StateUpdate,
    ) -> Result<ConversationState, String>;

    /// Distinct thread ids, most recently written first
    async fn list_thread_ids(&self) -> Result<Vec<ThreadId>, String>;

    /// Every stored snapshot, newest first
    async fn list_all(&self) -> Result<Vec<Checkpoint>, String>;

    /// The newest `limit` snapshots
    async fn list_recent(&self, limit: usize) -> Result<Vec<Checkpoint>, String> {
        let mut all = self.list_all().await?;
        all.truncate(limit);
        Ok(all)
    }
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn get(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, String> {
        (**self).get(thread_id).await
    }

    async fn put(
        &self,
        thread_id: &ThreadId,
        update: &StateUpdate,
    ) -> Result<ConversationState, String> {
        (**self).put(thread_id, update).await
    }

    async fn list_thread_ids(&self) -> Result<Vec<ThreadId>, String> {
        (**self).list_thread_ids().await
    }

    async fn list_all(&self) -> Result<Vec<Checkpoint>, String> {
        (**self).list_all().await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Checkpoint>, String> {
        (**self).list_recent(limit).await
    }
}

/// Adapter to use Database as a checkpoint store
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for DatabaseStore {
    async fn get(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, String> {
        self.db.latest_state(thread_id).map_err(|e| e.to_string())
    }

    async fn put(
        &self,
        thread_id: &ThreadId,
        update: &StateUpdate,
    ) -> Result<ConversationState, String> {
        self.db
            .append_checkpoint(thread_id, update)
            .map(|checkpoint| checkpoint.state)
            .map_err(|e| e.to_string())
    }

    async fn list_thread_ids(&self) -> Result<Vec<ThreadId>, String> {
        self.db.list_thread_ids().map_err(|e| e.to_string())
    }

    async fn list_all(&self) -> Result<Vec<Checkpoint>, String> {
        self.db.list_checkpoints().map_err(|e| e.to_string())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Checkpoint>, String> {
        self.db
            .list_recent_checkpoints(limit)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::MemoryStore;
    use crate::graph::Message;

    #[tokio::test]
    async fn test_database_store_round_trip() {
        let store = DatabaseStore::new(Database::open_in_memory().unwrap());
        let thread = ThreadId::from("t");

        assert!(store.get(&thread).await.unwrap().is_none());
        let merged = store
            .put(&thread, &StateUpdate::new().message(Message::user("hi")))
            .await
            .unwrap();
        assert_eq!(merged.messages.len(), 1);
        assert_eq!(store.get(&thread).await.unwrap(), Some(merged));
    }

    #[tokio::test]
    async fn test_default_list_recent_truncates() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .put(
                    &ThreadId::from(format!("t{i}")),
                    &StateUpdate::new().message(Message::user("x")),
                )
                .await
                .unwrap();
        }

        let recent = store.list_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].thread_id, ThreadId::from("t4"));
    }
}
