//! Checkpoint manager. Persists how far each source has been ingested.
//!
//! A checkpoint stores the cursor of the last batch that was durably
//! written. On restart, the orchestrator resumes from it rather than from
//! genesis. It is only ever saved after the record store has confirmed the
//! batch the cursor covers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::IngestError;

/// A persisted checkpoint, one per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Configured source id.
    pub source_id: String,
    /// Cursor of the last durably ingested batch.
    pub cursor: Cursor,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore` and the storage
/// backends in `chainingest-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a source.
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IngestError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError>;

    /// Delete a checkpoint (e.g. when resetting a source).
    async fn delete(&self, source_id: &str) -> Result<(), IngestError>;

    /// All stored checkpoints, ordered by source id.
    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError>;
}

/// Checkpoint reads/writes for a single source.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    source_id: String,
    genesis: Cursor,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, source_id: impl Into<String>, genesis: Cursor) -> Self {
        Self {
            store,
            source_id: source_id.into(),
            genesis,
        }
    }

    /// Load the saved cursor, or the genesis cursor if nothing was saved yet.
    pub async fn load(&self) -> Result<Cursor, IngestError> {
        match self.store.load(&self.source_id).await? {
            Some(cp) => {
                tracing::info!(source = %self.source_id, cursor = %cp.cursor, "resuming from checkpoint");
                Ok(cp.cursor)
            }
            None => {
                tracing::info!(source = %self.source_id, cursor = %self.genesis, "no checkpoint, starting at genesis");
                Ok(self.genesis.clone())
            }
        }
    }

    /// Durably record `cursor` as the new high-water mark.
    pub async fn save(&self, cursor: &Cursor) -> Result<(), IngestError> {
        let cp = Checkpoint {
            source_id: self.source_id.clone(),
            cursor: cursor.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, IngestError> {
        self.data
            .lock()
            .map_err(|_| IngestError::Checkpoint("checkpoint map poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self.lock()?.get(source_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError> {
        self.lock()?.insert(checkpoint.source_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), IngestError> {
        self.lock()?.remove(source_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError> {
        let mut all: Vec<_> = self.lock()?.values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_falls_back_to_genesis() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store, "wbtc", Cursor::genesis(42));
        assert_eq!(mgr.load().await.unwrap(), Cursor::genesis(42));
    }

    #[tokio::test]
    async fn save_then_resume() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store.clone(), "wbtc", Cursor::genesis(0));
        mgr.save(&Cursor::genesis(1000)).await.unwrap();

        // A fresh manager (process restart) sees the saved cursor.
        let restarted = CheckpointManager::new(store.clone(), "wbtc", Cursor::genesis(0));
        assert_eq!(restarted.load().await.unwrap().height, 1000);

        let cp = store.load("wbtc").await.unwrap().unwrap();
        assert_eq!(cp.source_id, "wbtc");
    }

    #[tokio::test]
    async fn sources_are_isolated() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let a = CheckpointManager::new(store.clone(), "a", Cursor::genesis(0));
        let b = CheckpointManager::new(store.clone(), "b", Cursor::genesis(0));
        a.save(&Cursor::genesis(10)).await.unwrap();
        assert_eq!(b.load().await.unwrap().height, 0);

        store.delete("a").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
