//! In-memory storage backend.
//!
//! Keeps records, checkpoints and source metadata in RAM.
//! Useful for testing and short-lived runs that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chainingest_core::checkpoint::{Checkpoint, CheckpointStore};
use chainingest_core::error::IngestError;
use chainingest_core::store::{MetadataStore, RecordStore};
use chainingest_core::types::{CanonicalRecord, RecordFilter};

#[derive(Default)]
struct Inner {
    records: HashMap<String, CanonicalRecord>,
    /// `(height, identity_key)`, in query order.
    by_height: BTreeSet<(u64, String)>,
    checkpoints: HashMap<String, Checkpoint>,
    metadata: HashMap<String, serde_json::Value>,
}

/// In-memory ingestion storage.
///
/// A single lock guards every map, so a batch upsert is atomic with respect
/// to readers. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, optionally for one source.
    pub fn record_count(&self, source_id: Option<&str>) -> Result<u64, IngestError> {
        let inner = self.lock()?;
        let count = match source_id {
            Some(id) => inner.records.values().filter(|r| r.source_id == id).count(),
            None => inner.records.len(),
        };
        Ok(count as u64)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, IngestError> {
        self.inner
            .lock()
            .map_err(|_| IngestError::storage("in-memory store poisoned"))
    }
}

fn unchanged(old: &CanonicalRecord, new: &CanonicalRecord) -> bool {
    old.source_id == new.source_id && old.height == new.height && old.payload == new.payload
}

#[async_trait]
impl RecordStore for InMemoryStorage {
    async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<u64, IngestError> {
        let mut inner = self.lock()?;
        let mut written = 0u64;
        for record in records {
            if let Some(old) = inner.records.get(&record.identity_key) {
                if unchanged(old, record) {
                    continue;
                }
                let stale = (old.height, old.identity_key.clone());
                inner.by_height.remove(&stale);
            }
            inner
                .by_height
                .insert((record.height, record.identity_key.clone()));
            inner
                .records
                .insert(record.identity_key.clone(), record.clone());
            written += 1;
        }
        tracing::debug!(batch = records.len(), written, "records upserted");
        Ok(written)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>, IngestError> {
        let inner = self.lock()?;
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(inner
            .by_height
            .iter()
            .filter_map(|(_, key)| inner.records.get(key))
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self.lock()?.checkpoints.get(source_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError> {
        self.lock()?
            .checkpoints
            .insert(checkpoint.source_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), IngestError> {
        self.lock()?.checkpoints.remove(source_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError> {
        let mut all: Vec<_> = self.lock()?.checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(all)
    }
}

#[async_trait]
impl MetadataStore for InMemoryStorage {
    async fn upsert_metadata(
        &self,
        source_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), IngestError> {
        self.lock()?
            .metadata
            .insert(source_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn metadata(&self, source_id: &str) -> Result<Option<serde_json::Value>, IngestError> {
        Ok(self.lock()?.metadata.get(source_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainingest_core::Cursor;
    use serde_json::json;

    fn record(key: &str, height: u64, price: f64, ingested_at: i64) -> CanonicalRecord {
        CanonicalRecord {
            identity_key: key.to_string(),
            source_id: "shib".into(),
            height,
            ingested_at,
            payload: json!({ "priceUSD": price }),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = InMemoryStorage::new();
        let batch = vec![record("a", 1, 1.0, 10), record("b", 2, 2.0, 10)];
        assert_eq!(store.upsert_batch(&batch).await.unwrap(), 2);

        let mut again = batch.clone();
        again[0].ingested_at = 99;
        assert_eq!(store.upsert_batch(&again).await.unwrap(), 0);

        let rows = store.query(&RecordFilter::default()).await.unwrap();
        assert_eq!(rows, batch);
    }

    #[tokio::test]
    async fn changed_payload_overwrites() {
        let store = InMemoryStorage::new();
        store.upsert_batch(&[record("a", 1, 1.0, 10)]).await.unwrap();
        assert_eq!(store.upsert_batch(&[record("a", 5, 1.5, 20)]).await.unwrap(), 1);

        let rows = store.query(&RecordFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].height, 5);
        assert_eq!(rows[0].ingested_at, 20);
        assert_eq!(store.query(&RecordFilter::default().heights(0, 2)).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn query_orders_by_height_then_key() {
        let store = InMemoryStorage::new();
        store
            .upsert_batch(&[record("c", 2, 1.0, 0), record("b", 1, 1.0, 0), record("a", 2, 1.0, 0)])
            .await
            .unwrap();
        let keys: Vec<_> = store
            .query(&RecordFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identity_key)
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);

        let limited = store.query(&RecordFilter::default().limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(store.record_count(Some("shib")).unwrap(), 3);
        assert_eq!(store.record_count(Some("pepe")).unwrap(), 0);
    }

    #[tokio::test]
    async fn checkpoints_and_metadata() {
        let store = InMemoryStorage::new();
        store
            .save(Checkpoint {
                source_id: "shib".into(),
                cursor: Cursor::genesis(42),
                updated_at: 1,
            })
            .await
            .unwrap();
        assert_eq!(store.load("shib").await.unwrap().unwrap().cursor.height, 42);
        assert_eq!(store.list().await.unwrap().len(), 1);
        store.delete("shib").await.unwrap();
        assert!(store.load("shib").await.unwrap().is_none());

        store.upsert_metadata("shib", &json!({ "symbol": "SHIB" })).await.unwrap();
        assert_eq!(store.metadata("shib").await.unwrap().unwrap()["symbol"], "SHIB");
        assert!(store.metadata("pepe").await.unwrap().is_none());
    }
}
