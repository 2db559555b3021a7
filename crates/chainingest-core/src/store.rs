//! Record store contract.

use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{CanonicalRecord, RecordFilter};

/// Durable storage for canonical records.
///
/// Implementations live in `chainingest-storage`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert a batch keyed by `identity_key`.
    ///
    /// All-or-nothing: on `Err` no record of the batch may be visible. An
    /// existing key is overwritten with the new payload; re-upserting an
    /// identical record changes nothing (including `ingested_at`). Returns
    /// the number of rows inserted or changed.
    async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<u64, IngestError>;

    /// Read records matching `filter`, ordered by `(height, identity_key)`.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>, IngestError>;
}

/// Per-source descriptive metadata (e.g. token name and symbol).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert_metadata(
        &self,
        source_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), IngestError>;

    async fn metadata(&self, source_id: &str) -> Result<Option<serde_json::Value>, IngestError>;
}
