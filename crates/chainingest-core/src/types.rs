//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── RawRecord ────────────────────────────────────────────────────────────────

/// One unit of chain activity exactly as the upstream returned it.
///
/// Never persisted. Fields the provider is supposed to send are still
/// optional here: a record missing them is rejected by the normalizer,
/// not by the source client, so one bad row cannot fail a whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Provider-assigned id.
    pub id: Option<String>,
    /// Ordering height (block number, period start, ...).
    pub height: Option<u64>,
    /// Provider timestamp (unix seconds), if any.
    pub timestamp: Option<i64>,
    /// Everything else the provider sent.
    pub fields: serde_json::Value,
}

impl RawRecord {
    /// Best-effort label for logs.
    pub fn label(&self) -> String {
        match (&self.id, self.height) {
            (Some(id), _) => id.clone(),
            (None, Some(h)) => format!("@{h}"),
            (None, None) => "<unidentified>".into(),
        }
    }
}

// ─── CanonicalRecord ──────────────────────────────────────────────────────────

/// The stored shape of an ingested record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Deterministic key derived from immutable source fields. Unique in the store.
    pub identity_key: String,
    /// The configured source that produced the record.
    pub source_id: String,
    /// Monotonic ordering key.
    pub height: u64,
    /// Unix seconds when the record was first written with its current payload.
    pub ingested_at: i64,
    /// Normalized fields.
    pub payload: serde_json::Value,
}

// ─── RecordFilter ─────────────────────────────────────────────────────────────

/// Read filter for [`crate::store::RecordStore::query`].
///
/// Every field is optional; an empty filter returns everything. Height
/// bounds are inclusive. Results are ordered by `(height, identity_key)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    pub source_id: Option<String>,
    pub identity_key: Option<String>,
    pub from_height: Option<u64>,
    pub to_height: Option<u64>,
    pub limit: Option<u64>,
}

impl RecordFilter {
    /// Filter for a single identity key.
    pub fn key(identity_key: impl Into<String>) -> Self {
        Self {
            identity_key: Some(identity_key.into()),
            ..Default::default()
        }
    }

    /// Restrict to one source.
    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Restrict to `from..=to`.
    pub fn heights(mut self, from: u64, to: u64) -> Self {
        self.from_height = Some(from);
        self.to_height = Some(to);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `record` passes every bound (ignores `limit`).
    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        self.source_id.as_ref().map_or(true, |s| *s == record.source_id)
            && self.identity_key.as_ref().map_or(true, |k| *k == record.identity_key)
            && self.from_height.map_or(true, |h| record.height >= h)
            && self.to_height.map_or(true, |h| record.height <= h)
    }
}

// ─── IngestStats ──────────────────────────────────────────────────────────────

/// Running counters for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Completed cycles (persisted and checkpointed).
    pub cycles: u64,
    /// Raw records received from the source.
    pub fetched: u64,
    /// Rows reported written by the store.
    pub written: u64,
    /// Records dropped by the normalizer.
    pub skipped: u64,
    pub fetch_failures: u64,
    pub persist_failures: u64,
    pub checkpoint_failures: u64,
}
