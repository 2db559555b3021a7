//! Normalizer contract: raw provider records to canonical stored rows.

use crate::error::IngestError;
use crate::types::{CanonicalRecord, RawRecord};

/// Context passed to a normalizer for one batch.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    /// The source the batch came from.
    pub source_id: String,
    /// Timestamp stamped on every record of the batch (unix seconds).
    pub ingested_at: i64,
}

/// Maps raw records into the canonical schema. No I/O.
///
/// `identity_key` must depend only on immutable source fields, so the same
/// raw record normalized twice yields the same key.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &RawRecord, ctx: &NormalizeContext) -> Result<CanonicalRecord, IngestError>;
}

impl<T: Normalizer + ?Sized> Normalizer for std::sync::Arc<T> {
    fn normalize(&self, raw: &RawRecord, ctx: &NormalizeContext) -> Result<CanonicalRecord, IngestError> {
        (**self).normalize(raw, ctx)
    }
}

/// Result of normalizing one page.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    pub failures: Vec<IngestError>,
}

/// Normalize every record of a page, keeping going past bad ones.
pub fn normalize_batch<N: Normalizer + ?Sized>(
    normalizer: &N,
    raws: &[RawRecord],
    ctx: &NormalizeContext,
) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for raw in raws {
        match normalizer.normalize(raw, ctx) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                tracing::warn!(source = %ctx.source_id, record = %raw.label(), error = %e, "skipping record");
                batch.failures.push(e);
            }
        }
    }
    batch
}

/// Generic normalizer keyed on the provider id.
///
/// Identity is `"{namespace}:{id}"`. The record must carry an id, a height,
/// an object payload, and every field in `required` with a non-null value.
#[derive(Debug, Clone)]
pub struct KeyedNormalizer {
    namespace: String,
    required: Vec<String>,
}

impl KeyedNormalizer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            required: vec![],
        }
    }

    /// Require a payload field to be present and non-null.
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }
}

impl Normalizer for KeyedNormalizer {
    fn normalize(&self, raw: &RawRecord, ctx: &NormalizeContext) -> Result<CanonicalRecord, IngestError> {
        let fail = |reason: String| IngestError::Normalization {
            record_id: raw.label(),
            reason,
        };
        let id = raw
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| fail("missing id".into()))?;
        let height = raw.height.ok_or_else(|| fail("missing height".into()))?;
        let fields = raw
            .fields
            .as_object()
            .ok_or_else(|| fail("payload is not an object".into()))?;
        for name in &self.required {
            if fields.get(name).map_or(true, |v| v.is_null()) {
                return Err(fail(format!("missing field '{name}'")));
            }
        }
        Ok(CanonicalRecord {
            identity_key: format!("{}:{}", self.namespace, id),
            source_id: ctx.source_id.clone(),
            height,
            ingested_at: ctx.ingested_at,
            payload: raw.fields.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            source_id: "test".into(),
            ingested_at: 1_700_000_000,
        }
    }

    fn raw(id: Option<&str>, height: Option<u64>, fields: serde_json::Value) -> RawRecord {
        RawRecord {
            id: id.map(String::from),
            height,
            timestamp: None,
            fields,
        }
    }

    #[test]
    fn identity_is_deterministic() {
        let n = KeyedNormalizer::new("ethereum").require("value");
        let r = raw(Some("0xabc"), Some(5), json!({"value": 1}));
        let a = n.normalize(&r, &ctx()).unwrap();
        let later = NormalizeContext { ingested_at: 1_800_000_000, ..ctx() };
        let b = n.normalize(&r, &later).unwrap();
        assert_eq!(a.identity_key, "ethereum:0xabc");
        assert_eq!(a.identity_key, b.identity_key);
        assert_eq!(a.height, 5);
    }

    #[test]
    fn rejects_missing_fields() {
        let n = KeyedNormalizer::new("ethereum").require("value");
        assert!(n.normalize(&raw(None, Some(1), json!({"value": 1})), &ctx()).is_err());
        assert!(n.normalize(&raw(Some("a"), None, json!({"value": 1})), &ctx()).is_err());
        assert!(n.normalize(&raw(Some("a"), Some(1), json!({"value": null})), &ctx()).is_err());
        assert!(n.normalize(&raw(Some("a"), Some(1), json!([1, 2])), &ctx()).is_err());
    }

    #[test]
    fn batch_skips_bad_records() {
        let n = KeyedNormalizer::new("ns");
        let raws = vec![
            raw(Some("a"), Some(1), json!({})),
            raw(None, Some(2), json!({})),
            raw(Some("c"), Some(3), json!({})),
        ];
        let batch = normalize_batch(&n, &raws, &ctx());
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(batch.failures[0], IngestError::Normalization { .. }));
    }
}
