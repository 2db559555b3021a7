//! chainingest-core — foundation for the checkpointed, idempotent ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (one per source)
//!     ├── SourceClient      (fetch_page(cursor), wrapped in RetryingSource)
//!     ├── Normalizer        (RawRecord → CanonicalRecord, identity key)
//!     ├── RecordStore       (atomic upsert_batch + query)
//!     └── CheckpointManager (load on start, save after persist)
//! ```
//!
//! The one ordering rule everything else hangs on: a batch is persisted
//! before the checkpoint is moved past it.

pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{AppConfig, SourceConfig};
pub use cursor::Cursor;
pub use error::{ErrorKind, IngestError};
pub use normalizer::{normalize_batch, KeyedNormalizer, NormalizeContext, Normalizer};
pub use orchestrator::{CycleOutcome, IngestState, Orchestrator, SleepReason, SourceStatus};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{Page, RetryingSource, SourceClient};
pub use store::{MetadataStore, RecordStore};
pub use types::{CanonicalRecord, IngestStats, RawRecord, RecordFilter};
