//! chainingest-storage — pluggable storage backends for chainingest.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`RecordStore`](chainingest_core::RecordStore),
//! [`CheckpointStore`](chainingest_core::CheckpointStore) and
//! [`MetadataStore`](chainingest_core::MetadataStore), so one handle can be
//! shared by every source of a process.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
