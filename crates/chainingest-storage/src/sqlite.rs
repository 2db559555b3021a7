//! SQLite storage backend.
//!
//! Persists records, checkpoints and source metadata to a single SQLite file.
//! Uses `sqlx` with WAL mode so `status`/`query` can read while sources write.
//!
//! # Usage
//! ```rust,no_run
//! use chainingest_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainingest.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use chainingest_core::checkpoint::{Checkpoint, CheckpointStore};
use chainingest_core::cursor::Cursor;
use chainingest_core::error::IngestError;
use chainingest_core::store::{MetadataStore, RecordStore};
use chainingest_core::types::{CanonicalRecord, RecordFilter};

/// SQLite-backed storage for records, checkpoints and metadata.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// Map a driver error onto the persistence taxonomy.
///
/// Lock contention and I/O are worth another attempt; a broken schema or an
/// undecodable row is not.
fn persistence_err(e: sqlx::Error) -> IngestError {
    let retryable = match &e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    };
    IngestError::Persistence {
        reason: e.to_string(),
        retryable,
    }
}

fn checkpoint_err(e: impl std::fmt::Display) -> IngestError {
    IngestError::Checkpoint(e.to_string())
}

/// SQLite integers are signed; heights past `i64::MAX` cannot be stored.
fn sql_height(height: u64) -> Result<i64, IngestError> {
    i64::try_from(height).map_err(|_| IngestError::Persistence {
        reason: format!("height {height} exceeds the storable range"),
        retryable: false,
    })
}

fn row_height(row: &sqlx::sqlite::SqliteRow) -> Result<u64, IngestError> {
    let height: i64 = row.get("height");
    u64::try_from(height).map_err(|_| IngestError::Persistence {
        reason: format!("corrupt height {height}"),
        retryable: false,
    })
}

fn checkpoint_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, IngestError> {
    Ok(Checkpoint {
        source_id: row.get("source_id"),
        cursor: Cursor {
            height: row_height(row)?,
            token: row.get("token"),
        },
        updated_at: row.get("updated_at"),
    })
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainingest.db"`) or a full
    /// SQLite URL (`"sqlite:./chainingest.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(persistence_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        debug!(path, "sqlite storage opened");
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to one connection, since every `:memory:` connection is its own
    /// database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(persistence_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IngestError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(persistence_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                identity_key TEXT    NOT NULL PRIMARY KEY,
                source_id    TEXT    NOT NULL,
                height       INTEGER NOT NULL,
                ingested_at  INTEGER NOT NULL,
                payload      TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_height ON records (height, identity_key);")
            .execute(&self.pool)
            .await
            .map_err(persistence_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_source ON records (source_id, height);")
            .execute(&self.pool)
            .await
            .map_err(persistence_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                source_id  TEXT    NOT NULL PRIMARY KEY,
                height     INTEGER NOT NULL,
                token      TEXT,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS source_metadata (
                source_id  TEXT    NOT NULL PRIMARY KEY,
                metadata   TEXT    NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        Ok(())
    }

    /// Number of stored records, optionally for one source.
    pub async fn record_count(&self, source_id: Option<&str>) -> Result<u64, IngestError> {
        let row = match source_id {
            Some(id) => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM records WHERE source_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM records")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(persistence_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Delete every record of a source. Returns the number of rows removed.
    pub async fn purge_source(&self, source_id: &str) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM records WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(persistence_err)?;
        debug!(source_id, rows = result.rows_affected(), "source records purged");
        Ok(result.rows_affected())
    }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<u64, IngestError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(persistence_err)?;
        let mut written = 0u64;
        for record in records {
            let height = sql_height(record.height)?;
            let payload = serde_json::to_string(&record.payload).map_err(|e| {
                IngestError::Persistence {
                    reason: format!("cannot encode payload of '{}': {e}", record.identity_key),
                    retryable: false,
                }
            })?;

            // The WHERE clause turns an identical re-upsert into a no-op.
            let result = sqlx::query(
                "INSERT INTO records (identity_key, source_id, height, ingested_at, payload)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (identity_key) DO UPDATE SET
                     source_id   = excluded.source_id,
                     height      = excluded.height,
                     ingested_at = excluded.ingested_at,
                     payload     = excluded.payload
                 WHERE records.payload   != excluded.payload
                    OR records.height    != excluded.height
                    OR records.source_id != excluded.source_id",
            )
            .bind(&record.identity_key)
            .bind(&record.source_id)
            .bind(height)
            .bind(record.ingested_at)
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(persistence_err)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(persistence_err)?;

        debug!(batch = records.len(), written, "records upserted");
        Ok(written)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>, IngestError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT identity_key, source_id, height, ingested_at, payload FROM records WHERE 1 = 1",
        );
        if let Some(source_id) = &filter.source_id {
            qb.push(" AND source_id = ").push_bind(source_id.clone());
        }
        if let Some(key) = &filter.identity_key {
            qb.push(" AND identity_key = ").push_bind(key.clone());
        }
        if let Some(from) = filter.from_height {
            // Nothing is stored past i64::MAX.
            let Ok(from) = i64::try_from(from) else {
                return Ok(Vec::new());
            };
            qb.push(" AND height >= ").push_bind(from);
        }
        if let Some(to) = filter.to_height {
            qb.push(" AND height <= ").push_bind(i64::try_from(to).unwrap_or(i64::MAX));
        }
        qb.push(" ORDER BY height, identity_key");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            let payload = serde_json::from_str(&payload).map_err(|e| IngestError::Persistence {
                reason: format!("corrupt payload: {e}"),
                retryable: false,
            })?;
            records.push(CanonicalRecord {
                identity_key: row.get("identity_key"),
                source_id: row.get("source_id"),
                height: row_height(&row)?,
                ingested_at: row.get("ingested_at"),
                payload,
            });
        }
        Ok(records)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        let row = sqlx::query(
            "SELECT source_id, height, token, updated_at FROM checkpoints WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(checkpoint_err)?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError> {
        let height = sql_height(checkpoint.cursor.height)?;
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (source_id, height, token, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.source_id)
        .bind(height)
        .bind(&checkpoint.cursor.token)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(checkpoint_err)?;

        debug!(
            source_id = %checkpoint.source_id,
            cursor = %checkpoint.cursor,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM checkpoints WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(checkpoint_err)?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError> {
        let rows = sqlx::query(
            "SELECT source_id, height, token, updated_at FROM checkpoints ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(checkpoint_err)?;

        rows.iter().map(checkpoint_from_row).collect()
    }
}

// ─── MetadataStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl MetadataStore for SqliteStorage {
    async fn upsert_metadata(
        &self,
        source_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), IngestError> {
        let json = serde_json::to_string(metadata).map_err(|e| IngestError::Persistence {
            reason: e.to_string(),
            retryable: false,
        })?;
        sqlx::query(
            "INSERT OR REPLACE INTO source_metadata (source_id, metadata, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(source_id)
        .bind(&json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        debug!(source_id, "source metadata stored");
        Ok(())
    }

    async fn metadata(&self, source_id: &str) -> Result<Option<serde_json::Value>, IngestError> {
        let row = sqlx::query("SELECT metadata FROM source_metadata WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence_err)?;

        match row {
            Some(r) => {
                let json: String = r.get("metadata");
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| IngestError::Persistence {
                        reason: format!("corrupt metadata: {e}"),
                        retryable: false,
                    })
            }
            None => Ok(None),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
