//! The ingestion orchestrator: one poll loop per source.
//!
//! # Cycle
//! ```text
//! IDLE ─▶ FETCHING ─▶ NORMALIZING ─▶ PERSISTING ─▶ ADVANCING ─▶ SLEEPING ─┐
//!            ▲                                                            │
//!            └────────────────────────────────────────────────────────────┘
//! ```
//! `STOPPED` is reached on cancellation or on a fatal error.
//!
//! Failure paths:
//! - fetch fails transiently → sleep with backoff, re-fetch the same cursor
//! - persist fails transiently → sleep with backoff, retry the identical batch
//! - checkpoint save fails → sleep with backoff, re-fetch the old cursor
//!   (the batch is already stored; re-upserting it is a no-op)
//! - protocol / fatal error, or too many failed cycles in a row → STOPPED
//!
//! The checkpoint is saved only after `upsert_batch` returned `Ok`.
//! Cancellation is observed before a cycle starts and while sleeping, so a
//! started batch always runs through persist and advance.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::config::SourceConfig;
use crate::cursor::Cursor;
use crate::error::{ErrorKind, IngestError};
use crate::normalizer::{normalize_batch, NormalizeContext, Normalizer};
use crate::retry::RetryPolicy;
use crate::source::SourceClient;
use crate::store::RecordStore;
use crate::types::{CanonicalRecord, IngestStats};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestState {
    /// Not yet started (cursor not loaded).
    Idle,
    Fetching,
    Normalizing,
    Persisting,
    Advancing,
    Sleeping,
    /// Terminated, by cancellation or a fatal error.
    Stopped,
}

impl std::fmt::Display for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Normalizing => write!(f, "normalizing"),
            Self::Persisting => write!(f, "persisting"),
            Self::Advancing => write!(f, "advancing"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Operator-visible status of one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub state: IngestState,
    /// Cursor of the last checkpointed batch, once loaded.
    pub cursor: Option<Cursor>,
    pub stats: IngestStats,
    /// Most recent batch- or source-level error, cleared by a completed cycle.
    pub last_error: Option<String>,
    /// The source stopped on an error that needs operator attention.
    pub fatal: bool,
}

/// Why the loop is about to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    /// The last page said more data is waiting.
    Backlog,
    /// The source is drained; steady-state poll.
    CaughtUp,
    /// The cycle failed in the given state and will be retried.
    Retry(IngestState),
}

/// Result of one [`Orchestrator::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub sleep: Duration,
    pub reason: SleepReason,
    /// Rows written by this cycle (0 on failure).
    pub written: u64,
    /// Records dropped by the normalizer in this cycle.
    pub skipped: u64,
}

/// A normalized page waiting to be persisted.
struct PendingBatch {
    records: Vec<CanonicalRecord>,
    next_cursor: Cursor,
    has_more: bool,
    skipped: u64,
}

/// Drives fetch → normalize → persist → advance for a single source.
pub struct Orchestrator<S, N> {
    config: SourceConfig,
    source: S,
    normalizer: N,
    store: Arc<dyn RecordStore>,
    checkpoint: CheckpointManager,
    backoff: RetryPolicy,
    cursor: Option<Cursor>,
    pending: Option<PendingBatch>,
    consecutive_failures: u32,
    state: IngestState,
    stats: IngestStats,
    status: watch::Sender<SourceStatus>,
}

impl<S: SourceClient, N: Normalizer> Orchestrator<S, N> {
    pub fn new(
        config: SourceConfig,
        source: S,
        normalizer: N,
        store: Arc<dyn RecordStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let checkpoint = CheckpointManager::new(checkpoints, config.id.clone(), config.genesis(now));
        let (status, _) = watch::channel(SourceStatus {
            source_id: config.id.clone(),
            state: IngestState::Idle,
            cursor: None,
            stats: IngestStats::default(),
            last_error: None,
            fatal: false,
        });
        Self {
            backoff: RetryPolicy::new(config.retry_config()),
            config,
            source,
            normalizer,
            store,
            checkpoint,
            cursor: None,
            pending: None,
            consecutive_failures: 0,
            state: IngestState::Idle,
            stats: IngestStats::default(),
            status,
        }
    }

    /// Watch the operator-visible status of this source.
    pub fn subscribe(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Cursor of the last checkpointed batch (`None` before the first step).
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Run until cancelled or stopped by a fatal error.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<IngestStats, IngestError> {
        tracing::info!(source = %self.config.id, upstream = %self.source.name(), "ingestion started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.step().await?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(outcome.sleep) => {}
            }
        }
        self.transition(IngestState::Stopped);
        tracing::info!(
            source = %self.config.id,
            cycles = self.stats.cycles,
            written = self.stats.written,
            skipped = self.stats.skipped,
            "ingestion stopped"
        );
        Ok(self.stats)
    }

    /// Run exactly one cycle and return how long to sleep before the next.
    ///
    /// Transient failures are absorbed into the outcome; an `Err` means the
    /// source is stopped.
    pub async fn step(&mut self) -> Result<CycleOutcome, IngestError> {
        if self.state == IngestState::Stopped {
            let reason = self
                .status
                .borrow()
                .last_error
                .clone()
                .unwrap_or_else(|| "cancelled".into());
            return Err(IngestError::Stopped {
                source_id: self.config.id.clone(),
                reason,
            });
        }

        let cursor = match self.cursor.clone() {
            Some(cursor) => cursor,
            None => {
                self.transition(IngestState::Idle);
                match self.checkpoint.load().await {
                    Ok(cursor) => {
                        self.cursor = Some(cursor.clone());
                        cursor
                    }
                    Err(e) => return self.fail(IngestState::Idle, e),
                }
            }
        };

        let batch = match self.pending.take() {
            Some(batch) => {
                tracing::debug!(
                    source = %self.config.id,
                    records = batch.records.len(),
                    "retrying pending batch"
                );
                batch
            }
            None => {
                self.transition(IngestState::Fetching);
                let page = match self.source.fetch_page(&cursor).await {
                    Ok(page) => page,
                    Err(e) => {
                        self.stats.fetch_failures += 1;
                        return self.fail(IngestState::Fetching, e);
                    }
                };
                self.stats.fetched += page.records.len() as u64;

                self.transition(IngestState::Normalizing);
                let ctx = NormalizeContext {
                    source_id: self.config.id.clone(),
                    ingested_at: chrono::Utc::now().timestamp(),
                };
                let normalized = normalize_batch(&self.normalizer, &page.records, &ctx);
                let skipped = normalized.failures.len() as u64;
                self.stats.skipped += skipped;
                PendingBatch {
                    records: normalized.records,
                    next_cursor: page.next_cursor,
                    has_more: page.has_more,
                    skipped,
                }
            }
        };

        self.transition(IngestState::Persisting);
        let written = match self.store.upsert_batch(&batch.records).await {
            Ok(written) => written,
            Err(e) => {
                self.stats.persist_failures += 1;
                if e.kind() != ErrorKind::Fatal {
                    self.pending = Some(batch);
                }
                return self.fail(IngestState::Persisting, e);
            }
        };
        self.stats.written += written;

        self.transition(IngestState::Advancing);
        if let Err(e) = self.checkpoint.save(&batch.next_cursor).await {
            self.stats.checkpoint_failures += 1;
            return self.fail(IngestState::Advancing, e);
        }
        self.cursor = Some(batch.next_cursor.clone());
        self.consecutive_failures = 0;
        self.stats.cycles += 1;

        let (sleep, reason) = if batch.has_more {
            (self.config.drain_interval(), SleepReason::Backlog)
        } else {
            (self.config.poll_interval(), SleepReason::CaughtUp)
        };
        tracing::info!(
            source = %self.config.id,
            cursor = %batch.next_cursor,
            written,
            skipped = batch.skipped,
            has_more = batch.has_more,
            "batch ingested"
        );

        self.state = IngestState::Sleeping;
        self.status.send_modify(|s| {
            s.state = IngestState::Sleeping;
            s.last_error = None;
        });
        self.publish();
        Ok(CycleOutcome {
            sleep,
            reason,
            written,
            skipped: batch.skipped,
        })
    }

    /// Route a failed cycle by error kind.
    fn fail(&mut self, state: IngestState, e: IngestError) -> Result<CycleOutcome, IngestError> {
        if e.is_fatal() {
            return Err(self.stop_fatal(state, e));
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            let exhausted = IngestError::RetriesExhausted {
                state: state.to_string(),
                failures: self.consecutive_failures,
                last_error: e.to_string(),
            };
            return Err(self.stop_fatal(state, exhausted));
        }

        // Cycle backoff starts where the client's own retries left off.
        let sleep = self
            .backoff
            .delay_for(self.config.max_retries.saturating_add(self.consecutive_failures));
        tracing::warn!(
            source = %self.config.id,
            state = %state,
            failures = self.consecutive_failures,
            delay_ms = sleep.as_millis() as u64,
            error = %e,
            "cycle failed, backing off"
        );
        self.state = IngestState::Sleeping;
        let message = e.to_string();
        self.status.send_modify(|s| {
            s.state = IngestState::Sleeping;
            s.last_error = Some(message);
        });
        self.publish();
        Ok(CycleOutcome {
            sleep,
            reason: SleepReason::Retry(state),
            written: 0,
            skipped: 0,
        })
    }

    fn stop_fatal(&mut self, state: IngestState, e: IngestError) -> IngestError {
        tracing::error!(
            source = %self.config.id,
            state = %state,
            error = %e,
            "source stopped, operator attention required"
        );
        self.state = IngestState::Stopped;
        let message = e.to_string();
        self.status.send_modify(|s| {
            s.state = IngestState::Stopped;
            s.last_error = Some(message);
            s.fatal = true;
        });
        self.publish();
        e
    }

    fn transition(&mut self, state: IngestState) {
        tracing::debug!(source = %self.config.id, from = %self.state, to = %state, "state transition");
        self.state = state;
        self.status.send_modify(|s| s.state = state);
    }

    fn publish(&self) {
        let cursor = self.cursor.clone();
        let stats = self.stats;
        self.status.send_modify(|s| {
            s.cursor = cursor;
            s.stats = stats;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::normalizer::KeyedNormalizer;
    use crate::source::Page;
    use crate::types::{RawRecord, RecordFilter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    // ─── Fakes ────────────────────────────────────────────────────────────────

    struct ScriptedSource {
        replies: Mutex<VecDeque<Result<Page, IngestError>>>,
        seen: Mutex<Vec<Cursor>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<Page, IngestError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(vec![]),
            })
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().iter().map(|c| c.height).collect()
        }
    }

    #[async_trait]
    impl SourceClient for ScriptedSource {
        async fn fetch_page(&self, cursor: &Cursor) -> Result<Page, IngestError> {
            self.seen.lock().unwrap().push(cursor.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::empty(cursor)))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Map-backed store that can be told to fail the next N writes.
    #[derive(Default)]
    struct FlakyStore {
        rows: Mutex<BTreeMap<String, CanonicalRecord>>,
        fail_next: Mutex<u32>,
        fatal: bool,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<u64, IngestError> {
            {
                let mut fail = self.fail_next.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(IngestError::Persistence {
                        reason: "database is locked".into(),
                        retryable: !self.fatal,
                    });
                }
            }
            let mut rows = self.rows.lock().unwrap();
            for r in records {
                rows.insert(r.identity_key.clone(), r.clone());
            }
            Ok(records.len() as u64)
        }

        async fn query(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>, IngestError> {
            Ok(self.rows.lock().unwrap().values().filter(|r| filter.matches(r)).cloned().collect())
        }
    }

    fn raw(height: u64) -> RawRecord {
        RawRecord {
            id: Some(format!("tx-{height}")),
            height: Some(height),
            timestamp: None,
            fields: json!({ "value": height }),
        }
    }

    fn page(heights: &[u64], next: u64, has_more: bool) -> Result<Page, IngestError> {
        Ok(Page {
            records: heights.iter().map(|h| raw(*h)).collect(),
            next_cursor: Cursor::genesis(next),
            has_more,
        })
    }

    fn config() -> SourceConfig {
        let mut cfg = SourceConfig::new("test", "scripted://");
        cfg.genesis_cursor = Some(0);
        cfg.poll_interval_ms = 60_000;
        cfg.drain_interval_ms = 0;
        cfg.backoff_base_ms = 100;
        cfg.backoff_max_ms = 10_000;
        cfg.max_retries = 2;
        cfg.jitter_fraction = 0.0;
        cfg.max_consecutive_failures = 5;
        cfg
    }

    fn orchestrator(
        cfg: SourceConfig,
        source: Arc<ScriptedSource>,
        store: Arc<FlakyStore>,
        checkpoints: Arc<MemoryCheckpointStore>,
    ) -> Orchestrator<Arc<ScriptedSource>, KeyedNormalizer> {
        Orchestrator::new(cfg, source, KeyedNormalizer::new("chain"), store, checkpoints)
    }

    async fn checkpoint_height(store: &MemoryCheckpointStore) -> Option<u64> {
        store.load("test").await.unwrap().map(|cp| cp.cursor.height)
    }

    // ─── Tests ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn one_cycle_persists_then_advances() {
        let source = ScriptedSource::new(vec![page(&[1, 2, 3], 3, false)]);
        let store = Arc::new(FlakyStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let mut orch = orchestrator(config(), source.clone(), store.clone(), checkpoints.clone());

        let outcome = orch.step().await.unwrap();
        assert_eq!(outcome.written, 3);
        assert_eq!(outcome.reason, SleepReason::CaughtUp);
        assert_eq!(outcome.sleep, Duration::from_secs(60));
        assert_eq!(store.rows.lock().unwrap().len(), 3);
        assert_eq!(checkpoint_height(&checkpoints).await, Some(3));
        assert_eq!(orch.cursor().unwrap().height, 3);
        assert_eq!(orch.state(), IngestState::Sleeping);
        assert_eq!(source.seen(), vec![0]);
    }

    #[tokio::test]
    async fn backlog_uses_drain_interval() {
        let source = ScriptedSource::new(vec![page(&[1], 1, true)]);
        let mut orch = orchestrator(
            config(),
            source,
            Arc::new(FlakyStore::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let outcome = orch.step().await.unwrap();
        assert_eq!(outcome.reason, SleepReason::Backlog);
        assert_eq!(outcome.sleep, Duration::ZERO);
    }

    #[tokio::test]
    async fn persist_failure_retries_same_batch_without_advancing() {
        let source = ScriptedSource::new(vec![page(&[1, 2], 2, false)]);
        let store = Arc::new(FlakyStore::default());
        *store.fail_next.lock().unwrap() = 1;
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let mut orch = orchestrator(config(), source.clone(), store.clone(), checkpoints.clone());

        let failed = orch.step().await.unwrap();
        assert_eq!(failed.reason, SleepReason::Retry(IngestState::Persisting));
        assert_eq!(checkpoint_height(&checkpoints).await, None);
        assert!(store.rows.lock().unwrap().is_empty());

        let ok = orch.step().await.unwrap();
        assert_eq!(ok.written, 2);
        assert_eq!(checkpoint_height(&checkpoints).await, Some(2));
        // The pending batch was retried, not re-fetched.
        assert_eq!(source.seen(), vec![0]);
        assert_eq!(orch.stats().persist_failures, 1);
    }

    #[tokio::test]
    async fn unavailable_source_backs_off_and_keeps_cursor() {
        let down = || Err(IngestError::SourceUnavailable { attempts: 3, last_error: "503".into() });
        let mut cfg = config();
        cfg.backoff_max_ms = 3_000;
        let source = ScriptedSource::new(vec![down(), down(), down(), down()]);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let mut orch = orchestrator(cfg, source.clone(), Arc::new(FlakyStore::default()), checkpoints.clone());

        let mut sleeps = vec![];
        for _ in 0..4 {
            let outcome = orch.step().await.unwrap();
            assert_eq!(outcome.reason, SleepReason::Retry(IngestState::Fetching));
            sleeps.push(outcome.sleep.as_millis());
        }
        // max_retries = 2, so cycle backoff starts at attempt 3: 400, 800, 1600, then capped.
        assert_eq!(sleeps, vec![400, 800, 1600, 3000]);
        assert!(sleeps[0] < sleeps[1] && sleeps[1] < sleeps[2]);
        assert_eq!(source.seen(), vec![0, 0, 0, 0]);
        assert_eq!(checkpoint_height(&checkpoints).await, None);
        assert_eq!(orch.subscribe().borrow().last_error.as_deref().map(|e| e.contains("503")), Some(true));
    }

    #[tokio::test]
    async fn protocol_error_stops_the_source() {
        let source = ScriptedSource::new(vec![Err(IngestError::SourceProtocol("no data field".into()))]);
        let mut orch = orchestrator(
            config(),
            source,
            Arc::new(FlakyStore::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let status = orch.subscribe();
        let err = orch.step().await.unwrap_err();
        assert!(matches!(err, IngestError::SourceProtocol(_)));
        assert_eq!(orch.state(), IngestState::Stopped);
        assert!(status.borrow().fatal);
        match orch.step().await.unwrap_err() {
            IngestError::Stopped { source_id, reason } => {
                assert_eq!(source_id, "test");
                assert!(reason.contains("no data field"), "{reason}");
            }
            other => panic!("expected stopped, got {other}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_persistence_error_stops() {
        let source = ScriptedSource::new(vec![page(&[1], 1, false)]);
        let store = Arc::new(FlakyStore {
            fatal: true,
            ..Default::default()
        });
        *store.fail_next.lock().unwrap() = 1;
        let mut orch = orchestrator(config(), source, store, Arc::new(MemoryCheckpointStore::new()));
        assert!(orch.step().await.is_err());
        assert_eq!(orch.state(), IngestState::Stopped);
    }

    #[tokio::test]
    async fn repeated_failures_are_bounded() {
        let mut cfg = config();
        cfg.max_consecutive_failures = 3;
        let down = || Err(IngestError::SourceUnavailable { attempts: 3, last_error: "timeout".into() });
        let source = ScriptedSource::new(vec![down(), down(), down()]);
        let mut orch = orchestrator(cfg, source, Arc::new(FlakyStore::default()), Arc::new(MemoryCheckpointStore::new()));

        assert!(orch.step().await.is_ok());
        assert!(orch.step().await.is_ok());
        let err = orch.step().await.unwrap_err();
        assert!(matches!(err, IngestError::RetriesExhausted { failures: 3, .. }));
        assert!(orch.subscribe().borrow().fatal);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let mut cfg = config();
        cfg.max_consecutive_failures = 2;
        let down = || Err(IngestError::Transport("reset".into()));
        let source = ScriptedSource::new(vec![down(), page(&[1], 1, true), down(), page(&[2], 2, false)]);
        let mut orch = orchestrator(cfg, source, Arc::new(FlakyStore::default()), Arc::new(MemoryCheckpointStore::new()));
        for _ in 0..4 {
            orch.step().await.unwrap();
        }
        assert_eq!(orch.cursor().unwrap().height, 2);
        assert_eq!(orch.stats().fetch_failures, 2);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_and_counted() {
        let mut records: Vec<_> = (1..=9).map(raw).collect();
        records.insert(4, RawRecord { id: None, height: Some(99), timestamp: None, fields: json!({}) });
        let source = ScriptedSource::new(vec![Ok(Page {
            records,
            next_cursor: Cursor::genesis(9),
            has_more: false,
        })]);
        let store = Arc::new(FlakyStore::default());
        let mut orch = orchestrator(config(), source, store.clone(), Arc::new(MemoryCheckpointStore::new()));

        let outcome = orch.step().await.unwrap();
        assert_eq!(outcome.written, 9);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.rows.lock().unwrap().len(), 9);
        assert_eq!(orch.stats().skipped, 1);
    }

    #[tokio::test]
    async fn resumes_from_saved_checkpoint() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        CheckpointManager::new(checkpoints.clone(), "test", Cursor::genesis(0))
            .save(&Cursor::genesis(40))
            .await
            .unwrap();
        let source = ScriptedSource::new(vec![]);
        let mut orch = orchestrator(config(), source.clone(), Arc::new(FlakyStore::default()), checkpoints);
        orch.step().await.unwrap();
        assert_eq!(source.seen(), vec![40]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel_during_sleep() {
        let source = ScriptedSource::new(vec![page(&[1], 1, false)]);
        let store = Arc::new(FlakyStore::default());
        let mut orch = orchestrator(config(), source, store.clone(), Arc::new(MemoryCheckpointStore::new()));
        let status = orch.subscribe();
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { orch.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.cycles, 1);
        assert_eq!(status.borrow().state, IngestState::Stopped);
        assert!(!status.borrow().fatal);
    }

    #[tokio::test]
    async fn run_returns_fatal_error() {
        let source = ScriptedSource::new(vec![Err(IngestError::SourceProtocol("schema changed".into()))]);
        let mut orch = orchestrator(
            config(),
            source,
            Arc::new(FlakyStore::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let err = orch.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::SourceProtocol(_)));
    }
}
