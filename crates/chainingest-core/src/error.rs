//! Error types for the ingestion pipeline.

use std::time::Duration;

use thiserror::Error;

/// How the orchestrator should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry later without moving the checkpoint.
    Transient,
    /// Stop the source and surface the error to the operator.
    Fatal,
    /// Affects a single record; skip it and count it.
    Record,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Record => write!(f, "record"),
        }
    }
}

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A single request failed (connection refused, 5xx, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream asked us to slow down.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// Every retry attempt against the upstream failed.
    #[error("source unavailable after {attempts} attempts: {last_error}")]
    SourceUnavailable { attempts: u32, last_error: String },

    /// The upstream answered with something that breaks its contract.
    #[error("source protocol error: {0}")]
    SourceProtocol(String),

    #[error("cannot normalize record '{record_id}': {reason}")]
    Normalization { record_id: String, reason: String },

    #[error("persistence error: {reason}")]
    Persistence { reason: String, retryable: bool },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A cycle was requested on a source that has already stopped.
    #[error("source '{source_id}' is stopped: {reason}")]
    Stopped { source_id: String, reason: String },

    /// The orchestrator gave up after too many consecutive failed cycles.
    #[error("giving up in state {state} after {failures} consecutive failures: {last_error}")]
    RetriesExhausted {
        state: String,
        failures: u32,
        last_error: String,
    },
}

impl IngestError {
    /// Shorthand for a retryable storage failure.
    pub fn storage(reason: impl std::fmt::Display) -> Self {
        Self::Persistence {
            reason: reason.to_string(),
            retryable: true,
        }
    }

    /// The explicit kind the orchestrator dispatches on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_)
            | Self::RateLimited { .. }
            | Self::SourceUnavailable { .. }
            | Self::Checkpoint(_) => ErrorKind::Transient,
            Self::Persistence { retryable, .. } => {
                if *retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::Normalization { .. } => ErrorKind::Record,
            Self::SourceProtocol(_)
            | Self::Config(_)
            | Self::Stopped { .. }
            | Self::RetriesExhausted { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns `true` if a single request may simply be sent again.
    ///
    /// This is narrower than `kind() == Transient`: an exhausted source is
    /// transient for the orchestrator but must not be retried by the client.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
    }

    /// Returns `true` if the source must stop.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}
