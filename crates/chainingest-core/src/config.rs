//! Ingestion configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::IngestError;
use crate::retry::RetryConfig;
use crate::telemetry::LogConfig;

/// Configuration for one upstream source. One orchestrator runs per source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique id, used as the checkpoint key.
    pub id: String,
    /// Upstream endpoint, e.g. a subgraph GraphQL URL.
    #[serde(alias = "source_endpoint")]
    pub endpoint: String,
    /// Chain slug used in identity keys.
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Token contract address to ingest.
    #[serde(default)]
    pub token: String,
    /// Steady-state sleep once the source is drained.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sleep between cycles while the source still has backlog.
    #[serde(default)]
    pub drain_interval_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Retries per fetch inside the source client.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Failed cycles in a row before the source is stopped.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Records per fetched page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Explicit starting cursor height.
    #[serde(default)]
    pub genesis_cursor: Option<u64>,
    /// Without `genesis_cursor`, start this many seconds before now.
    #[serde(default)]
    pub backfill_window_secs: Option<u64>,
}

fn default_chain() -> String { "ethereum".into() }
fn default_poll_interval_ms() -> u64 { 3_600_000 }
fn default_backoff_base_ms() -> u64 { 100 }
fn default_backoff_max_ms() -> u64 { 60_000 }
fn default_max_retries() -> u32 { 5 }
fn default_jitter_fraction() -> f64 { 0.1 }
fn default_max_consecutive_failures() -> u32 { 10 }
fn default_page_size() -> u32 { 100 }
fn default_request_timeout_ms() -> u64 { 30_000 }

impl SourceConfig {
    /// A config with defaults for everything but the id and endpoint.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            chain: default_chain(),
            token: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            drain_interval_ms: 0,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_retries: default_max_retries(),
            jitter_fraction: default_jitter_fraction(),
            max_consecutive_failures: default_max_consecutive_failures(),
            page_size: default_page_size(),
            request_timeout_ms: default_request_timeout_ms(),
            genesis_cursor: None,
            backfill_window_secs: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            multiplier: 2.0,
            jitter_fraction: self.jitter_fraction,
        }
    }

    /// Starting cursor for a source with no checkpoint, given the current
    /// unix time.
    pub fn genesis(&self, now: u64) -> Cursor {
        match (self.genesis_cursor, self.backfill_window_secs) {
            (Some(height), _) => Cursor::genesis(height),
            (None, Some(window)) => Cursor::genesis(now.saturating_sub(window)),
            (None, None) => Cursor::genesis(0),
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.id.trim().is_empty() {
            return Err(IngestError::Config("source id must not be empty".into()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(IngestError::Config(format!("source '{}': endpoint must not be empty", self.id)));
        }
        if self.page_size == 0 {
            return Err(IngestError::Config(format!("source '{}': page_size must be > 0", self.id)));
        }
        if self.max_consecutive_failures == 0 {
            return Err(IngestError::Config(format!(
                "source '{}': max_consecutive_failures must be > 0",
                self.id
            )));
        }
        self.retry_config()
            .validate()
            .map_err(|e| IngestError::Config(format!("source '{}': {e}", self.id)))
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite path or `sqlite:` URL.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub log: LogConfig,
    pub sources: Vec<SourceConfig>,
}

fn default_database() -> String { "./chainingest.db".into() }

impl AppConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, IngestError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.sources.is_empty() {
            return Err(IngestError::Config("no sources configured".into()));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.id.as_str()) {
                return Err(IngestError::Config(format!("duplicate source id '{}'", source.id)));
            }
        }
        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}
