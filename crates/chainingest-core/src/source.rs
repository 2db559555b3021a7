//! Source client contract and the retrying wrapper.
//!
//! A [`SourceClient`] makes one request per `fetch_page` call.
//! [`RetryingSource`] adds exponential backoff for transient failures and
//! turns exhaustion into [`IngestError::SourceUnavailable`]. Protocol
//! errors pass through on the first occurrence.

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::IngestError;
use crate::retry::RetryPolicy;
use crate::types::RawRecord;

/// A bounded page of raw records.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Cursor to store once this page is persisted.
    pub next_cursor: Cursor,
    /// The source has more data available right now.
    pub has_more: bool,
}

impl Page {
    /// A page with nothing new; the cursor stays where it is.
    pub fn empty(cursor: &Cursor) -> Self {
        Self {
            records: vec![],
            next_cursor: cursor.clone(),
            has_more: false,
        }
    }
}

/// Fetches pages of raw records from an upstream provider.
///
/// The upstream is assumed idempotent: the same cursor yields the same
/// page or a superset of it, so a page may be requested again safely.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the page following `cursor`.
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Page, IngestError>;

    /// Identifier for logs (endpoint URL or name).
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: SourceClient + ?Sized> SourceClient for std::sync::Arc<T> {
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Page, IngestError> {
        (**self).fetch_page(cursor).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Wraps a single-attempt client with bounded retries.
pub struct RetryingSource<C> {
    inner: C,
    retry: RetryPolicy,
}

impl<C: SourceClient> RetryingSource<C> {
    pub fn new(inner: C, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: SourceClient> SourceClient for RetryingSource<C> {
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Page, IngestError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.fetch_page(cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() => {
                    let Some(backoff) = self.retry.next_delay(attempt) else {
                        tracing::error!(
                            attempt,
                            error = %e,
                            source = %self.inner.name(),
                            "max retries exceeded"
                        );
                        return Err(IngestError::SourceUnavailable {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    };
                    let delay = match &e {
                        IngestError::RateLimited {
                            retry_after: Some(after),
                        } => (*after).max(backoff).min(self.retry.config.max),
                        _ => backoff,
                    };
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        source = %self.inner.name(),
                        "retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
