//! HTTP GraphQL client for the Uniswap v3 subgraph, backed by `reqwest`.
//!
//! Every call is a single attempt. Wrap the client in
//! [`RetryingSource`](chainingest_core::RetryingSource) for backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::Value;

use chainingest_core::config::SourceConfig;
use chainingest_core::cursor::Cursor;
use chainingest_core::error::IngestError;
use chainingest_core::source::{Page, SourceClient};
use chainingest_core::types::RawRecord;

use crate::graphql::{extract_array, hour_datas_request, token_request, TokenMetadata};

/// Subgraph client for one token's hourly candles.
pub struct SubgraphClient {
    name: String,
    endpoint: String,
    token: String,
    page_size: u32,
    http: reqwest::Client,
}

impl SubgraphClient {
    /// Build a client from a source's configuration.
    pub fn new(config: &SourceConfig) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("chainingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            name: config.id.clone(),
            endpoint: config.endpoint.clone(),
            token: config.token.to_lowercase(),
            page_size: config.page_size,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the hour window `[cursor, now)`.
    ///
    /// The cursor hour is fetched again so a candle stored while its hour was
    /// still open gets its final prices. An empty window returns an empty page
    /// without a request.
    pub async fn fetch_window(&self, cursor: &Cursor, now: u64) -> Result<Page, IngestError> {
        let start = cursor.height;
        if start >= now {
            return Ok(Page::empty(cursor));
        }

        let body = hour_datas_request(&self.token, start, now, self.page_size);
        let text = self.post(&body).await?;
        let items = extract_array(&text, "tokenHourDatas")?;
        let page = page_from_items(items, cursor, self.page_size);

        tracing::debug!(
            source = %self.name,
            start,
            end = now,
            records = page.records.len(),
            has_more = page.has_more,
            "subgraph page fetched"
        );
        Ok(page)
    }

    /// Fetch the token's descriptive metadata.
    pub async fn fetch_token(&self) -> Result<TokenMetadata, IngestError> {
        let text = self.post(&token_request(&self.token)).await?;
        let first = extract_array(&text, "tokens")?
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::SourceProtocol(format!("token {} not found", self.token)))?;
        serde_json::from_value(first)
            .map_err(|e| IngestError::SourceProtocol(format!("malformed token metadata: {e}")))
    }

    /// One POST; returns the body of a 2xx response.
    async fn post(&self, body: &Value) -> Result<String, IngestError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(IngestError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(IngestError::Transport(format!("HTTP {}: {}", status.as_u16(), snippet(&text))));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(IngestError::SourceProtocol(format!(
                "HTTP {}: {}",
                status.as_u16(),
                snippet(&text)
            )));
        }

        resp.text()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))
    }
}

#[async_trait]
impl SourceClient for SubgraphClient {
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Page, IngestError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.fetch_window(cursor, now).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Turn `tokenHourDatas` items into a page.
///
/// Items whose `periodStartUnix` can't be read are passed on without a
/// height so the normalizer rejects them individually. The page only claims
/// more data when it is full and the cursor actually moves.
pub fn page_from_items(items: Vec<Value>, cursor: &Cursor, page_size: u32) -> Page {
    let full = items.len() >= page_size as usize;
    let records: Vec<RawRecord> = items
        .into_iter()
        .map(|fields| {
            let period = period_start(&fields);
            RawRecord {
                id: period.map(|p| p.to_string()),
                height: period,
                timestamp: period.map(|p| p as i64),
                fields,
            }
        })
        .collect();

    let next = records
        .iter()
        .filter_map(|r| r.height)
        .max()
        .filter(|h| *h > cursor.height);
    match next {
        Some(height) => Page {
            records,
            next_cursor: Cursor::genesis(height),
            has_more: full,
        },
        None => Page {
            records,
            next_cursor: cursor.clone(),
            has_more: false,
        },
    }
}

fn period_start(fields: &Value) -> Option<u64> {
    match fields.get("periodStartUnix")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
