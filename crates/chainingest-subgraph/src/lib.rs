//! chainingest-subgraph — Uniswap v3 subgraph source for chainingest.
//!
//! - [`SubgraphClient`] pages `tokenHourDatas` for one token over HTTP
//! - [`TokenHourNormalizer`] turns candles into canonical records
//! - [`connect`] wires both up from a [`SourceConfig`], with retries

pub mod client;
pub mod graphql;
pub mod normalizer;

pub use client::SubgraphClient;
pub use graphql::TokenMetadata;
pub use normalizer::TokenHourNormalizer;

use chainingest_core::config::SourceConfig;
use chainingest_core::error::IngestError;
use chainingest_core::retry::RetryPolicy;
use chainingest_core::source::RetryingSource;

/// Largest `first` argument the hosted subgraph accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Build the retrying client and the normalizer for one configured source.
pub fn connect(
    config: &SourceConfig,
) -> Result<(RetryingSource<SubgraphClient>, TokenHourNormalizer), IngestError> {
    config.validate()?;
    if config.token.trim().is_empty() {
        return Err(IngestError::Config(format!("source '{}': token address is required", config.id)));
    }
    // Each window re-reads the cursor hour, so a page needs room for one more.
    if !(2..=MAX_PAGE_SIZE).contains(&config.page_size) {
        return Err(IngestError::Config(format!(
            "source '{}': page_size must be between 2 and {MAX_PAGE_SIZE}, got {}",
            config.id, config.page_size
        )));
    }
    let client = SubgraphClient::new(config)?;
    let normalizer = TokenHourNormalizer::new(config.chain.clone(), &config.token);
    Ok((
        RetryingSource::new(client, RetryPolicy::new(config.retry_config())),
        normalizer,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_requires_token() {
        let cfg = SourceConfig::new("wbtc", "https://example.invalid/subgraph");
        assert!(matches!(connect(&cfg), Err(IngestError::Config(_))));

        let mut cfg = cfg;
        cfg.token = "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599".into();
        let (source, normalizer) = connect(&cfg).unwrap();
        assert_eq!(source.inner().endpoint(), "https://example.invalid/subgraph");
        assert_eq!(
            normalizer.identity_key(3600),
            format!("{}:0x2260fac5e5542a773aa44fbcfedf7c193bc2c599:3600", cfg.chain)
        );
    }

    #[test]
    fn connect_bounds_page_size() {
        let mut cfg = SourceConfig::new("wbtc", "https://example.invalid/subgraph");
        cfg.token = "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599".into();

        cfg.page_size = MAX_PAGE_SIZE + 1;
        assert!(matches!(connect(&cfg), Err(IngestError::Config(ref m)) if m.contains("page_size")));
        cfg.page_size = 1;
        assert!(matches!(connect(&cfg), Err(IngestError::Config(_))));
        cfg.page_size = MAX_PAGE_SIZE;
        assert!(connect(&cfg).is_ok());
    }
}
