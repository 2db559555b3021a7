//! `chainingest run`: one orchestrator per source until Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use chainingest_core::{AppConfig, IngestError, IngestStats, MetadataStore, Orchestrator, SourceConfig};
use chainingest_storage::SqliteStorage;
use chainingest_subgraph::TokenHourNormalizer;

pub async fn run(config: &AppConfig, only: &[String]) -> Result<()> {
    let selected: Vec<&SourceConfig> = if only.is_empty() {
        config.sources.iter().collect()
    } else {
        only.iter()
            .map(|id| {
                config
                    .source(id)
                    .with_context(|| format!("source '{id}' is not configured"))
            })
            .collect::<Result<_>>()?
    };

    let storage = Arc::new(
        SqliteStorage::open(&config.database)
            .await
            .with_context(|| format!("open database '{}'", config.database))?,
    );

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<(String, Result<IngestStats, IngestError>)> = JoinSet::new();

    for source in selected {
        let (client, normalizer) = chainingest_subgraph::connect(source)
            .with_context(|| format!("configure source '{}'", source.id))?;
        let normalizer = with_metadata(source, &client, normalizer, storage.as_ref()).await;

        let mut orchestrator = Orchestrator::new(
            source.clone(),
            client,
            normalizer,
            storage.clone(),
            storage.clone(),
        );
        let token = cancel.child_token();
        let id = source.id.clone();
        tasks.spawn(async move {
            let result = orchestrator.run(token).await;
            (id, result)
        });
    }

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested, finishing in-flight batches");
                cancel.cancel();
            }
        }
    });

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(stats))) => {
                tracing::info!(
                    source = %id,
                    cycles = stats.cycles,
                    written = stats.written,
                    skipped = stats.skipped,
                    "source finished"
                );
            }
            Ok((id, Err(e))) => {
                tracing::error!(source = %id, error = %e, "source stopped");
                failed.push(format!("{id}: {e}"));
            }
            Err(e) => {
                tracing::error!(error = %e, "source task panicked");
                failed.push(e.to_string());
            }
        }
    }

    if !failed.is_empty() {
        bail!("{} source(s) stopped on errors:\n  {}", failed.len(), failed.join("\n  "));
    }
    Ok(())
}

/// Fetch and store the token's metadata, stamping its symbol into the
/// normalizer. Failures are logged and ingestion proceeds without it.
async fn with_metadata(
    source: &SourceConfig,
    client: &chainingest_core::RetryingSource<chainingest_subgraph::SubgraphClient>,
    normalizer: TokenHourNormalizer,
    store: &dyn MetadataStore,
) -> TokenHourNormalizer {
    let metadata = match client.inner().fetch_token().await {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!(source = %source.id, error = %e, "token metadata unavailable");
            return normalizer;
        }
    };

    match serde_json::to_value(&metadata) {
        Ok(json) => {
            if let Err(e) = store.upsert_metadata(&source.id, &json).await {
                tracing::warn!(source = %source.id, error = %e, "cannot store token metadata");
            }
        }
        Err(e) => tracing::warn!(source = %source.id, error = %e, "cannot encode token metadata"),
    }
    tracing::info!(source = %source.id, symbol = %metadata.symbol, name = %metadata.name, "token metadata loaded");
    normalizer.with_symbol(metadata.symbol)
}
