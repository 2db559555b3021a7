//! `chainingest status | reset | query`: read and reset stored state.

use anyhow::Result;
use serde_json::json;

use chainingest_core::{AppConfig, CheckpointStore, MetadataStore, RecordFilter, RecordStore};
use chainingest_storage::SqliteStorage;

pub async fn status(config: &AppConfig, storage: &SqliteStorage, as_json: bool) -> Result<()> {
    let checkpoints = storage.list().await?;

    let mut ids: Vec<String> = config.sources.iter().map(|s| s.id.clone()).collect();
    for cp in &checkpoints {
        if !ids.contains(&cp.source_id) {
            ids.push(cp.source_id.clone());
        }
    }

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let checkpoint = checkpoints.iter().find(|cp| cp.source_id == id);
        let records = storage.record_count(Some(&id)).await?;
        let symbol = storage
            .metadata(&id)
            .await?
            .and_then(|m| m.get("symbol").and_then(|s| s.as_str()).map(String::from));
        rows.push(json!({
            "source": id,
            "configured": config.source(&id).is_some(),
            "symbol": symbol,
            "cursor": checkpoint.map(|cp| cp.cursor.to_string()),
            "updated_at": checkpoint.map(|cp| cp.updated_at),
            "records": records,
        }));
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<16} {:<8} {:>14} {:>10}  {}", "SOURCE", "SYMBOL", "CURSOR", "RECORDS", "UPDATED");
    for row in &rows {
        let updated = row["updated_at"]
            .as_i64()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| "never".into());
        let mut source = row["source"].as_str().unwrap_or_default().to_string();
        if row["configured"] == false {
            source.push_str(" (orphan)");
        }
        println!(
            "{:<16} {:<8} {:>14} {:>10}  {}",
            source,
            row["symbol"].as_str().unwrap_or("-"),
            row["cursor"].as_str().unwrap_or("-"),
            row["records"],
            updated
        );
    }
    Ok(())
}

pub async fn reset(storage: &SqliteStorage, source: &str, purge: bool) -> Result<()> {
    let previous = storage.load(source).await?;
    storage.delete(source).await?;
    match previous {
        Some(cp) => println!("✓ Checkpoint of '{source}' at {} deleted", cp.cursor),
        None => println!("  '{source}' had no checkpoint"),
    }

    if purge {
        let removed = storage.purge_source(source).await?;
        println!("✓ {removed} record(s) of '{source}' deleted");
    }
    Ok(())
}

pub async fn query(storage: &SqliteStorage, filter: &RecordFilter) -> Result<()> {
    for record in storage.query(filter).await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
