//! chainingest CLI — run subgraph ingestion and manage its state.
//!
//! # Commands
//! ```text
//! chainingest run     [--source <id>]...
//! chainingest status  [--json]
//! chainingest reset   --source <id> [--purge]
//! chainingest query   [--source <id>] [--key <k>] [--from <h>] [--to <h>] [--limit <n>]
//! chainingest info
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chainingest_core::AppConfig;
use chainingest_storage::SqliteStorage;

mod cmd_inspect;
mod cmd_run;

#[derive(Parser)]
#[command(
    name = "chainingest",
    about = "Checkpointed, idempotent ingestion of subgraph data into SQLite",
    long_about = "
chainingest polls GraphQL subgraphs (Uniswap v3 tokenHourDatas), normalizes
each candle into a canonical record, upserts it into SQLite and checkpoints
the source cursor after every persisted batch.

ENVIRONMENT VARIABLES:
  CHAININGEST_CONFIG     Path to the YAML configuration file
  CHAININGEST_DATABASE   Overrides `database` from the configuration
  RUST_LOG               Overrides the configured log filter
",
    version
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, env = "CHAININGEST_CONFIG", default_value = "chainingest.yaml")]
    config: PathBuf,

    /// SQLite database path or URL (overrides the configuration)
    #[arg(long, global = true, env = "CHAININGEST_DATABASE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every configured source until Ctrl-C
    Run {
        /// Only run these sources (default: all)
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Show the checkpoint and record count of every source
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a source's checkpoint so it restarts from its genesis cursor
    Reset {
        #[arg(long)]
        source: String,
        /// Also delete the source's stored records
        #[arg(long)]
        purge: bool,
    },

    /// Print stored records as JSON lines, ordered by height
    Query {
        #[arg(long)]
        source: Option<String>,
        /// Exact identity key
        #[arg(long)]
        key: Option<String>,
        /// Lowest height (inclusive)
        #[arg(long)]
        from: Option<u64>,
        /// Highest height (inclusive)
        #[arg(long)]
        to: Option<u64>,
        #[arg(long, default_value_t = 100)]
        limit: u64,
    },

    /// Show version and configuration summary
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("load configuration '{}'", cli.config.display()))?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    chainingest_core::telemetry::init_tracing(&config.log);

    match cli.command {
        Commands::Run { sources } => cmd_run::run(&config, &sources).await,

        Commands::Status { json } => {
            let storage = open(&config).await?;
            cmd_inspect::status(&config, &storage, json).await
        }

        Commands::Reset { source, purge } => {
            let storage = open(&config).await?;
            cmd_inspect::reset(&storage, &source, purge).await
        }

        Commands::Query { source, key, from, to, limit } => {
            let storage = open(&config).await?;
            let filter = chainingest_core::RecordFilter {
                source_id: source,
                identity_key: key,
                from_height: from,
                to_height: to,
                limit: Some(limit),
            };
            cmd_inspect::query(&storage, &filter).await
        }

        Commands::Info => cmd_info(&config),
    }
}

async fn open(config: &AppConfig) -> Result<SqliteStorage> {
    SqliteStorage::open(&config.database)
        .await
        .with_context(|| format!("open database '{}'", config.database))
}

fn cmd_info(config: &AppConfig) -> Result<()> {
    println!("chainingest v{}", env!("CARGO_PKG_VERSION"));
    println!("  Database: {}", config.database);
    println!("  Storage backends: memory, SQLite");
    println!("  Sources:  {}", config.sources.len());
    for source in &config.sources {
        println!(
            "    - {} ({} {}) every {}s, page {} → {}",
            source.id,
            source.chain,
            source.token,
            source.poll_interval().as_secs(),
            source.page_size,
            source.endpoint
        );
    }
    Ok(())
}
