//! Lineage CLI
//!
//! A command-line interface for the lineage graph engine. Every command
//! loads the stored graph, runs, and writes the graph back if it changed.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lineage_core::{BatchId, Extractor, JsonLinesExtractor, NodeId};
use lineage_engine::{EngineConfig, IngestionMerger, QueryApi, QueryRequest};
use lineage_store::{init_memory, init_persistent, MemoryGraphStore, Repository, SharedGraph, Snapshot};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lineage - data lineage graph for datasets, columns and processes
#[derive(Parser)]
#[command(name = "lineage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (defaults to ~/.lineage/data)
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long, global = true)]
    memory: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Abort queries running longer than this many milliseconds
    #[arg(long, global = true)]
    deadline_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge an extraction batch from a JSON-lines file
    Ingest {
        /// Path to the .jsonl file
        path: PathBuf,
    },

    /// Withdraw everything a batch contributed
    Retract {
        /// Batch id (`extractor:run_id`)
        batch_id: String,
    },

    /// Show what a node is derived from
    Upstream {
        /// Node id (e.g., dataset:mssql:dw.dbo.dimcustomer)
        node: String,

        /// Maximum hops
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Show what is derived from a node
    Downstream {
        /// Node id (e.g., dataset:mssql:dw.dbo.dimcustomer)
        node: String,

        /// Maximum hops
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Score everything downstream of a node by proximity
    Impact {
        /// Node id
        node: String,
    },

    /// Report directed cycles
    Cycles,

    /// Fewest-hop route between two nodes
    Path {
        /// Start node id
        from: String,

        /// End node id
        to: String,
    },

    /// Find nodes by display name
    Lookup {
        /// Display name (case-insensitive)
        name: String,
    },

    /// Show graph statistics
    Stats,

    /// List merged batches
    Batches,

    /// Mark nodes unrefreshed past the staleness window as stale
    Sweep,

    /// Delete the local database (fresh start)
    ResetDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging; stdout is reserved for JSON output
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::ResetDb = &cli.command {
        let db_path = resolve_db_path(&cli.db_path)?;
        if db_path.exists() {
            std::fs::remove_dir_all(&db_path)
                .with_context(|| format!("Failed to remove db at {}", db_path.display()))?;
            println!("✓ Removed database at {}", db_path.display());
        } else {
            println!("Database not found at {}, nothing to remove", db_path.display());
        }
        return Ok(());
    }

    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        let db_path = resolve_db_path(&cli.db_path)?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        info!("Using database at {}", db_path.display());
        init_persistent(&db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?
    };
    let repo = Repository::new(db);

    let mut config = EngineConfig::from_env();
    if let Some(ms) = cli.deadline_ms {
        config = config.with_query_deadline(Duration::from_millis(ms));
    }

    let snapshot = repo
        .load_snapshot()
        .await
        .context("Failed to load stored graph")?;
    let mut store = MemoryGraphStore::new();
    let log = snapshot.restore_into(&mut store)?;
    let graph = SharedGraph::new(store);
    let merger = IngestionMerger::with_log(graph.clone(), config.clone(), log);
    let api = QueryApi::new(graph, config);

    match cli.command {
        Commands::Ingest { path } => {
            let extractor = JsonLinesExtractor::from_path(&path);
            info!(extractor = extractor.name(), "Reading batch from {}", path.display());
            let batch = extractor
                .extract()
                .with_context(|| format!("Failed to read batch from {}", path.display()))?;
            let report = merger.merge(&batch)?;
            persist(&repo, &merger).await?;
            print_json(&report)?;
        }
        Commands::Retract { batch_id } => {
            let report = merger.retract(&BatchId::new(batch_id), Utc::now())?;
            persist(&repo, &merger).await?;
            print_json(&report)?;
        }
        Commands::Sweep => {
            let marked = merger.sweep_stale(Utc::now())?;
            persist(&repo, &merger).await?;
            print_json(&serde_json::json!({ "nodesMarkedStale": marked }))?;
        }
        Commands::Batches => {
            print_json(&merger.merge_log())?;
        }
        query => {
            let request = into_request(&query).context("not a query command")?;
            let response = api.execute(&request)?;
            print_json(&response)?;
        }
    }

    Ok(())
}

/// Map a read-only command onto its query; `None` for commands that write
fn into_request(command: &Commands) -> Option<QueryRequest> {
    let request = match command {
        Commands::Upstream { node, depth } => QueryRequest::Upstream {
            node: NodeId::normalize(node),
            depth: *depth,
        },
        Commands::Downstream { node, depth } => QueryRequest::Downstream {
            node: NodeId::normalize(node),
            depth: *depth,
        },
        Commands::Impact { node } => QueryRequest::Impact {
            node: NodeId::normalize(node),
        },
        Commands::Cycles => QueryRequest::Cycles,
        Commands::Path { from, to } => QueryRequest::Path {
            from: NodeId::normalize(from),
            to: NodeId::normalize(to),
        },
        Commands::Lookup { name } => QueryRequest::Lookup { name: name.clone() },
        Commands::Stats => QueryRequest::Stats,
        Commands::Ingest { .. }
        | Commands::Retract { .. }
        | Commands::Batches
        | Commands::Sweep
        | Commands::ResetDb => return None,
    };
    Some(request)
}

fn resolve_db_path(explicit: &Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let mut path = dirs::home_dir().context("Could not find home directory")?;
    path.push(".lineage");
    path.push("data");
    Ok(path)
}

async fn persist(repo: &Repository, merger: &IngestionMerger<MemoryGraphStore>) -> Result<()> {
    let log = merger.merge_log();
    let snapshot = {
        let view = merger.graph().read();
        Snapshot::capture(&*view, log.iter())
    };
    repo.save_snapshot(&snapshot)
        .await
        .context("Failed to save graph")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
