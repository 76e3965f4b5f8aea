//! Vellum CLI - snapshot operator tools

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vellum_core::SnapshotConfig;

#[derive(Parser)]
#[command(name = "vellum")]
#[command(about = "Inspect, verify and move Vellum state snapshots")]
#[command(version)]
struct Cli {
    /// Data directory holding the snapshot database
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Configuration file (JSON); overrides --data-dir
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored snapshots
    List,

    /// Print a JSON summary of a stored snapshot
    Inspect {
        /// Block height of the snapshot
        height: u64,
    },

    /// Rebuild the tree from a stored snapshot and check its root hash
    Verify {
        /// Block height of the snapshot
        height: u64,
    },

    /// Write a stored snapshot to a directory as offer.json plus chunk files
    Export {
        /// Block height of the snapshot
        height: u64,

        /// Output directory
        out_dir: PathBuf,
    },

    /// Verify an exported snapshot directory and add it to the store
    Import {
        /// Directory written by `export`
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SnapshotConfig::from_file(path)?,
        None => SnapshotConfig {
            data_dir: cli.data_dir.clone(),
            ..SnapshotConfig::default()
        },
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let store = commands::open_store(&config)?;

    match cli.command {
        Commands::List => {
            let rows = commands::list(&store)?;
            if rows.is_empty() {
                println!("No snapshots found.");
            } else {
                println!("{:<12} {:<8} {}", "Height", "Chunks", "Hash");
                println!("{:-<12} {:-<8} {:-<64}", "", "", "");
                for row in rows {
                    println!("{:<12} {:<8} {}", row.height, row.chunks, row.hash);
                }
            }
        }

        Commands::Inspect { height } => {
            let summary = commands::inspect(&store, height)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Verify { height } => match commands::verify(&store, height) {
            Ok(hash) => {
                println!("Snapshot {} verified", height);
                println!("Root hash: {}", hash.to_hex());
            }
            Err(e) => {
                eprintln!("Verification failed: {:#}", e);
                std::process::exit(1);
            }
        },

        Commands::Export { height, out_dir } => {
            let written = commands::export(&store, height, &out_dir)?;
            println!("Exported snapshot {} ({} chunks) to {}", height, written, out_dir.display());
        }

        Commands::Import { dir } => {
            let height = commands::import(&store, &dir)?;
            println!("Imported snapshot {} from {}", height, dir.display());
        }
    }

    Ok(())
}
