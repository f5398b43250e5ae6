//! invhist CLI
//!
//! Runs collection cycles from snapshot files and inspects stored history

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "invhist")]
#[command(about = "invhist - Versioned cloud inventory history", long_about = None)]
struct Cli {
    /// Database file (overrides config and INVHIST_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create ledger and per-kind tables
    Migrate(commands::migrate::MigrateArgs),
    /// Run one collection cycle from a snapshot file
    Ingest(commands::ingest::IngestArgs),
    /// Read current state, history and the cycle ledger
    Query(commands::query::QueryArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match commands::load_config(cli.db) {
        Ok(config) => match cli.command {
            Commands::Migrate(args) => commands::migrate::execute(args, &config),
            Commands::Ingest(args) => commands::ingest::execute(args, &config).await,
            Commands::Query(args) => commands::query::execute(args, &config),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
