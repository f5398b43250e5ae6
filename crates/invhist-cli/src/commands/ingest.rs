//! One collection cycle from a JSON snapshot file

use super::CliResult;
use clap::Args;
use invhist_engine::{kinds, EngineConfig, JsonFileSource, Reconciler};
use invhist_store::VersionedStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long)]
    pub kind: String,

    #[arg(long)]
    pub scope: String,

    /// Array of raw resources, or an object keyed by scope
    #[arg(long)]
    pub file: PathBuf,
}

pub async fn execute(args: IngestArgs, config: &EngineConfig) -> CliResult {
    let kind = kinds::builtin(&args.kind)?;
    let store = Arc::new(VersionedStore::open(&config.db_path, kind.schema().clone())?);
    let source = Arc::new(JsonFileSource::new(&args.file));
    let reconciler = Reconciler::new(kind, store.clone(), source)?.with_config(config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = reconciler.run_cycle(&args.scope, &cancel).await?;

    println!("Cycle completed:");
    println!("  kind: {}", args.kind);
    println!("  scope: {}", args.scope);
    println!("  reconciled: {}", result.count);
    if let Some(run) = store.recent_cycles(&args.scope, 1)?.first() {
        println!("  created: {}", run.counts.created);
        println!("  updated: {}", run.counts.updated);
        println!("  unchanged: {}", run.counts.unchanged);
        println!("  skipped: {}", run.counts.skipped);
        println!("  swept: {}", run.counts.swept);
    }
    println!("  duration_ms: {}", result.duration_millis);
    Ok(())
}
