//! Read-only inspection of stored state

use super::CliResult;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use invhist_engine::{kinds, EngineConfig};
use invhist_store::VersionedStore;
use serde_json::{json, Value};

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[arg(long)]
    pub kind: String,

    #[command(subcommand)]
    pub command: QueryCommand,
}

#[derive(Debug, Subcommand)]
pub enum QueryCommand {
    /// Current resource IDs in a scope
    Current {
        #[arg(long)]
        scope: String,
    },
    /// Every version of one resource
    History {
        #[arg(long)]
        id: String,
    },
    /// One resource as it stood at an RFC 3339 instant
    AsOf {
        #[arg(long)]
        id: String,
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// Most recent cycles for a scope
    Cycles {
        #[arg(long)]
        scope: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

pub fn execute(args: QueryArgs, config: &EngineConfig) -> CliResult {
    let kind = kinds::builtin(&args.kind)?;
    let store = VersionedStore::open(&config.db_path, kind.schema().clone())?;

    let output = match args.command {
        QueryCommand::Current { scope } => json!(store.current_ids(&scope)?),
        QueryCommand::History { id } => Value::Array(
            store
                .history_for(&id)?
                .into_iter()
                .map(|entry| {
                    json!({
                        "history_id": entry.history_id,
                        "scope": entry.scope,
                        "valid_from": entry.valid_from.to_rfc3339(),
                        "valid_to": entry.valid_to.map(|t| t.to_rfc3339()),
                        "first_collected_at": entry.first_collected_at.to_rfc3339(),
                        "attributes": entry.attributes,
                    })
                })
                .collect(),
        ),
        QueryCommand::AsOf { id, at } => match store.as_of(&id, at)? {
            Some(state) => {
                let children: serde_json::Map<String, Value> = state
                    .children
                    .into_iter()
                    .map(|(name, records)| {
                        let records = records.into_iter().map(|r| json!(r.attributes)).collect();
                        (name, Value::Array(records))
                    })
                    .collect();
                json!({
                    "history_id": state.entry.history_id,
                    "valid_from": state.entry.valid_from.to_rfc3339(),
                    "valid_to": state.entry.valid_to.map(|t| t.to_rfc3339()),
                    "attributes": state.entry.attributes,
                    "children": children,
                })
            }
            None => Value::Null,
        },
        QueryCommand::Cycles { scope, limit } => Value::Array(
            store
                .recent_cycles(&scope, limit)?
                .into_iter()
                .map(|run| {
                    json!({
                        "cycle_id": run.cycle_id,
                        "status": run.status.as_str(),
                        "started_at": run.started_at.to_rfc3339(),
                        "finished_at": run.finished_at.to_rfc3339(),
                        "fetched": run.counts.fetched,
                        "created": run.counts.created,
                        "updated": run.counts.updated,
                        "unchanged": run.counts.unchanged,
                        "skipped": run.counts.skipped,
                        "swept": run.counts.swept,
                        "sweep_failures": run.counts.sweep_failures,
                        "error_code": run.error_code,
                    })
                })
                .collect(),
        ),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
