//! Schema setup

use super::CliResult;
use clap::Args;
use invhist_engine::{kinds, EngineConfig};
use invhist_store::{db, ddl, migrations};

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Kinds to create tables for (all built-in kinds when omitted)
    #[arg(long = "kind")]
    pub kinds: Vec<String>,
}

pub fn execute(args: MigrateArgs, config: &EngineConfig) -> CliResult {
    let mut conn = db::open(&config.db_path)?;
    migrations::apply_migrations(&mut conn)?;

    let names: Vec<String> = if args.kinds.is_empty() {
        kinds::BUILTIN_KINDS.iter().map(|k| k.to_string()).collect()
    } else {
        args.kinds
    };

    for name in &names {
        let kind = kinds::builtin(name)?;
        let created = ddl::ensure_kind_schema(&mut conn, kind.schema())?;
        println!(
            "{}: {}",
            name,
            if created { "created" } else { "up to date" }
        );
    }
    Ok(())
}
