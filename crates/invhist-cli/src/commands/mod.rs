pub mod ingest;
pub mod migrate;
pub mod query;

use invhist_core::logging_facility;
use invhist_engine::EngineConfig;
use std::path::PathBuf;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Load config, apply the `--db` override and start logging
pub fn load_config(db: Option<PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::load()?;
    if let Some(db) = db {
        config.db_path = db;
    }
    logging_facility::init(config.log_profile()?);
    Ok(config)
}
