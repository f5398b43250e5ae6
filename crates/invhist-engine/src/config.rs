//! Engine configuration loading
//!
//! Loads configuration from the TOML file named by `INVHIST_CONFIG` (or
//! `invhist.toml` in the working directory). A `.env` file is honoured, and
//! `INVHIST_DB_PATH` / `INVHIST_MAX_CONCURRENT_CYCLES` override the file.

use invhist_core::errors::{ExError, ExErrorKind, Result};
use invhist_core::logging_facility::Profile;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// SQLite database shared by every resource kind
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Deadline for one snapshot fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Deadline for a whole cycle, fetch included
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,

    /// Upper bound on cycles the pool runs at once
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,

    #[serde(default = "default_log_profile")]
    pub log_profile: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("invhist.db")
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_cycle_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent_cycles() -> usize {
    4
}

fn default_log_profile() -> String {
    "development".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            max_concurrent_cycles: default_max_concurrent_cycles(),
            log_profile: default_log_profile(),
        }
    }
}

impl EngineConfig {
    pub const ENV_CONFIG_PATH: &'static str = "INVHIST_CONFIG";
    pub const ENV_DB_PATH: &'static str = "INVHIST_DB_PATH";
    pub const ENV_MAX_CONCURRENT: &'static str = "INVHIST_MAX_CONCURRENT_CYCLES";
    const DEFAULT_CONFIG_FILENAME: &'static str = "invhist.toml";

    /// Load configuration from the environment and the config file, falling
    /// back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on an unreadable or invalid file or override.
    pub fn load() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let path = std::env::var(Self::ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME));

        let mut cfg = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the file cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("failed to read config at {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML or out-of-range values.
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(contents)
            .map_err(|e| config_error(format!("failed to parse config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when an override does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(Self::ENV_DB_PATH) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(limit) = lookup(Self::ENV_MAX_CONCURRENT) {
            self.max_concurrent_cycles = limit.trim().parse().map_err(|_| {
                config_error(format!(
                    "{} must be a positive integer, got '{}'",
                    Self::ENV_MAX_CONCURRENT,
                    limit
                ))
            })?;
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    /// # Errors
    ///
    /// `InvalidConfig` when `log_profile` names no known profile.
    pub fn log_profile(&self) -> Result<Profile> {
        self.log_profile.parse::<Profile>().map_err(config_error)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 || self.cycle_timeout_secs == 0 {
            return Err(config_error("timeouts must be at least one second"));
        }
        if self.fetch_timeout_secs > self.cycle_timeout_secs {
            return Err(config_error(
                "fetch_timeout_secs cannot exceed cycle_timeout_secs",
            ));
        }
        if self.max_concurrent_cycles == 0 {
            return Err(config_error("max_concurrent_cycles must be at least 1"));
        }
        self.log_profile()?;
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidConfig)
        .with_op("load_config")
        .with_message(message)
}
