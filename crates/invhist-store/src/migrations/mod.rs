//! Migration framework
//!
//! Provides:
//! - Migration runner with checksums and idempotent application
//! - Embedded SQL migrations for engine-wide tables
//! - Per-kind DDL registration, checksummed like any other migration

mod checksums;
mod embedded;
mod runner;

pub use checksums::compute_checksum;
pub use runner::{apply_migrations, register_migration};
