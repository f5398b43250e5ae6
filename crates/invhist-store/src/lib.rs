//! invhist Store - SQLite persistence for the versioning engine
//!
//! Provides:
//! - Connection helpers and a checksummed migration framework
//! - Per-kind DDL generated from a resource schema descriptor
//! - The versioned store: current view, interval history, stale sweep
//! - Read-only history queries and the cycle ledger

pub mod db;
pub mod ddl;
pub mod errors;
pub mod ledger;
pub mod migrations;
pub mod query;
mod values;
pub mod versioned;

// Re-export key types
pub use errors::Result;
pub use ledger::{CycleCounts, CycleRun, CycleStatus};
pub use query::{ChildHistoryEntry, HistoricalState, HistoryEntry};
pub use versioned::{UpsertOutcome, VersionedStore};
