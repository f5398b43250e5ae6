//! invhist Engine - cycle orchestration
//!
//! Wires snapshot sources, resource kinds and the versioned store into
//! collection cycles:
//! - [`source`]: snapshot sources and scoped client acquisition
//! - [`kinds`]: built-in resource kinds
//! - [`reconciler`]: one (kind, scope) cycle
//! - [`pool`]: bounded fan-out over independent cycles
//! - [`config`]: engine configuration

pub mod config;
pub mod kinds;
pub mod pool;
pub mod reconciler;
pub mod source;

pub use config::EngineConfig;
pub use pool::{run_cycles, CycleJob, CycleReport};
pub use reconciler::{CycleResult, Reconciler};
pub use source::{ClientProvider, InventoryClient, JsonFileSource, ProviderSource, SnapshotSource, StaticSource};
