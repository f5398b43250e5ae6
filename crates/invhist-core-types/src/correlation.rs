//! Correlation types for cycle tracking
//!
//! Every collection cycle gets a `CycleId` so that log lines, ledger rows
//! and orchestrator retries can be tied back to one logical pass.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single collection cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(String);

impl CycleId {
    /// Generate a new CycleId using UUIDv7 (time ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context carried through one (resource-kind, scope) cycle
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cycle_id: CycleId,
    pub kind: String,
    pub scope: String,
}

impl CycleContext {
    /// Create a new context with a fresh CycleId
    pub fn new(kind: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            cycle_id: CycleId::new(),
            kind: kind.into(),
            scope: scope.into(),
        }
    }

    /// Reuse an existing CycleId (orchestrator-supplied)
    pub fn with_cycle_id(mut self, cycle_id: CycleId) -> Self {
        self.cycle_id = cycle_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_id_generation() {
        let id1 = CycleId::new();
        let id2 = CycleId::new();

        assert_ne!(id1, id2);
        assert!(!id1.as_str().is_empty());
    }

    #[test]
    fn test_cycle_ids_sort_by_creation() {
        let first = CycleId::new();
        let second = CycleId::new();
        assert!(first.as_str() < second.as_str());
    }

    #[test]
    fn test_cycle_context_with_cycle_id() {
        let id = CycleId::from_string("cycle-1".to_string());
        let ctx = CycleContext::new("compute_instance", "proj-a").with_cycle_id(id.clone());

        assert_eq!(ctx.cycle_id, id);
        assert_eq!(ctx.kind, "compute_instance");
        assert_eq!(ctx.scope, "proj-a");
    }

    #[test]
    fn test_serialization() {
        let id = CycleId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: CycleId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
