//! Raw snapshots, canonical resources and child records

use crate::model::schema::ChildSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat attribute bag, ordered by field name
pub type Attributes = BTreeMap<String, Value>;

/// Truncate a timestamp to the millisecond precision the store keeps.
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// One resource exactly as the snapshot source returned it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResource(pub Value);

impl RawResource {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Value at a JSON pointer (`/a/b/0`), `Null` when absent
    pub fn value_at(&self, pointer: &str) -> Value {
        self.0.pointer(pointer).cloned().unwrap_or(Value::Null)
    }

    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    /// Array at a JSON pointer, empty when absent or not an array
    pub fn array_at(&self, pointer: &str) -> &[Value] {
        self.0
            .pointer(pointer)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Object entries at a JSON pointer, empty when absent or not an object
    pub fn entries_at(&self, pointer: &str) -> Vec<(&str, &Value)> {
        self.0
            .pointer(pointer)
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default()
    }
}

/// Identity of a child record within its collection
///
/// Each component is the canonical JSON text of one key field, so keys of
/// any declared type order and compare consistently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey(Vec<String>);

impl NaturalKey {
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

/// One element of a child collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildRecord {
    pub attributes: Attributes,
}

impl ChildRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter used by per-kind mappers and tests
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&Value::Null)
    }

    /// Key values under their field comparators, so that keys equal to the
    /// differ are equal here too.
    pub fn natural_key(&self, spec: &ChildSpec) -> NaturalKey {
        NaturalKey(
            spec.key_fields
                .iter()
                .map(|k| {
                    let comparator = spec
                        .fields
                        .iter()
                        .find(|f| &f.name == k)
                        .map(|f| f.comparator)
                        .unwrap_or_default();
                    comparator.normalize(self.get(k)).to_string()
                })
                .collect(),
        )
    }

    /// Canonical text of the declared fields under their comparators
    pub(crate) fn comparable_text(&self, spec: &ChildSpec) -> String {
        let values = spec
            .fields
            .iter()
            .map(|f| f.comparator.normalize(self.get(&f.name)))
            .collect();
        Value::Array(values).to_string()
    }
}

/// Normalized, provider-agnostic representation of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResource {
    pub id: String,
    pub scope: String,
    pub collected_at: DateTime<Utc>,
    pub attributes: Attributes,
    /// Child collections keyed by child kind; every declared kind is present
    pub children: BTreeMap<String, Vec<ChildRecord>>,
}

impl CanonicalResource {
    pub fn get(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&Value::Null)
    }

    /// Records of one child kind, empty when the kind has none
    pub fn children_of(&self, child: &str) -> &[ChildRecord] {
        self.children
            .get(child)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// What the store returns from `load`: the current row plus lineage metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentRecord {
    pub resource: CanonicalResource,
    pub first_collected_at: DateTime<Utc>,
}
