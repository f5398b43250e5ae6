//! Declarative schema descriptors
//!
//! A [`ResourceSchema`] names a resource kind, lists its flat scalar fields
//! (each with a storage type and a comparator) and lists its child
//! collections (each with natural-key fields). The normalizer, the differ and
//! the store's DDL generator all drive off this one descriptor.

use crate::errors::{ExError, ExErrorKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Columns the store owns on parent tables
const RESERVED_PARENT_COLUMNS: &[&str] = &[
    "resource_id",
    "scope",
    "collected_at",
    "first_collected_at",
    "history_id",
    "valid_from",
    "valid_to",
];

/// Columns the store owns on child tables
const RESERVED_CHILD_COLUMNS: &[&str] = &["id", "resource_id", "history_id", "valid_from", "valid_to"];

/// Storage type of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Bool,
    /// Opaque pass-through blob, stored as canonical JSON text
    Json,
}

impl FieldType {
    /// SQLite column affinity
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text | FieldType::Json => "TEXT",
            FieldType::Integer | FieldType::Bool => "INTEGER",
            FieldType::Real => "REAL",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Bool => "bool",
            FieldType::Json => "json",
        }
    }
}

/// How two values of a field are compared by the differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[default]
    Exact,
    /// Text compared without regard to case
    IgnoreCase,
    /// JSON arrays compared as multisets
    UnorderedList,
}

impl Comparator {
    /// Representative of `value`'s equivalence class: two values compare
    /// equal exactly when their representatives are identical.
    pub fn normalize(self, value: &Value) -> Value {
        match (self, value) {
            (Comparator::IgnoreCase, Value::String(s)) => Value::String(s.to_lowercase()),
            (Comparator::UnorderedList, Value::Array(items)) => {
                let mut items = items.clone();
                items.sort_by_cached_key(Value::to_string);
                Value::Array(items)
            }
            _ => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    #[serde(default)]
    pub comparator: Comparator,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            comparator: Comparator::Exact,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Real)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }
}

/// A typed child collection attached to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    pub name: String,
    /// Fields that together identify a record within its collection
    pub key_fields: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl ChildSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_fields: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Declare a field that is part of the natural key
    pub fn key(mut self, field: FieldSpec) -> Self {
        self.key_fields.push(field.name.clone());
        self.fields.push(field);
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Key/value child collections (labels, tags) are common enough to get a shorthand.
    pub fn key_value(name: impl Into<String>) -> Self {
        Self::new(name)
            .key(FieldSpec::text("key"))
            .field(FieldSpec::text("value"))
    }
}

/// Descriptor for one resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub kind: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub children: Vec<ChildSpec>,
}

impl ResourceSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn child(mut self, child: ChildSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn child_spec(&self, name: &str) -> Option<&ChildSpec> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.name.as_str())
    }

    pub fn current_table(&self) -> String {
        format!("current_{}", self.kind)
    }

    pub fn current_child_table(&self, child: &str) -> String {
        format!("current_{}__{}", self.kind, child)
    }

    pub fn history_table(&self) -> String {
        format!("history_{}", self.kind)
    }

    pub fn history_child_table(&self, child: &str) -> String {
        format!("history_{}__{}", self.kind, child)
    }

    /// Check the descriptor before it is used to build SQL.
    ///
    /// Every name ends up interpolated into DDL and DML, so identifiers are
    /// restricted to `[a-z][a-z0-9_]*`. Kind and child names may not contain
    /// `__` or end in `_`: child tables are named `<kind>__<child>`, and
    /// kinds sharing a database file must never map to the same table.
    ///
    /// # Errors
    ///
    /// `InvalidSchema` on a bad identifier, a reserved column name, a
    /// duplicate field or child, or a child without a usable natural key.
    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.kind, "kind", &self.kind)?;
        check_table_segment(&self.kind, "kind", &self.kind)?;
        if self.fields.is_empty() {
            return Err(schema_error(&self.kind, "schema declares no fields"));
        }
        check_fields(&self.kind, "", &self.fields, RESERVED_PARENT_COLUMNS)?;

        let mut seen = BTreeSet::new();
        for child in &self.children {
            check_identifier(&self.kind, "child", &child.name)?;
            check_table_segment(&self.kind, "child", &child.name)?;
            if !seen.insert(child.name.as_str()) {
                return Err(schema_error(
                    &self.kind,
                    format!("duplicate child kind '{}'", child.name),
                ));
            }
            check_fields(&self.kind, &child.name, &child.fields, RESERVED_CHILD_COLUMNS)?;
            if child.key_fields.is_empty() {
                return Err(schema_error(
                    &self.kind,
                    format!("child '{}' declares no natural key", child.name),
                ));
            }
            for key in &child.key_fields {
                if child.field_spec(key).is_none() {
                    return Err(schema_error(
                        &self.kind,
                        format!("child '{}' key '{}' is not a declared field", child.name, key),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_fields(kind: &str, child: &str, fields: &[FieldSpec], reserved: &[&str]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for field in fields {
        check_identifier(kind, "field", &field.name)?;
        if reserved.contains(&field.name.as_str()) {
            return Err(schema_error(
                kind,
                format!("field '{}' in '{}' collides with a store column", field.name, child),
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(schema_error(
                kind,
                format!("duplicate field '{}' in '{}'", field.name, child),
            ));
        }
    }
    Ok(())
}

fn check_identifier(kind: &str, what: &str, ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = ident.len() <= 48
        && chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(schema_error(kind, format!("invalid {} name '{}'", what, ident)))
    }
}

fn check_table_segment(kind: &str, what: &str, ident: &str) -> Result<()> {
    if ident.contains("__") || ident.ends_with('_') {
        return Err(schema_error(
            kind,
            format!("{} name '{}' may not contain '__' or end in '_'", what, ident),
        ));
    }
    Ok(())
}

fn schema_error(kind: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidSchema)
        .with_op("validate_schema")
        .with_resource_kind(kind)
        .with_message(message)
}
