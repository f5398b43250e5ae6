//! Raw snapshot to canonical resource conversion
//!
//! Per-kind code implements [`ResourceKind`]: a schema descriptor plus a
//! projection of the provider's payload onto declared field names. The
//! generic [`normalize`] then enforces the descriptor: it coerces every value
//! to its declared type, fills absent fields with null, rejects anything
//! undeclared and canonicalizes opaque JSON. Normalization is all or nothing.

use crate::errors::{ExError, NormalizeError};
use crate::model::{
    truncate_millis, Attributes, CanonicalResource, ChildRecord, FieldSpec, FieldType,
    RawResource, ResourceSchema,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Output of a per-kind mapper, before type enforcement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedResource {
    pub id: String,
    pub attributes: Attributes,
    pub children: BTreeMap<String, Vec<ChildRecord>>,
}

impl MappedResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn children(mut self, child: impl Into<String>, records: Vec<ChildRecord>) -> Self {
        self.children.insert(child.into(), records);
        self
    }
}

/// Per-kind adapter from provider payloads to the canonical shape
pub trait ResourceKind: Send + Sync {
    fn schema(&self) -> &ResourceSchema;

    /// Best-effort identity extraction, used even when `map` fails so that a
    /// resource that is present but malformed is never swept as stale.
    fn resource_id(&self, raw: &RawResource) -> Option<String>;

    /// # Errors
    ///
    /// Returns a `NormalizeError` when the payload cannot be mapped.
    fn map(&self, raw: &RawResource) -> Result<MappedResource, NormalizeError>;
}

/// Normalize one raw snapshot for `scope` observed at `collected_at`.
///
/// # Errors
///
/// `MalformedInput` (or `Serialization` for opaque blobs) with the resource
/// kind and, when known, the resource ID attached.
pub fn normalize(
    kind: &dyn ResourceKind,
    raw: &RawResource,
    scope: &str,
    collected_at: DateTime<Utc>,
) -> Result<CanonicalResource, ExError> {
    let schema = kind.schema();
    let attach = |err: NormalizeError| {
        let ex = ExError::from(err)
            .with_resource_kind(schema.kind.clone())
            .with_scope(scope);
        match kind.resource_id(raw) {
            Some(id) => ex.with_resource_id(id),
            None => ex,
        }
    };

    let mapped = kind.map(raw).map_err(attach)?;
    canonicalize(schema, mapped, scope, collected_at).map_err(attach)
}

/// Enforce `schema` over an already-mapped resource.
///
/// # Errors
///
/// Any `NormalizeError` raised by type enforcement.
pub fn canonicalize(
    schema: &ResourceSchema,
    mapped: MappedResource,
    scope: &str,
    collected_at: DateTime<Utc>,
) -> Result<CanonicalResource, NormalizeError> {
    let id = mapped.id.trim().to_string();
    if id.is_empty() {
        return Err(NormalizeError::MissingId);
    }

    let attributes = coerce_attributes(&schema.fields, mapped.attributes)?;

    let mut children = BTreeMap::new();
    let mut mapped_children = mapped.children;
    if let Some(child) = mapped_children
        .keys()
        .find(|name| schema.child_spec(name).is_none())
    {
        return Err(NormalizeError::UndeclaredChild {
            child: child.clone(),
        });
    }
    for spec in &schema.children {
        let records = mapped_children.remove(&spec.name).unwrap_or_default();
        let mut canonical = Vec::with_capacity(records.len());
        for record in records {
            let attributes = coerce_attributes(&spec.fields, record.attributes)?;
            for key in &spec.key_fields {
                if attributes.get(key).map_or(true, Value::is_null) {
                    return Err(NormalizeError::MissingNaturalKey {
                        child: spec.name.clone(),
                        field: key.clone(),
                    });
                }
            }
            canonical.push(ChildRecord { attributes });
        }
        children.insert(spec.name.clone(), canonical);
    }

    Ok(CanonicalResource {
        id,
        scope: scope.to_string(),
        collected_at: truncate_millis(collected_at),
        attributes,
        children,
    })
}

fn coerce_attributes(
    fields: &[FieldSpec],
    mut raw: Attributes,
) -> Result<Attributes, NormalizeError> {
    let mut out = Attributes::new();
    for field in fields {
        let value = raw.remove(&field.name).unwrap_or(Value::Null);
        out.insert(field.name.clone(), coerce(field, value)?);
    }
    if let Some(extra) = raw.into_keys().next() {
        return Err(NormalizeError::UndeclaredField { field: extra });
    }
    Ok(out)
}

/// Coerce one value to the field's declared type.
///
/// Integers and reals are also accepted as decimal strings since several
/// provider APIs encode int64 that way.
fn coerce(field: &FieldSpec, value: Value) -> Result<Value, NormalizeError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = |value: &Value| NormalizeError::TypeMismatch {
        field: field.name.clone(),
        expected: field.ty.name(),
        actual: type_name(value).to_string(),
    };

    match field.ty {
        FieldType::Text => match value {
            Value::String(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        FieldType::Bool => match value {
            Value::Bool(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        FieldType::Integer => {
            let parsed = match &value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            parsed.map(Value::from).ok_or_else(|| mismatch(&value))
        }
        FieldType::Real => {
            let parsed = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            let f = parsed.ok_or_else(|| mismatch(&value))?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| NormalizeError::NonFiniteNumber {
                    field: field.name.clone(),
                })
        }
        FieldType::Json => {
            let text = serde_json::to_string(&value).map_err(|e| NormalizeError::Serialization {
                field: field.name.clone(),
                reason: e.to_string(),
            })?;
            serde_json::from_str(&text).map_err(|e| NormalizeError::Serialization {
                field: field.name.clone(),
                reason: e.to_string(),
            })
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;
    use crate::model::{ChildSpec, FieldSpec};
    use serde_json::json;

    struct Widget {
        schema: ResourceSchema,
    }

    impl Widget {
        fn new() -> Self {
            Self {
                schema: ResourceSchema::new("widget")
                    .field(FieldSpec::text("title"))
                    .field(FieldSpec::integer("size"))
                    .field(FieldSpec::real("ratio"))
                    .field(FieldSpec::boolean("enabled"))
                    .field(FieldSpec::json("metadata"))
                    .child(ChildSpec::key_value("labels")),
            }
        }
    }

    impl ResourceKind for Widget {
        fn schema(&self) -> &ResourceSchema {
            &self.schema
        }

        fn resource_id(&self, raw: &RawResource) -> Option<String> {
            raw.str_at("/id").map(str::to_string)
        }

        fn map(&self, raw: &RawResource) -> Result<MappedResource, NormalizeError> {
            let labels = raw
                .entries_at("/labels")
                .into_iter()
                .map(|(k, v)| ChildRecord::new().with("key", k).with("value", v.clone()))
                .collect();
            Ok(MappedResource::new(raw.str_at("/id").unwrap_or_default())
                .attr("title", raw.value_at("/title"))
                .attr("size", raw.value_at("/size"))
                .attr("ratio", raw.value_at("/ratio"))
                .attr("enabled", raw.value_at("/enabled"))
                .attr("metadata", raw.value_at("/metadata"))
                .children("labels", labels))
        }
    }

    fn run(raw: Value) -> Result<CanonicalResource, ExError> {
        normalize(&Widget::new(), &RawResource::new(raw), "proj-a", Utc::now())
    }

    #[test]
    fn test_normalize_fills_every_declared_field() {
        let resource = run(json!({"id": "w-1", "title": "A"})).unwrap();

        assert_eq!(resource.id, "w-1");
        assert_eq!(resource.scope, "proj-a");
        assert_eq!(resource.get("title"), &json!("A"));
        assert_eq!(resource.get("size"), &Value::Null);
        assert_eq!(resource.attributes.len(), 5);
        assert!(resource.children.contains_key("labels"));
    }

    #[test]
    fn test_integer_accepts_decimal_string() {
        let resource = run(json!({"id": "w-1", "size": "42"})).unwrap();
        assert_eq!(resource.get("size"), &json!(42));
    }

    #[test]
    fn test_real_is_always_float() {
        let resource = run(json!({"id": "w-1", "ratio": 3})).unwrap();
        assert_eq!(resource.get("ratio"), &json!(3.0));
    }

    #[test]
    fn test_type_mismatch_is_malformed_input() {
        let err = run(json!({"id": "w-1", "enabled": "yes"})).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::MalformedInput);
        assert_eq!(err.resource_id(), Some("w-1"));
        assert_eq!(err.resource_kind(), Some("widget"));
        assert!(err.message().contains("enabled"));
    }

    #[test]
    fn test_missing_id_is_malformed_input() {
        let err = run(json!({"title": "A"})).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::MalformedInput);
        assert_eq!(err.resource_id(), None);
    }

    #[test]
    fn test_json_blob_passes_through_unchanged() {
        let blob = json!({"b": [1, 2], "a": {"nested": true}});
        let resource = run(json!({"id": "w-1", "metadata": blob.clone()})).unwrap();
        assert_eq!(resource.get("metadata"), &blob);
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let raw = json!({"id": "w-1", "title": "A", "labels": {"b": "2", "a": "1"}});
        let at = Utc::now();
        let kind = Widget::new();
        let a = normalize(&kind, &RawResource::new(raw.clone()), "p", at).unwrap();
        let b = normalize(&kind, &RawResource::new(raw), "p", at).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_undeclared_field_rejected() {
        let schema = Widget::new().schema;
        let mapped = MappedResource::new("w-1").attr("colour", "red");
        let err = canonicalize(&schema, mapped, "p", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::UndeclaredField {
                field: "colour".to_string()
            }
        );
    }

    #[test]
    fn test_undeclared_child_rejected() {
        let schema = Widget::new().schema;
        let mapped = MappedResource::new("w-1").children("disks", vec![]);
        assert!(matches!(
            canonicalize(&schema, mapped, "p", Utc::now()),
            Err(NormalizeError::UndeclaredChild { .. })
        ));
    }

    #[test]
    fn test_child_without_key_rejected() {
        let schema = Widget::new().schema;
        let mapped = MappedResource::new("w-1")
            .children("labels", vec![ChildRecord::new().with("value", "x")]);
        assert!(matches!(
            canonicalize(&schema, mapped, "p", Utc::now()),
            Err(NormalizeError::MissingNaturalKey { .. })
        ));
    }
}
