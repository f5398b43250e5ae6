//! Conversion between canonical JSON values and SQLite column values

use crate::errors::{corrupt_json, Result};
use chrono::{DateTime, Utc};
use invhist_core::errors::{ExError, ExErrorKind};
use invhist_core::model::FieldType;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Encode a canonical value for a column of type `ty`.
///
/// Bools are stored as 0/1 and opaque blobs as canonical JSON text.
pub(crate) fn to_sql(field: &str, ty: FieldType, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let encoded = match ty {
        FieldType::Text => value.as_str().map(|s| SqlValue::Text(s.to_string())),
        FieldType::Integer => value.as_i64().map(SqlValue::Integer),
        FieldType::Real => value.as_f64().map(SqlValue::Real),
        FieldType::Bool => value.as_bool().map(|b| SqlValue::Integer(i64::from(b))),
        FieldType::Json => Some(SqlValue::Text(value.to_string())),
    };
    encoded.ok_or_else(|| {
        ExError::new(ExErrorKind::Serialization)
            .with_op("encode_column")
            .with_message(format!(
                "Value for column {} does not match declared type {}",
                field,
                ty.name()
            ))
    })
}

/// Decode a stored column back into its canonical value.
pub(crate) fn from_sql(field: &str, ty: FieldType, value: SqlValue) -> Result<Value> {
    let decoded = match (ty, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldType::Json, SqlValue::Text(text)) => {
            serde_json::from_str(&text).map_err(|e| corrupt_json(field, e))?
        }
        (FieldType::Text, SqlValue::Text(text)) => Value::String(text),
        (FieldType::Integer, SqlValue::Integer(i)) => Value::from(i),
        (FieldType::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (FieldType::Real, SqlValue::Real(f)) => real(f),
        // SQLite may hand back an integral REAL as INTEGER
        (FieldType::Real, SqlValue::Integer(i)) => real(i as f64),
        (ty, other) => {
            return Err(ExError::new(ExErrorKind::Serialization)
                .with_op("decode_column")
                .with_message(format!(
                    "Column {} holds {:?}, expected {}",
                    field,
                    other.data_type(),
                    ty.name()
                )))
        }
    };
    Ok(decoded)
}

fn real(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(column: &str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        ExError::new(ExErrorKind::Serialization)
            .with_op("decode_column")
            .with_message(format!("Column {} holds out-of-range timestamp {}", column, ms))
    })
}
