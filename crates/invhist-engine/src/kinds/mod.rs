//! Built-in resource kinds
//!
//! Each kind is a schema descriptor plus a projection of the provider's
//! payload onto declared fields. Everything else is generic.

mod compute_instance;
mod storage_bucket;

pub use compute_instance::ComputeInstance;
pub use storage_bucket::StorageBucket;

use invhist_core::errors::{ExError, ExErrorKind, Result};
use invhist_core::model::RawResource;
use invhist_core::ResourceKind;
use serde_json::Value;
use std::sync::Arc;

/// Names accepted by [`builtin`]
pub const BUILTIN_KINDS: &[&str] = &["compute_instance", "storage_bucket"];

/// Look up a built-in kind by name.
///
/// # Errors
///
/// `UnknownKind` for any name not in [`BUILTIN_KINDS`].
pub fn builtin(name: &str) -> Result<Arc<dyn ResourceKind>> {
    match name {
        "compute_instance" => Ok(Arc::new(ComputeInstance::new())),
        "storage_bucket" => Ok(Arc::new(StorageBucket::new())),
        other => Err(ExError::new(ExErrorKind::UnknownKind)
            .with_op("builtin_kind")
            .with_resource_kind(other)
            .with_message(format!("known kinds: {}", BUILTIN_KINDS.join(", ")))),
    }
}

/// Identity at `pointer`, accepting both string and numeric IDs
pub(crate) fn id_at(raw: &RawResource, pointer: &str) -> Option<String> {
    match raw.as_value().pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Last path segment of a provider URL (`.../zones/us-east1-b` to
/// `us-east1-b`). Non-strings pass through so type checks still apply.
pub(crate) fn last_segment(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.rsplit('/').next().unwrap_or_default().to_string()),
        other => other,
    }
}
