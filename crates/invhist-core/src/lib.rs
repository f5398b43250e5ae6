//! invhist Core - canonical model, normalizer and differ
//!
//! This crate holds everything about the versioning engine that does not
//! touch storage:
//! - Structured error facility (`ExError`, `ExErrorKind`)
//! - Structured logging facility and macros
//! - Declarative resource schemas and the canonical resource model
//! - The generic normalizer driven by a schema descriptor
//! - The differ producing per-resource change verdicts

pub mod diff;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod normalize;

// Logging macros reach schema constants through this path.
pub use invhist_core_types;

// Re-export commonly used types
pub use diff::{diff, ChangeClass, Verdict};
pub use errors::{ExError, ExErrorKind, NormalizeError, Result};
pub use model::{
    CanonicalResource, ChildRecord, ChildSpec, Comparator, CurrentRecord, FieldSpec, FieldType,
    RawResource, ResourceSchema,
};
pub use normalize::{normalize, MappedResource, ResourceKind};
