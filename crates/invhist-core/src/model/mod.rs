//! Canonical data model
//!
//! - [`schema`]: the declarative descriptor every resource kind registers
//! - [`resource`]: raw snapshots, canonical resources and child records

pub mod resource;
pub mod schema;

pub use resource::{
    truncate_millis, Attributes, CanonicalResource, ChildRecord, CurrentRecord, NaturalKey,
    RawResource,
};
pub use schema::{ChildSpec, Comparator, FieldSpec, FieldType, ResourceSchema};
