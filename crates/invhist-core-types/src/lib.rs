//! Core types shared across invhist facilities
//!
//! This crate provides foundational types used by the error, logging and
//! orchestration layers:
//!
//! - **Correlation types**: CycleId, CycleContext
//! - **Sensitive data**: Sensitive<T> marker for automatic redaction
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{CycleContext, CycleId};
pub use sensitive::Sensitive;
