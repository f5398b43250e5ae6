//! Change detection between stored and freshly normalized resources.
//!
//! ```ignore
//! use invhist_core::diff::diff;
//!
//! let verdict = diff(stored.as_ref().map(|r| &r.resource), &fresh, schema);
//! if verdict.has_any_change() { /* re-version */ }
//! ```
//!
//! ## Guarantees
//!
//! - **Order insensitivity**: child collections are compared as multisets
//!   keyed by their natural key; input order never produces a change.
//! - **Independence**: the core verdict and each child kind's verdict are
//!   computed separately so the store can re-version only what moved.

pub mod engine;
pub mod model;

pub use engine::{diff, values_equal};
pub use model::{ChangeClass, Verdict};
