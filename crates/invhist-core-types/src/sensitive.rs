//! Redaction wrapper for provider session material
//!
//! Session identifiers handed to a `ClientProvider` are wrapped in
//! `Sensitive<T>` so that cycle spans and error messages never echo them.

use std::fmt;

/// Wrapper that prints as `***REDACTED***` in Debug and Display
///
/// # Example
///
/// ```
/// use invhist_core_types::Sensitive;
///
/// let session = Sensitive::new("sess-9f2c");
/// assert_eq!(format!("{:?}", session), "***REDACTED***");
/// assert_eq!(session.expose(), &"sess-9f2c");
/// ```
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the underlying value. Only client providers should need this.
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}

impl<T: Clone> Clone for Sensitive<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
