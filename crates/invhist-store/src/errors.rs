//! Error handling for invhist-store
//!
//! Wraps the core ExError with store-specific constructors

use invhist_core::errors::{ExError, ExErrorKind};
use rusqlite::ErrorCode;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::ChecksumMismatch)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: recorded {}, computed {}",
            migration_id, expected, actual
        ))
}

/// Create a consistency violation for a resource whose history is broken
pub fn consistency_violation(op: &str, kind: &str, resource_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::ConsistencyViolation)
        .with_op(op)
        .with_resource_kind(kind)
        .with_resource_id(resource_id)
        .with_message(reason.to_string())
}

/// Create a database error from rusqlite::Error
///
/// Lock contention and constraint races are classified as `Concurrency` so
/// the orchestrator retries them; everything else is `Persistence`.
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    let kind = match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy)
        | Some(ErrorCode::DatabaseLocked)
        | Some(ErrorCode::ConstraintViolation) => ExErrorKind::Concurrency,
        _ => ExErrorKind::Persistence,
    };
    ExError::new(kind)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create a serialization error for a stored JSON column that no longer parses
pub fn corrupt_json(column: &str, err: serde_json::Error) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op("decode_column")
        .with_message(format!("Column {} holds invalid JSON: {}", column, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_retryable() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let ex = from_rusqlite(err);
        assert_eq!(ex.kind(), ExErrorKind::Concurrency);
        assert!(ex.is_retryable());
    }

    #[test]
    fn test_other_errors_are_persistence() {
        let ex = from_rusqlite(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(ex.kind(), ExErrorKind::Persistence);
    }
}
