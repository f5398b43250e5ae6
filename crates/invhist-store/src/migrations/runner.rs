//! Migration runner
//!
//! Applies migrations inside a transaction each, records them with a
//! checksum, and refuses to continue when a recorded checksum disagrees with
//! the SQL the binary would apply.

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::embedded::get_migrations;
use rusqlite::{Connection, OptionalExtension};

/// Apply all pending embedded migrations to the database
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    create_schema_version_table(conn)?;

    for migration in get_migrations() {
        register_migration(conn, migration.id, migration.sql)?;
    }

    Ok(())
}

/// Create the schema_version table if it doesn't exist
fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(from_rusqlite)?;

    Ok(())
}

/// Apply one migration unless it is already recorded.
///
/// # Errors
///
/// - `ChecksumMismatch` when the migration was applied with different SQL
/// - `Persistence` when the SQL fails; the transaction is rolled back
pub fn register_migration(conn: &mut Connection, migration_id: &str, sql: &str) -> Result<bool> {
    create_schema_version_table(conn)?;
    let checksum = compute_checksum(sql);

    let recorded: Option<Option<String>> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?",
            [migration_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    if let Some(recorded) = recorded {
        return match recorded {
            Some(existing) if existing != checksum => {
                Err(checksum_mismatch(migration_id, &existing, &checksum))
            }
            _ => Ok(false),
        };
    }

    let tx = conn.transaction().map_err(from_rusqlite)?;

    tx.execute_batch(sql)
        .map_err(|e| migration_error(migration_id, &e.to_string()))?;

    let now = chrono::Utc::now().timestamp_millis();
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?, ?, ?)",
        rusqlite::params![migration_id, now, checksum],
    )
    .map_err(from_rusqlite)?;

    tx.commit().map_err(from_rusqlite)?;

    tracing::debug!(migration_id = %migration_id, "Applied migration");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use invhist_core::ExErrorKind;

    #[test]
    fn test_apply_migrations_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        apply_migrations(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_register_reports_whether_applied() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(register_migration(&mut conn, "t1", "CREATE TABLE t1 (x INTEGER)").unwrap());
        assert!(!register_migration(&mut conn, "t1", "CREATE TABLE t1 (x INTEGER)").unwrap());
    }

    #[test]
    fn test_changed_sql_is_a_checksum_mismatch() {
        let mut conn = Connection::open_in_memory().unwrap();
        register_migration(&mut conn, "t1", "CREATE TABLE t1 (x INTEGER)").unwrap();
        let err = register_migration(&mut conn, "t1", "CREATE TABLE t1 (y TEXT)").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::ChecksumMismatch);
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(register_migration(&mut conn, "bad", "CREATE TABLE (").is_err());
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_version WHERE migration_id = 'bad'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
