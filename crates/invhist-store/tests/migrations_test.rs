// Integration tests for the migration framework and per-kind registration

mod common;

use invhist_core::model::{ChildSpec, FieldSpec};
use invhist_core::ExErrorKind;
use invhist_store::ddl::ensure_kind_schema;
use invhist_store::migrations::apply_migrations;
use invhist_store::VersionedStore;
use rusqlite::Connection;

fn setup_test_db() -> Connection {
    Connection::open_in_memory().expect("Failed to create in-memory database")
}

fn get_table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

#[test]
fn test_apply_migrations_on_empty_db() {
    // Given: an empty SQLite database
    let mut conn = setup_test_db();

    // When: migrations are applied
    let result = apply_migrations(&mut conn);

    // Then: the engine-wide tables exist
    assert!(result.is_ok(), "Migrations should succeed: {:?}", result.err());
    let tables = get_table_names(&conn);
    assert!(tables.contains(&"schema_version".to_string()));
    assert!(tables.contains(&"cycle_runs".to_string()));
}

#[test]
fn test_kind_registration_recorded_with_checksum() {
    let mut conn = setup_test_db();
    apply_migrations(&mut conn).unwrap();
    ensure_kind_schema(&mut conn, &common::instance_schema()).unwrap();

    let checksum: String = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = 'kind_instance'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(checksum.len(), 64);

    let tables = get_table_names(&conn);
    for expected in [
        "current_instance",
        "current_instance__labels",
        "current_instance__disks",
        "history_instance",
        "history_instance__labels",
        "history_instance__disks",
    ] {
        assert!(tables.contains(&expected.to_string()), "Missing table: {}", expected);
    }
}

#[test]
fn test_reopening_with_drifted_schema_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drift.db");
    VersionedStore::open(&path, common::instance_schema()).unwrap();

    // When: the same kind is opened with an extra field
    let drifted = common::instance_schema().field(FieldSpec::text("hostname"));
    let err = VersionedStore::open(&path, drifted).err().expect("should fail");

    // Then: the mismatch is reported instead of silently diverging
    assert_eq!(err.kind(), ExErrorKind::ChecksumMismatch);
}

#[test]
fn test_two_kinds_share_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");

    let instances = VersionedStore::open(&path, common::instance_schema()).unwrap();
    let buckets = VersionedStore::open(
        &path,
        invhist_core::ResourceSchema::new("bucket").field(FieldSpec::text("location")),
    )
    .unwrap();

    assert!(instances.current_ids("proj-a").unwrap().is_empty());
    assert!(buckets.current_ids("proj-a").unwrap().is_empty());
}

#[test]
fn test_kind_and_child_names_that_concatenate_alike_get_separate_tables() {
    // Given: `compute` + `instance_labels` and `compute_instance` + `labels`
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let compute = invhist_core::ResourceSchema::new("compute")
        .field(FieldSpec::text("title"))
        .child(ChildSpec::key_value("instance_labels"));
    let compute_instance = invhist_core::ResourceSchema::new("compute_instance")
        .field(FieldSpec::text("title"))
        .child(ChildSpec::key_value("labels"));

    // When: both are registered in one file
    let a = VersionedStore::open(&path, compute).unwrap();
    let b = VersionedStore::open(&path, compute_instance).unwrap();

    // Then: each child collection has its own current and history table
    let tables = a.with_conn(|conn| Ok(get_table_names(conn))).unwrap();
    for expected in [
        "current_compute__instance_labels",
        "current_compute_instance__labels",
        "history_compute__instance_labels",
        "history_compute_instance__labels",
    ] {
        assert!(tables.contains(&expected.to_string()), "Missing table: {}", expected);
    }
    assert!(b.current_ids("p").unwrap().is_empty());
}
