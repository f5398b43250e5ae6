//! Per-kind DDL generation
//!
//! Each resource kind gets four tables derived from its [`ResourceSchema`]:
//! `current_<kind>`, `current_<kind>__<child>`, `history_<kind>` and
//! `history_<kind>__<child>`. The generated SQL is registered as migration
//! `kind_<kind>` so that a descriptor that drifts from what is on disk is
//! reported instead of silently producing mismatched columns.

use crate::errors::Result;
use crate::migrations::register_migration;
use invhist_core::model::{FieldSpec, ResourceSchema};
use rusqlite::Connection;

/// Double-quote an identifier. Names are validated by the schema first.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

/// Quoted, comma-separated column list for declared fields
pub(crate) fn column_list(fields: &[FieldSpec]) -> String {
    fields
        .iter()
        .map(|f| quote(&f.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_defs(fields: &[FieldSpec]) -> String {
    fields
        .iter()
        .map(|f| format!(",\n    {} {}", quote(&f.name), f.ty.sql_type()))
        .collect()
}

/// Render the DDL for one kind. Deterministic for a given descriptor.
pub fn kind_ddl(schema: &ResourceSchema) -> String {
    let current = schema.current_table();
    let history = schema.history_table();
    let mut sql = String::new();

    sql.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS {current_q} (
    resource_id TEXT PRIMARY KEY,
    scope TEXT NOT NULL,
    collected_at INTEGER NOT NULL,
    first_collected_at INTEGER NOT NULL{cols}
);
CREATE INDEX IF NOT EXISTS {idx} ON {current_q}(scope, collected_at);
",
        current_q = quote(&current),
        cols = column_defs(&schema.fields),
        idx = quote(&format!("idx_{}_scope", current)),
    ));

    sql.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS {history_q} (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER,
    first_collected_at INTEGER NOT NULL{cols},
    CHECK (valid_to IS NULL OR valid_to >= valid_from)
);
CREATE UNIQUE INDEX IF NOT EXISTS {open_idx} ON {history_q}(resource_id) WHERE valid_to IS NULL;
CREATE INDEX IF NOT EXISTS {lineage_idx} ON {history_q}(resource_id, valid_from);
",
        history_q = quote(&history),
        cols = column_defs(&schema.fields),
        open_idx = quote(&format!("uq_{}_open", history)),
        lineage_idx = quote(&format!("idx_{}_lineage", history)),
    ));

    for child in &schema.children {
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id TEXT NOT NULL REFERENCES {current_q}(resource_id) ON DELETE CASCADE{cols}
);
CREATE INDEX IF NOT EXISTS {idx} ON {table}(resource_id);
",
            table = quote(&schema.current_child_table(&child.name)),
            current_q = quote(&current),
            cols = column_defs(&child.fields),
            idx = quote(&format!("idx_{}_parent", schema.current_child_table(&child.name))),
        ));

        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    history_id INTEGER NOT NULL REFERENCES {history_q}(history_id),
    valid_from INTEGER NOT NULL,
    valid_to INTEGER{cols},
    CHECK (valid_to IS NULL OR valid_to >= valid_from)
);
CREATE INDEX IF NOT EXISTS {idx} ON {table}(history_id, valid_to);
",
            table = quote(&schema.history_child_table(&child.name)),
            history_q = quote(&history),
            cols = column_defs(&child.fields),
            idx = quote(&format!("idx_{}_version", schema.history_child_table(&child.name))),
        ));
    }

    sql
}

/// Validate `schema` and create its tables if this is the first registration.
///
/// Returns `true` when the DDL was applied on this call.
///
/// # Errors
///
/// - `InvalidSchema` when the descriptor fails validation
/// - `ChecksumMismatch` when the kind was registered with a different descriptor
/// - `Persistence` when the DDL cannot be applied
pub fn ensure_kind_schema(conn: &mut Connection, schema: &ResourceSchema) -> Result<bool> {
    schema.validate()?;
    let applied = register_migration(conn, &format!("kind_{}", schema.kind), &kind_ddl(schema))?;
    if applied {
        tracing::info!(resource_kind = %schema.kind, "Registered resource kind schema");
    }
    Ok(applied)
}
