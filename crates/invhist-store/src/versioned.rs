//! Versioned store: current view plus interval history
//!
//! One [`VersionedStore`] serves one resource kind. Every mutating call runs
//! in its own `BEGIN IMMEDIATE` transaction, so a resource is either fully
//! updated (current row, current children, history rows) or not at all.
//!
//! [`VersionedStore::reconcile`] reads, diffs and writes a resource under the
//! same transaction; [`VersionedStore::upsert`] re-checks a caller's verdict
//! against the stored state before writing.
//!
//! Two ownership graphs are maintained:
//! - current child rows reference the current parent by `resource_id`
//! - history child rows reference the parent's history version by `history_id`

use crate::db;
use crate::ddl::{column_list, ensure_kind_schema, quote};
use crate::errors::{consistency_violation, from_rusqlite, Result};
use crate::migrations::apply_migrations;
use crate::values::{from_millis, from_sql, to_millis, to_sql};
use chrono::{DateTime, Utc};
use invhist_core::diff::{diff, ChangeClass, Verdict};
use invhist_core::errors::{ExError, ExErrorKind};
use invhist_core::model::{
    Attributes, CanonicalResource, ChildRecord, ChildSpec, CurrentRecord, FieldSpec,
    ResourceSchema,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// What an upsert did to history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub class: ChangeClass,
    /// Open parent history entry after the upsert; `None` for a touch-only update
    pub history_id: Option<i64>,
}

/// The open parent history row of a resource
#[derive(Debug, Clone, Copy)]
struct OpenVersion {
    history_id: i64,
    first_collected_at: i64,
}

pub struct VersionedStore {
    conn: Mutex<Connection>,
    schema: ResourceSchema,
}

impl VersionedStore {
    /// Wrap a configured connection: apply engine migrations and register
    /// the kind's tables.
    ///
    /// # Errors
    ///
    /// `InvalidSchema`, `ChecksumMismatch` or `Persistence` from registration.
    pub fn new(mut conn: Connection, schema: ResourceSchema) -> Result<Self> {
        apply_migrations(&mut conn)?;
        ensure_kind_schema(&mut conn, &schema)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema,
        })
    }

    /// Open (or create) the database file at `path` for one kind.
    ///
    /// # Errors
    ///
    /// See [`VersionedStore::new`].
    pub fn open<P: AsRef<Path>>(path: P, schema: ResourceSchema) -> Result<Self> {
        Self::new(db::open(path)?, schema)
    }

    /// In-memory store, mostly for tests.
    ///
    /// # Errors
    ///
    /// See [`VersionedStore::new`].
    pub fn open_in_memory(schema: ResourceSchema) -> Result<Self> {
        Self::new(db::open_in_memory()?, schema)
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("lock_connection")
                .with_resource_kind(self.schema.kind.clone())
                .with_message("connection mutex poisoned")
        })
    }

    /// Run a read-only closure against the underlying connection.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or `Internal` if the connection lock is poisoned.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Fetch the current row and its child rows.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure, `Serialization` on an undecodable column.
    pub fn load(&self, resource_id: &str) -> Result<Option<CurrentRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;
        let record = self.read_current(&tx, resource_id)?;
        tx.commit().map_err(from_rusqlite)?;
        Ok(record)
    }

    /// Read the stored state of `new`, diff it and apply the verdict, all in
    /// one `BEGIN IMMEDIATE` transaction.
    ///
    /// A concurrent writer on the same file cannot slip between the read and
    /// the write, so the verdict always describes the state it is applied to.
    ///
    /// # Errors
    ///
    /// - `ConsistencyViolation` when the open history row is missing on an
    ///   update, or already present on a creation
    /// - `Concurrency` on lock contention
    /// - `Persistence` on any other database failure
    pub fn reconcile(&self, new: &CanonicalResource) -> Result<(Verdict, UpsertOutcome)> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(from_rusqlite)?;

        let stored = self.read_current(&tx, &new.id)?;
        let verdict = diff(stored.as_ref().map(|r| &r.resource), new, &self.schema);
        let history_id = self.apply_verdict(&tx, &verdict, new)?;

        tx.commit().map_err(from_rusqlite)?;
        let outcome = UpsertOutcome {
            class: verdict.classification(),
            history_id,
        };
        Ok((verdict, outcome))
    }

    /// Apply a verdict computed by the caller from an earlier [`load`].
    ///
    /// The stored state is re-read inside the write transaction; if it no
    /// longer yields the same verdict nothing is written.
    ///
    /// [`load`]: VersionedStore::load
    ///
    /// # Errors
    ///
    /// - `Concurrency` when the stored state changed since `verdict` was
    ///   computed, or on lock contention
    /// - `ConsistencyViolation` when the open history row is missing on an
    ///   update, or already present on a creation
    /// - `Persistence` on any other database failure
    pub fn upsert(&self, verdict: &Verdict, new: &CanonicalResource) -> Result<UpsertOutcome> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(from_rusqlite)?;

        let stored = self.read_current(&tx, &new.id)?;
        let fresh = diff(stored.as_ref().map(|r| &r.resource), new, &self.schema);
        if &fresh != verdict {
            return Err(ExError::new(ExErrorKind::Concurrency)
                .with_op("upsert")
                .with_resource_kind(self.schema.kind.clone())
                .with_resource_id(new.id.clone())
                .with_message("stored state changed since the verdict was computed"));
        }
        let history_id = self.apply_verdict(&tx, verdict, new)?;

        tx.commit().map_err(from_rusqlite)?;
        Ok(UpsertOutcome {
            class: verdict.classification(),
            history_id,
        })
    }

    /// Write `new` according to `verdict`; returns the open parent history id.
    fn apply_verdict(
        &self,
        tx: &Transaction,
        verdict: &Verdict,
        new: &CanonicalResource,
    ) -> Result<Option<i64>> {
        let at = to_millis(new.collected_at);

        let history_id = match verdict.classification() {
            ChangeClass::Unchanged => {
                self.touch(tx, &new.id, at)?;
                None
            }
            ChangeClass::New => {
                if self.open_version(tx, &new.id)?.is_some() {
                    return Err(self.violation(
                        "upsert",
                        &new.id,
                        "open history row already exists for a new resource",
                    ));
                }
                self.write_current(tx, new, at)?;
                let history_id = self.open_parent_version(tx, new, at, at)?;
                for spec in &self.schema.children {
                    self.open_child_versions(tx, spec, history_id, new.children_of(&spec.name), at)?;
                }
                Some(history_id)
            }
            ChangeClass::CoreChanged => {
                let open = self.require_open_version(tx, &new.id)?;
                self.write_current(tx, new, open.first_collected_at)?;
                for spec in &self.schema.children {
                    self.close_child_versions(tx, spec, open.history_id, at)?;
                }
                self.close_parent_version(tx, open.history_id, at)?;
                let history_id = self.open_parent_version(tx, new, open.first_collected_at, at)?;
                for spec in &self.schema.children {
                    self.open_child_versions(tx, spec, history_id, new.children_of(&spec.name), at)?;
                }
                Some(history_id)
            }
            ChangeClass::ChildrenOnly => {
                let open = self.require_open_version(tx, &new.id)?;
                self.write_current(tx, new, open.first_collected_at)?;
                for spec in &self.schema.children {
                    if verdict.is_child_changed(&spec.name) {
                        self.close_child_versions(tx, spec, open.history_id, at)?;
                        self.open_child_versions(
                            tx,
                            spec,
                            open.history_id,
                            new.children_of(&spec.name),
                            at,
                        )?;
                    }
                }
                Some(open.history_id)
            }
        };
        Ok(history_id)
    }

    /// Close the open history of `resource_id` at `at` and remove it from the
    /// current view.
    ///
    /// Returns `false` when there was nothing to close.
    ///
    /// # Errors
    ///
    /// `ConsistencyViolation` when a current row exists without an open
    /// history row; `Persistence`/`Concurrency` on database failure.
    pub fn close_and_delete(&self, resource_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(from_rusqlite)?;
        let at = to_millis(at);

        let current_exists = tx
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE resource_id = ?1",
                    quote(&self.schema.current_table())
                ),
                [resource_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(from_rusqlite)?
            .is_some();

        let Some(open) = self.open_version(&tx, resource_id)? else {
            if current_exists {
                return Err(self.violation(
                    "close_and_delete",
                    resource_id,
                    "current row has no open history row",
                ));
            }
            return Ok(false);
        };

        for spec in &self.schema.children {
            self.close_child_versions(&tx, spec, open.history_id, at)?;
        }
        self.close_parent_version(&tx, open.history_id, at)?;
        self.delete_current(&tx, resource_id)?;

        tx.commit().map_err(from_rusqlite)?;
        Ok(true)
    }

    /// Current resource IDs in `scope` whose `collected_at` precedes `before`.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure.
    pub fn stale_ids(&self, scope: &str, before: DateTime<Utc>) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT resource_id FROM {} WHERE scope = ?1 AND collected_at < ?2 ORDER BY resource_id",
            quote(&self.schema.current_table())
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&sql).map_err(from_rusqlite)?;
        let ids = stmt
            .query_map(rusqlite::params![scope, to_millis(before)], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    /// Every current resource ID in `scope`.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure.
    pub fn current_ids(&self, scope: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT resource_id FROM {} WHERE scope = ?1 ORDER BY resource_id",
            quote(&self.schema.current_table())
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&sql).map_err(from_rusqlite)?;
        let ids = stmt
            .query_map([scope], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    // ----- current view -----

    fn read_current(&self, conn: &Connection, resource_id: &str) -> Result<Option<CurrentRecord>> {
        let fields = &self.schema.fields;
        let mut sql = String::from("SELECT resource_id, scope, collected_at, first_collected_at");
        for field in fields {
            sql.push_str(", ");
            sql.push_str(&quote(&field.name));
        }
        sql.push_str(&format!(
            " FROM {} WHERE resource_id = ?1",
            quote(&self.schema.current_table())
        ));

        let row = conn
            .query_row(&sql, [resource_id], |row| {
                let id: String = row.get(0)?;
                let scope: String = row.get(1)?;
                let collected_at: i64 = row.get(2)?;
                let first_collected_at: i64 = row.get(3)?;
                let mut raw = Vec::with_capacity(fields.len());
                for i in 0..fields.len() {
                    raw.push(row.get::<_, SqlValue>(i + 4)?);
                }
                Ok((id, scope, collected_at, first_collected_at, raw))
            })
            .optional()
            .map_err(from_rusqlite)?;

        let Some((id, scope, collected_at, first_collected_at, raw)) = row else {
            return Ok(None);
        };

        let attributes = decode_attributes(fields, raw)?;
        let mut children = BTreeMap::new();
        for spec in &self.schema.children {
            let records = select_children(
                conn,
                &self.schema.current_child_table(&spec.name),
                "resource_id = ?1",
                &spec.fields,
                [SqlValue::Text(id.clone())],
            )?;
            children.insert(spec.name.clone(), records);
        }

        Ok(Some(CurrentRecord {
            resource: CanonicalResource {
                id,
                scope,
                collected_at: from_millis("collected_at", collected_at)?,
                attributes,
                children,
            },
            first_collected_at: from_millis("first_collected_at", first_collected_at)?,
        }))
    }

    fn touch(&self, tx: &Transaction, resource_id: &str, at: i64) -> Result<()> {
        let updated = tx
            .execute(
                &format!(
                    "UPDATE {} SET collected_at = ?1 WHERE resource_id = ?2",
                    quote(&self.schema.current_table())
                ),
                rusqlite::params![at, resource_id],
            )
            .map_err(from_rusqlite)?;
        if updated == 0 {
            return Err(ExError::new(ExErrorKind::Concurrency)
                .with_op("touch")
                .with_resource_kind(self.schema.kind.clone())
                .with_resource_id(resource_id)
                .with_message("current row disappeared between load and upsert"));
        }
        Ok(())
    }

    /// Replace the current row and every current child row wholesale.
    fn write_current(
        &self,
        tx: &Transaction,
        new: &CanonicalResource,
        first_collected_at: i64,
    ) -> Result<()> {
        let fields = &self.schema.fields;
        let columns = column_list(fields);
        let placeholders: String = (0..fields.len()).map(|i| format!(", ?{}", i + 5)).collect();
        let updates: String = fields
            .iter()
            .map(|f| format!(", {0} = excluded.{0}", quote(&f.name)))
            .collect();
        let separator = if fields.is_empty() { "" } else { ", " };
        let sql = format!(
            "INSERT INTO {table} (resource_id, scope, collected_at, first_collected_at{sep}{columns})
             VALUES (?1, ?2, ?3, ?4{placeholders})
             ON CONFLICT(resource_id) DO UPDATE SET
                scope = excluded.scope,
                collected_at = excluded.collected_at{updates}",
            table = quote(&self.schema.current_table()),
            sep = separator,
        );

        let mut params = vec![
            SqlValue::Text(new.id.clone()),
            SqlValue::Text(new.scope.clone()),
            SqlValue::Integer(to_millis(new.collected_at)),
            SqlValue::Integer(first_collected_at),
        ];
        params.extend(encode_attributes(fields, &new.attributes)?);
        tx.execute(&sql, params_from_iter(params))
            .map_err(from_rusqlite)?;

        for spec in &self.schema.children {
            let table = self.schema.current_child_table(&spec.name);
            tx.execute(
                &format!("DELETE FROM {} WHERE resource_id = ?1", quote(&table)),
                [&new.id],
            )
            .map_err(from_rusqlite)?;
            insert_children(
                tx,
                &table,
                "resource_id",
                &spec.fields,
                SqlValue::Text(new.id.clone()),
                &[],
                new.children_of(&spec.name),
            )?;
        }
        Ok(())
    }

    fn delete_current(&self, tx: &Transaction, resource_id: &str) -> Result<()> {
        for spec in &self.schema.children {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE resource_id = ?1",
                    quote(&self.schema.current_child_table(&spec.name))
                ),
                [resource_id],
            )
            .map_err(from_rusqlite)?;
        }
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE resource_id = ?1",
                quote(&self.schema.current_table())
            ),
            [resource_id],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    // ----- history -----

    fn open_version(&self, tx: &Transaction, resource_id: &str) -> Result<Option<OpenVersion>> {
        tx.query_row(
            &format!(
                "SELECT history_id, first_collected_at FROM {} WHERE resource_id = ?1 AND valid_to IS NULL",
                quote(&self.schema.history_table())
            ),
            [resource_id],
            |row| {
                Ok(OpenVersion {
                    history_id: row.get(0)?,
                    first_collected_at: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(from_rusqlite)
    }

    fn require_open_version(&self, tx: &Transaction, resource_id: &str) -> Result<OpenVersion> {
        self.open_version(tx, resource_id)?.ok_or_else(|| {
            self.violation(
                "upsert",
                resource_id,
                "no open history row for an existing resource",
            )
        })
    }

    fn open_parent_version(
        &self,
        tx: &Transaction,
        new: &CanonicalResource,
        first_collected_at: i64,
        at: i64,
    ) -> Result<i64> {
        let fields = &self.schema.fields;
        let columns = column_list(fields);
        let placeholders: String = (0..fields.len()).map(|i| format!(", ?{}", i + 5)).collect();
        let separator = if fields.is_empty() { "" } else { ", " };
        let sql = format!(
            "INSERT INTO {table} (resource_id, scope, valid_from, first_collected_at{sep}{columns})
             VALUES (?1, ?2, ?3, ?4{placeholders})",
            table = quote(&self.schema.history_table()),
            sep = separator,
        );

        let mut params = vec![
            SqlValue::Text(new.id.clone()),
            SqlValue::Text(new.scope.clone()),
            SqlValue::Integer(at),
            SqlValue::Integer(first_collected_at),
        ];
        params.extend(encode_attributes(fields, &new.attributes)?);
        tx.execute(&sql, params_from_iter(params))
            .map_err(from_rusqlite)?;
        Ok(tx.last_insert_rowid())
    }

    fn close_parent_version(&self, tx: &Transaction, history_id: i64, at: i64) -> Result<()> {
        tx.execute(
            &format!(
                "UPDATE {} SET valid_to = ?1 WHERE history_id = ?2 AND valid_to IS NULL",
                quote(&self.schema.history_table())
            ),
            rusqlite::params![at, history_id],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    fn open_child_versions(
        &self,
        tx: &Transaction,
        spec: &ChildSpec,
        history_id: i64,
        records: &[ChildRecord],
        at: i64,
    ) -> Result<()> {
        insert_children(
            tx,
            &self.schema.history_child_table(&spec.name),
            "history_id, valid_from",
            &spec.fields,
            SqlValue::Integer(history_id),
            &[SqlValue::Integer(at)],
            records,
        )
    }

    fn close_child_versions(
        &self,
        tx: &Transaction,
        spec: &ChildSpec,
        history_id: i64,
        at: i64,
    ) -> Result<()> {
        tx.execute(
            &format!(
                "UPDATE {} SET valid_to = ?1 WHERE history_id = ?2 AND valid_to IS NULL",
                quote(&self.schema.history_child_table(&spec.name))
            ),
            rusqlite::params![at, history_id],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    fn violation(&self, op: &str, resource_id: &str, reason: &str) -> ExError {
        consistency_violation(op, &self.schema.kind, resource_id, reason)
    }
}

pub(crate) fn encode_attributes(fields: &[FieldSpec], attributes: &Attributes) -> Result<Vec<SqlValue>> {
    fields
        .iter()
        .map(|f| {
            let value = attributes.get(&f.name).unwrap_or(&serde_json::Value::Null);
            to_sql(&f.name, f.ty, value)
        })
        .collect()
}

pub(crate) fn decode_attributes(fields: &[FieldSpec], raw: Vec<SqlValue>) -> Result<Attributes> {
    fields
        .iter()
        .zip(raw)
        .map(|(f, v)| Ok((f.name.clone(), from_sql(&f.name, f.ty, v)?)))
        .collect()
}

/// Insert child rows. `owner_columns` names the owner column followed by
/// any fixed columns whose values are given in `fixed`.
fn insert_children(
    tx: &Transaction,
    table: &str,
    owner_columns: &str,
    fields: &[FieldSpec],
    owner: SqlValue,
    fixed: &[SqlValue],
    records: &[ChildRecord],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let leading = 1 + fixed.len();
    let placeholders = (1..=leading + fields.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let separator = if fields.is_empty() { "" } else { ", " };
    let sql = format!(
        "INSERT INTO {} ({}{}{}) VALUES ({})",
        quote(table),
        owner_columns,
        separator,
        column_list(fields),
        placeholders
    );

    let mut stmt = tx.prepare_cached(&sql).map_err(from_rusqlite)?;
    for record in records {
        let mut params = Vec::with_capacity(leading + fields.len());
        params.push(owner.clone());
        params.extend(fixed.iter().cloned());
        params.extend(encode_attributes(fields, &record.attributes)?);
        stmt.execute(params_from_iter(params))
            .map_err(from_rusqlite)?;
    }
    Ok(())
}

/// Select child records matching `filter`, in insertion order.
pub(crate) fn select_children<P: rusqlite::Params>(
    conn: &Connection,
    table: &str,
    filter: &str,
    fields: &[FieldSpec],
    params: P,
) -> Result<Vec<ChildRecord>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY id",
        column_list(fields),
        quote(table),
        filter
    );
    let mut stmt = conn.prepare_cached(&sql).map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(params, |row| {
            (0..fields.len())
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(from_rusqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(from_rusqlite)?;

    rows.into_iter()
        .map(|raw| {
            Ok(ChildRecord {
                attributes: decode_attributes(fields, raw)?,
            })
        })
        .collect()
}
