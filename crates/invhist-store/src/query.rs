//! Read-only history queries.
//!
//! Intervals are half-open: an entry is valid at `t` when
//! `valid_from <= t` and `valid_to` is null or greater than `t`.

use crate::ddl::{column_list, quote};
use crate::errors::{from_rusqlite, Result};
use crate::values::{from_millis, to_millis};
use crate::versioned::{decode_attributes, select_children, VersionedStore};
use chrono::{DateTime, Utc};
use invhist_core::errors::{ExError, ExErrorKind};
use invhist_core::model::{Attributes, ChildRecord, ChildSpec};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use std::collections::BTreeMap;

/// One version of a resource's top-level attributes
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub history_id: i64,
    pub resource_id: String,
    pub scope: String,
    pub valid_from: DateTime<Utc>,
    /// `None` for the open version
    pub valid_to: Option<DateTime<Utc>>,
    pub first_collected_at: DateTime<Utc>,
    pub attributes: Attributes,
}

impl HistoryEntry {
    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// One version of one child record, owned by a parent history entry
#[derive(Debug, Clone, PartialEq)]
pub struct ChildHistoryEntry {
    pub id: i64,
    pub history_id: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub record: ChildRecord,
}

impl ChildHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// A resource as it stood at a past instant
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalState {
    pub entry: HistoryEntry,
    pub children: BTreeMap<String, Vec<ChildRecord>>,
}

impl VersionedStore {
    /// Every parent history entry of `resource_id`, oldest first.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure, `Serialization` on an undecodable column.
    pub fn history_for(&self, resource_id: &str) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            "{} WHERE resource_id = ?1 ORDER BY valid_from, history_id",
            self.history_select()
        );
        self.with_conn(|conn| self.query_history(conn, &sql, rusqlite::params![resource_id]))
    }

    /// Every child-history row of kind `child` beneath one parent version.
    ///
    /// # Errors
    ///
    /// `NotFound` when `child` is not declared for this kind.
    pub fn child_history_for(&self, history_id: i64, child: &str) -> Result<Vec<ChildHistoryEntry>> {
        let spec = self.require_child(child)?;
        let sql = format!(
            "SELECT id, history_id, valid_from, valid_to{sep}{columns} FROM {table}
             WHERE history_id = ?1 ORDER BY id",
            sep = if spec.fields.is_empty() { "" } else { ", " },
            columns = column_list(&spec.fields),
            table = quote(&self.schema().history_child_table(child)),
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql).map_err(from_rusqlite)?;
            let rows = stmt
                .query_map([history_id], |row| {
                    let id: i64 = row.get(0)?;
                    let history_id: i64 = row.get(1)?;
                    let valid_from: i64 = row.get(2)?;
                    let valid_to: Option<i64> = row.get(3)?;
                    let raw = (0..spec.fields.len())
                        .map(|i| row.get::<_, SqlValue>(i + 4))
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok((id, history_id, valid_from, valid_to, raw))
                })
                .map_err(from_rusqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(from_rusqlite)?;

            rows.into_iter()
                .map(|(id, history_id, valid_from, valid_to, raw)| {
                    Ok(ChildHistoryEntry {
                        id,
                        history_id,
                        valid_from: from_millis("valid_from", valid_from)?,
                        valid_to: valid_to.map(|ms| from_millis("valid_to", ms)).transpose()?,
                        record: ChildRecord {
                            attributes: decode_attributes(&spec.fields, raw)?,
                        },
                    })
                })
                .collect()
        })
    }

    /// The version of `resource_id` valid at `at`, with the child records
    /// valid at the same instant.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure, `Serialization` on an undecodable column.
    pub fn as_of(&self, resource_id: &str, at: DateTime<Utc>) -> Result<Option<HistoricalState>> {
        let ms = to_millis(at);
        let sql = format!(
            "{} WHERE resource_id = ?1 AND valid_from <= ?2 AND (valid_to IS NULL OR valid_to > ?2)",
            self.history_select()
        );

        self.with_conn(|conn| {
            let Some(entry) = self
                .query_history(conn, &sql, rusqlite::params![resource_id, ms])?
                .into_iter()
                .next()
            else {
                return Ok(None);
            };

            let mut children = BTreeMap::new();
            for spec in &self.schema().children {
                let records = select_children(
                    conn,
                    &self.schema().history_child_table(&spec.name),
                    "history_id = ?1 AND valid_from <= ?2 AND (valid_to IS NULL OR valid_to > ?2)",
                    &spec.fields,
                    rusqlite::params![entry.history_id, ms],
                )?;
                children.insert(spec.name.clone(), records);
            }
            Ok(Some(HistoricalState { entry, children }))
        })
    }

    /// The open parent history entry of `resource_id`, if any.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure.
    pub fn open_entry(&self, resource_id: &str) -> Result<Option<HistoryEntry>> {
        let sql = format!(
            "{} WHERE resource_id = ?1 AND valid_to IS NULL",
            self.history_select()
        );
        self.with_conn(|conn| {
            Ok(self
                .query_history(conn, &sql, rusqlite::params![resource_id])?
                .into_iter()
                .next())
        })
    }

    /// Number of parent history rows across every resource of this kind.
    ///
    /// # Errors
    ///
    /// `Persistence` on query failure.
    pub fn history_row_count(&self) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            quote(&self.schema().history_table())
        );
        self.with_conn(|conn| {
            conn.query_row(&sql, [], |row| row.get(0))
                .map_err(from_rusqlite)
        })
    }

    fn history_select(&self) -> String {
        let fields = &self.schema().fields;
        format!(
            "SELECT history_id, resource_id, scope, valid_from, valid_to, first_collected_at{}{} FROM {}",
            if fields.is_empty() { "" } else { ", " },
            column_list(fields),
            quote(&self.schema().history_table())
        )
    }

    fn query_history<P: rusqlite::Params>(
        &self,
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<HistoryEntry>> {
        let fields = &self.schema().fields;
        let mut stmt = conn.prepare_cached(sql).map_err(from_rusqlite)?;
        let rows = stmt
            .query_map(params, |row| {
                let history_id: i64 = row.get(0)?;
                let resource_id: String = row.get(1)?;
                let scope: String = row.get(2)?;
                let valid_from: i64 = row.get(3)?;
                let valid_to: Option<i64> = row.get(4)?;
                let first_collected_at: i64 = row.get(5)?;
                let raw = (0..fields.len())
                    .map(|i| row.get::<_, SqlValue>(i + 6))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((history_id, resource_id, scope, valid_from, valid_to, first_collected_at, raw))
            })
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(from_rusqlite)?;

        rows.into_iter()
            .map(
                |(history_id, resource_id, scope, valid_from, valid_to, first_collected_at, raw)| {
                    Ok(HistoryEntry {
                        history_id,
                        resource_id,
                        scope,
                        valid_from: from_millis("valid_from", valid_from)?,
                        valid_to: valid_to.map(|ms| from_millis("valid_to", ms)).transpose()?,
                        first_collected_at: from_millis("first_collected_at", first_collected_at)?,
                        attributes: decode_attributes(fields, raw)?,
                    })
                },
            )
            .collect()
    }

    fn require_child(&self, child: &str) -> Result<&ChildSpec> {
        self.schema().child_spec(child).ok_or_else(|| {
            ExError::new(ExErrorKind::NotFound)
                .with_op("child_history_for")
                .with_resource_kind(self.schema().kind.clone())
                .with_message(format!("child kind '{}' is not declared", child))
        })
    }
}
