//! Cycle ledger
//!
//! One `cycle_runs` row per collection cycle. The reconciler writes it
//! best-effort after the cycle settles; it is the only place partial
//! failures (skipped resources, failed sweeps) are recorded outside logs.

use crate::errors::{from_rusqlite, Result};
use crate::values::{from_millis, to_millis};
use crate::versioned::VersionedStore;
use chrono::{DateTime, Utc};
use invhist_core::errors::{ExError, ExErrorKind};
use rusqlite::Connection;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Completed,
    Failed,
    Cancelled,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::Failed => "failed",
            CycleStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CycleStatus {
    type Err = ExError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(CycleStatus::Completed),
            "failed" => Ok(CycleStatus::Failed),
            "cancelled" => Ok(CycleStatus::Cancelled),
            other => Err(ExError::new(ExErrorKind::Serialization)
                .with_op("decode_cycle_status")
                .with_message(format!("unknown cycle status '{}'", other))),
        }
    }
}

/// Per-resource outcome counts for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounts {
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub swept: u64,
    pub sweep_failures: u64,
}

impl CycleCounts {
    /// Resources reconciled without error
    pub fn reconciled(&self) -> u64 {
        self.created + self.updated + self.unchanged
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleRun {
    pub cycle_id: String,
    pub kind: String,
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: CycleStatus,
    pub counts: CycleCounts,
    /// Error code of the failure that ended the cycle, if any
    pub error_code: Option<String>,
}

/// Insert or replace the ledger row for `run.cycle_id`.
///
/// # Errors
///
/// `Persistence` on write failure.
pub fn record_cycle(conn: &Connection, run: &CycleRun) -> Result<()> {
    let c = &run.counts;
    conn.execute(
        "INSERT OR REPLACE INTO cycle_runs
            (cycle_id, kind, scope, started_at, finished_at, status, fetched, created,
             updated, unchanged, skipped, swept, sweep_failures, error_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            run.cycle_id,
            run.kind,
            run.scope,
            to_millis(run.started_at),
            to_millis(run.finished_at),
            run.status.as_str(),
            c.fetched as i64,
            c.created as i64,
            c.updated as i64,
            c.unchanged as i64,
            c.skipped as i64,
            c.swept as i64,
            c.sweep_failures as i64,
            run.error_code,
        ],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Most recent cycles for `(kind, scope)`, newest first.
///
/// # Errors
///
/// `Persistence` on query failure, `Serialization` on an undecodable row.
pub fn recent_cycles(conn: &Connection, kind: &str, scope: &str, limit: usize) -> Result<Vec<CycleRun>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT cycle_id, kind, scope, started_at, finished_at, status, fetched, created,
                    updated, unchanged, skipped, swept, sweep_failures, error_code
             FROM cycle_runs
             WHERE kind = ?1 AND scope = ?2
             ORDER BY started_at DESC, cycle_id DESC
             LIMIT ?3",
        )
        .map_err(from_rusqlite)?;

    let rows = stmt
        .query_map(rusqlite::params![kind, scope, limit as i64], |row| {
            let count = |i: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(i)?.max(0) as u64) };
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                CycleCounts {
                    fetched: count(6)?,
                    created: count(7)?,
                    updated: count(8)?,
                    unchanged: count(9)?,
                    skipped: count(10)?,
                    swept: count(11)?,
                    sweep_failures: count(12)?,
                },
                row.get::<_, Option<String>>(13)?,
            ))
        })
        .map_err(from_rusqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(from_rusqlite)?;

    rows.into_iter()
        .map(
            |(cycle_id, kind, scope, started_at, finished_at, status, counts, error_code)| {
                Ok(CycleRun {
                    cycle_id,
                    kind,
                    scope,
                    started_at: from_millis("started_at", started_at)?,
                    finished_at: from_millis("finished_at", finished_at)?,
                    status: status.parse()?,
                    counts,
                    error_code,
                })
            },
        )
        .collect()
}

impl VersionedStore {
    /// Record `run` through this store's connection.
    ///
    /// # Errors
    ///
    /// `Persistence` on write failure.
    pub fn record_cycle(&self, run: &CycleRun) -> Result<()> {
        self.with_conn(|conn| record_cycle(conn, run))
    }

    /// Most recent cycles of this store's kind in `scope`.
    ///
    /// # Errors
    ///
    /// See [`recent_cycles`].
    pub fn recent_cycles(&self, scope: &str, limit: usize) -> Result<Vec<CycleRun>> {
        self.with_conn(|conn| recent_cycles(conn, &self.schema().kind, scope, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::apply_migrations;

    fn run(id: &str, started_ms: i64, status: CycleStatus) -> CycleRun {
        CycleRun {
            cycle_id: id.to_string(),
            kind: "compute_instance".to_string(),
            scope: "proj-a".to_string(),
            started_at: from_millis("t", started_ms).unwrap(),
            finished_at: from_millis("t", started_ms + 250).unwrap(),
            status,
            counts: CycleCounts {
                fetched: 3,
                created: 1,
                unchanged: 1,
                skipped: 1,
                ..Default::default()
            },
            error_code: None,
        }
    }

    #[test]
    fn test_record_and_read_back_newest_first() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();

        record_cycle(&conn, &run("c1", 1_000, CycleStatus::Completed)).unwrap();
        record_cycle(&conn, &run("c2", 2_000, CycleStatus::Cancelled)).unwrap();

        let runs = recent_cycles(&conn, "compute_instance", "proj-a", 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].cycle_id, "c2");
        assert_eq!(runs[0].status, CycleStatus::Cancelled);
        assert_eq!(runs[1].counts.reconciled(), 2);
        assert_eq!(runs[1].counts.skipped, 1);
    }

    #[test]
    fn test_rerecording_replaces_row() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();

        record_cycle(&conn, &run("c1", 1_000, CycleStatus::Failed)).unwrap();
        record_cycle(&conn, &run("c1", 1_000, CycleStatus::Completed)).unwrap();

        let runs = recent_cycles(&conn, "compute_instance", "proj-a", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, CycleStatus::Completed);
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("exploded".parse::<CycleStatus>().is_err());
    }
}
