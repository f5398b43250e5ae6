//! In-process fan-out over independent (kind, scope) cycles
//!
//! A reference driver for orchestrators that want several cycles in flight
//! at once. Retries stay with the caller.
//!
//! Cycles are polled concurrently on the calling task. Only fetches overlap
//! there; each cycle hands its SQLite work to the blocking pool, so one
//! cycle's writes do not hold up another's fetch.

use crate::reconciler::{CycleResult, Reconciler};
use futures::stream::{self, StreamExt};
use invhist_core::errors::{ExError, ExErrorKind, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One cycle to run
#[derive(Clone)]
pub struct CycleJob {
    pub reconciler: Arc<Reconciler>,
    pub scope: String,
}

impl CycleJob {
    pub fn new(reconciler: Arc<Reconciler>, scope: impl Into<String>) -> Self {
        Self {
            reconciler,
            scope: scope.into(),
        }
    }
}

/// Outcome of one job, in completion order
#[derive(Debug)]
pub struct CycleReport {
    pub kind: String,
    pub scope: String,
    pub result: Result<CycleResult>,
}

/// Run `jobs` with at most `limit` cycles in flight.
///
/// A (kind, scope) pair listed twice runs once; the duplicate is reported
/// as a `Concurrency` error without running.
pub async fn run_cycles(
    jobs: Vec<CycleJob>,
    limit: usize,
    cancel: &CancellationToken,
) -> Vec<CycleReport> {
    let mut claimed = HashSet::new();
    let mut reports = Vec::new();
    let mut runnable = Vec::with_capacity(jobs.len());

    for job in jobs {
        let key = (job.reconciler.kind_name().to_string(), job.scope.clone());
        if claimed.insert(key) {
            runnable.push(job);
        } else {
            tracing::warn!(
                op = "run_cycles",
                resource_kind = job.reconciler.kind_name(),
                scope = %job.scope,
                "Duplicate cycle job dropped"
            );
            reports.push(CycleReport {
                kind: job.reconciler.kind_name().to_string(),
                scope: job.scope.clone(),
                result: Err(ExError::new(ExErrorKind::Concurrency)
                    .with_op("run_cycles")
                    .with_resource_kind(job.reconciler.kind_name())
                    .with_scope(job.scope)
                    .with_message("cycle for this kind and scope already scheduled")),
            });
        }
    }

    let finished: Vec<CycleReport> = stream::iter(runnable)
        .map(|job| async move {
            let result = job.reconciler.run_cycle(&job.scope, cancel).await;
            CycleReport {
                kind: job.reconciler.kind_name().to_string(),
                scope: job.scope,
                result,
            }
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await;

    reports.extend(finished);
    reports
}
