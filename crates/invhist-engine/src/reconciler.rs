//! One collection cycle for a (resource-kind, scope) pair.
//!
//! ## Cycle pipeline (in order):
//! 1. Fetch every raw snapshot (under the fetch deadline and the cancel token)
//! 2. Per snapshot: normalize, then read, diff and write in one store
//!    transaction; failures skip one resource, as do repeated IDs
//! 3. Stale sweep of current rows not refreshed by this cycle (best-effort)
//! 4. Ledger row for the cycle (best-effort)
//!
//! Every resource touched gets the same `collected_at`: the cycle start,
//! truncated to milliseconds. Store calls are synchronous and complete a
//! whole transaction, so cancellation between resources never leaves a
//! partially applied update. Steps 2 and 3 run on the blocking pool so that
//! SQLite work never stalls the async runtime driving other cycles.

use crate::config::EngineConfig;
use crate::source::SnapshotSource;
use chrono::{DateTime, Utc};
use invhist_core::errors::{ExError, ExErrorKind, Result};
use invhist_core::model::{truncate_millis, RawResource};
use invhist_core::{log_op_end, log_op_error, log_op_start, normalize, ChangeClass, ResourceKind};
use invhist_core_types::schema::EVENT_SKIP;
use invhist_core_types::CycleContext;
use invhist_store::{CycleCounts, CycleRun, CycleStatus, UpsertOutcome, VersionedStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What the orchestrator gets back from a successful cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleResult {
    /// Resources reconciled without error
    pub count: u64,
    pub duration_millis: u64,
}

pub struct Reconciler {
    kind: Arc<dyn ResourceKind>,
    store: Arc<VersionedStore>,
    source: Arc<dyn SnapshotSource>,
    fetch_timeout: Duration,
    cycle_timeout: Duration,
}

/// Synchronous half of a cycle: per-resource reconciliation and the sweep
#[derive(Clone)]
struct StorePhase {
    kind: Arc<dyn ResourceKind>,
    store: Arc<VersionedStore>,
    cycle_timeout: Duration,
}

/// Mutable bookkeeping for one cycle
#[derive(Default)]
struct CycleState {
    counts: CycleCounts,
    /// IDs present in the snapshot, reconciled or not
    seen: HashSet<String>,
}

impl Reconciler {
    /// # Errors
    ///
    /// `InvalidSchema` when `store` was opened for a different descriptor
    /// than `kind` declares.
    pub fn new(
        kind: Arc<dyn ResourceKind>,
        store: Arc<VersionedStore>,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<Self> {
        if kind.schema() != store.schema() {
            return Err(ExError::new(ExErrorKind::InvalidSchema)
                .with_op("new_reconciler")
                .with_resource_kind(kind.schema().kind.clone())
                .with_message(format!(
                    "store is bound to kind '{}'",
                    store.schema().kind
                )));
        }
        let defaults = EngineConfig::default();
        Ok(Self {
            kind,
            store,
            source,
            fetch_timeout: defaults.fetch_timeout(),
            cycle_timeout: defaults.cycle_timeout(),
        })
    }

    pub fn with_timeouts(mut self, fetch_timeout: Duration, cycle_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self.cycle_timeout = cycle_timeout;
        self
    }

    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_timeouts(config.fetch_timeout(), config.cycle_timeout())
    }

    pub fn kind_name(&self) -> &str {
        &self.kind.schema().kind
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Run one cycle for `scope`.
    ///
    /// # Errors
    ///
    /// - Any error from the snapshot source (the cycle did nothing)
    /// - `Timeout` when the fetch or cycle deadline passes
    /// - `Cancelled` when `cancel` fires; resources already reconciled stay
    ///   reconciled and the stale sweep is skipped
    pub async fn run_cycle(&self, scope: &str, cancel: &CancellationToken) -> Result<CycleResult> {
        self.run_cycle_with(CycleContext::new(self.kind_name(), scope), cancel)
            .await
    }

    /// Run one cycle under an orchestrator-supplied context.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::run_cycle`].
    pub async fn run_cycle_with(
        &self,
        ctx: CycleContext,
        cancel: &CancellationToken,
    ) -> Result<CycleResult> {
        let span = tracing::info_span!(
            "cycle",
            cycle_id = %ctx.cycle_id,
            kind = %ctx.kind,
            scope = %ctx.scope,
        );
        self.cycle(ctx, cancel).instrument(span).await
    }

    async fn cycle(&self, ctx: CycleContext, cancel: &CancellationToken) -> Result<CycleResult> {
        let started = Instant::now();
        let started_at = truncate_millis(Utc::now());
        let scope = ctx.scope.as_str();
        log_op_start!(
            "run_cycle",
            cycle_id = %ctx.cycle_id,
            resource_kind = %ctx.kind,
            scope = %scope
        );

        let mut state = CycleState::default();
        let result = self
            .execute(scope, started_at, started, &mut state, cancel)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.record(&ctx, started_at, &state.counts, &result);

        match result {
            Ok(()) => {
                let count = state.counts.reconciled();
                log_op_end!(
                    "run_cycle",
                    duration_ms = duration_ms,
                    cycle_id = %ctx.cycle_id,
                    scope = %scope,
                    count = count,
                    skipped = state.counts.skipped,
                    swept = state.counts.swept
                );
                Ok(CycleResult {
                    count,
                    duration_millis: duration_ms,
                })
            }
            Err(err) => {
                let err = err
                    .with_resource_kind(ctx.kind.clone())
                    .with_scope(scope);
                log_op_error!(
                    "run_cycle",
                    err.clone(),
                    duration_ms = duration_ms,
                    cycle_id = %ctx.cycle_id,
                    scope = %scope
                );
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        scope: &str,
        cycle_start: DateTime<Utc>,
        started: Instant,
        state: &mut CycleState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = started + self.cycle_timeout;
        let raws = self.fetch(scope, deadline, cancel).await?;
        let fetched = raws.len() as u64;
        state.counts.fetched = fetched;

        let phase = StorePhase {
            kind: self.kind.clone(),
            store: self.store.clone(),
            cycle_timeout: self.cycle_timeout,
        };
        let scope = scope.to_string();
        let cancel = cancel.clone();
        let span = tracing::Span::current();
        let mut owned = std::mem::take(state);

        let joined = tokio::task::spawn_blocking(move || {
            let result = span.in_scope(|| {
                phase.run(&raws, &scope, cycle_start, deadline, &mut owned, &cancel)
            });
            (result, owned)
        })
        .await;

        match joined {
            Ok((result, phase_state)) => {
                *state = phase_state;
                result
            }
            Err(e) => {
                state.counts.fetched = fetched;
                Err(ExError::new(ExErrorKind::Internal)
                    .with_op("reconcile")
                    .with_message(format!("store phase aborted: {e}")))
            }
        }
    }

    async fn fetch(
        &self,
        scope: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawResource>> {
        let budget = self
            .fetch_timeout
            .min(deadline.saturating_duration_since(Instant::now()));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled("fetch")),
            listed = tokio::time::timeout(budget, self.source.list(scope)) => match listed {
                Ok(resources) => resources.map_err(|e| {
                    if e.op().is_none() {
                        e.with_op("fetch")
                    } else {
                        e
                    }
                }),
                Err(_) => Err(timed_out("fetch", budget)),
            },
        }
    }

    fn record(
        &self,
        ctx: &CycleContext,
        started_at: DateTime<Utc>,
        counts: &CycleCounts,
        result: &Result<()>,
    ) {
        let (status, error_code) = match result {
            Ok(()) => (CycleStatus::Completed, None),
            Err(e) if e.kind() == ExErrorKind::Cancelled => {
                (CycleStatus::Cancelled, Some(e.code().to_string()))
            }
            Err(e) => (CycleStatus::Failed, Some(e.code().to_string())),
        };
        let run = CycleRun {
            cycle_id: ctx.cycle_id.to_string(),
            kind: ctx.kind.clone(),
            scope: ctx.scope.clone(),
            started_at,
            finished_at: truncate_millis(Utc::now()),
            status,
            counts: *counts,
            error_code,
        };
        if let Err(e) = self.store.record_cycle(&run) {
            tracing::warn!(
                op = "record_cycle",
                err_code = e.code(),
                error = %e,
                "Failed to record cycle ledger row"
            );
        }
    }
}

impl StorePhase {
    /// Reconcile every snapshot in order, then sweep.
    fn run(
        &self,
        raws: &[RawResource],
        scope: &str,
        cycle_start: DateTime<Utc>,
        deadline: Instant,
        state: &mut CycleState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for raw in raws {
            if cancel.is_cancelled() {
                return Err(cancelled("reconcile"));
            }
            if Instant::now() >= deadline {
                return Err(timed_out("reconcile", self.cycle_timeout));
            }
            self.reconcile_one(raw, scope, cycle_start, state);
        }

        if cancel.is_cancelled() {
            return Err(cancelled("sweep"));
        }
        self.sweep(scope, cycle_start, state, cancel)
    }

    fn reconcile_one(
        &self,
        raw: &RawResource,
        scope: &str,
        cycle_start: DateTime<Utc>,
        state: &mut CycleState,
    ) {
        // Present-but-broken resources must not be swept; a repeated ID keeps
        // its first copy
        if let Some(id) = self.kind.resource_id(raw) {
            let id = id.trim().to_string();
            if !state.seen.insert(id.clone()) {
                state.counts.skipped += 1;
                warn_duplicate(scope, id);
                return;
            }
        }

        match self.apply(raw, scope, cycle_start) {
            Ok((id, outcome)) => {
                state.seen.insert(id);
                match outcome.class {
                    ChangeClass::New => state.counts.created += 1,
                    ChangeClass::CoreChanged | ChangeClass::ChildrenOnly => {
                        state.counts.updated += 1
                    }
                    ChangeClass::Unchanged => state.counts.unchanged += 1,
                }
            }
            Err(err) => {
                state.counts.skipped += 1;
                if err.kind() == ExErrorKind::ConsistencyViolation {
                    log_op_error!(
                        "reconcile_resource",
                        err.clone(),
                        duration_ms = 0,
                        resource_id = err.resource_id().unwrap_or_default(),
                        scope = %scope
                    );
                } else {
                    tracing::warn!(
                        op = "reconcile_resource",
                        event = EVENT_SKIP,
                        resource_id = err.resource_id().unwrap_or_default(),
                        scope = %scope,
                        err_code = err.code(),
                        error = %err,
                        "Skipping resource"
                    );
                }
            }
        }
    }

    /// Normalize one resource and version it in a single store transaction
    fn apply(
        &self,
        raw: &RawResource,
        scope: &str,
        cycle_start: DateTime<Utc>,
    ) -> Result<(String, UpsertOutcome)> {
        let resource = normalize(self.kind.as_ref(), raw, scope, cycle_start)?;
        let with_context = |e: ExError| {
            e.with_resource_kind(self.kind.schema().kind.clone())
                .with_resource_id(resource.id.clone())
                .with_scope(scope)
        };

        let (verdict, outcome) = self.store.reconcile(&resource).map_err(with_context)?;

        if verdict.has_any_change() {
            tracing::debug!(
                op = "reconcile_resource",
                resource_id = %resource.id,
                class = outcome.class.as_str(),
                changed_fields = ?verdict.changed_fields,
                changed_children = ?verdict.changed_children(),
                history_id = ?outcome.history_id,
                "Resource versioned"
            );
        }
        Ok((resource.id, outcome))
    }

    /// Close and delete current rows this cycle did not refresh.
    ///
    /// Never fails the cycle except on cancellation; each failure is a
    /// `StaleSweep` warning.
    fn sweep(
        &self,
        scope: &str,
        cycle_start: DateTime<Utc>,
        state: &mut CycleState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stale = match self.store.stale_ids(scope, cycle_start) {
            Ok(ids) => ids,
            Err(e) => {
                state.counts.sweep_failures += 1;
                warn_sweep(scope, None, e);
                return Ok(());
            }
        };

        for id in stale.into_iter().filter(|id| !state.seen.contains(id)) {
            if cancel.is_cancelled() {
                return Err(cancelled("sweep"));
            }
            match self.store.close_and_delete(&id, cycle_start) {
                Ok(true) => {
                    state.counts.swept += 1;
                    tracing::debug!(op = "sweep", resource_id = %id, "Closed stale resource");
                }
                Ok(false) => {}
                Err(e) => {
                    state.counts.sweep_failures += 1;
                    warn_sweep(scope, Some(&id), e);
                }
            }
        }
        Ok(())
    }
}

/// Later copies of an ID already seen this cycle are dropped; the first wins.
fn warn_duplicate(scope: &str, id: String) {
    let err = ExError::new(ExErrorKind::MalformedInput)
        .with_op("reconcile_resource")
        .with_scope(scope)
        .with_resource_id(id)
        .with_message("duplicate resource id in snapshot");
    tracing::warn!(
        op = "reconcile_resource",
        event = EVENT_SKIP,
        resource_id = err.resource_id().unwrap_or_default(),
        scope = %scope,
        err_code = err.code(),
        error = %err,
        "Skipping duplicate resource"
    );
}

fn warn_sweep(scope: &str, resource_id: Option<&str>, source: ExError) {
    let err = ExError::new(ExErrorKind::StaleSweep)
        .with_op("sweep")
        .with_scope(scope)
        .with_message("stale sweep failed")
        .with_source(source);
    let err = match resource_id {
        Some(id) => err.with_resource_id(id),
        None => err,
    };
    tracing::warn!(
        op = "sweep",
        event = EVENT_SKIP,
        resource_id = resource_id.unwrap_or_default(),
        scope = %scope,
        err_code = err.code(),
        error = %err,
        "Stale sweep failed"
    );
}

fn cancelled(op: &str) -> ExError {
    ExError::new(ExErrorKind::Cancelled)
        .with_op(op)
        .with_message("cycle cancelled")
}

fn timed_out(op: &str, after: Duration) -> ExError {
    ExError::new(ExErrorKind::Timeout)
        .with_op(op)
        .with_message(format!("deadline of {}ms exceeded", after.as_millis()))
}
