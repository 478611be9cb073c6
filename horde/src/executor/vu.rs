use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::CheckRecorder,
    workflow::{VuContext, Workflow, run_iteration},
};

/// Lifecycle of a single virtual user.
///
/// ```text
/// Idle ──▶ Running ──▶ Idle ──▶ ... ──▶ Stopped
///   │         │                          ▲
///   └─────────┴──▶ Stopping ─────────────┘
/// ```
///
/// A worker only reaches `Stopped` from `Idle` or `Stopping`, which both sit
/// on an iteration boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Spawned, or pausing between two iterations.
    Idle,
    /// Inside a workflow iteration.
    Running,
    /// Asked to stop; finishes its current iteration (if any) and exits.
    Stopping,
    Stopped,
}

/// A single observed state change of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTransition {
    pub worker: u64,
    pub from: WorkerState,
    pub to: WorkerState,
}

/// Callback invoked on every worker state change.
pub type TransitionHook = Arc<dyn Fn(WorkerTransition) + Send + Sync>;

/// Lifetime counters of a worker pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub spawned: u64,
    pub stop_signals: u64,
    pub exited: u64,
    pub spawn_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub spawned: AtomicU64,
    pub stop_signals: AtomicU64,
    pub exited: AtomicU64,
    pub spawn_failures: AtomicU64,
}

impl PoolCounters {
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            spawned: self.spawned.load(Ordering::Acquire),
            stop_signals: self.stop_signals.load(Ordering::Acquire),
            exited: self.exited.load(Ordering::Acquire),
            spawn_failures: self.spawn_failures.load(Ordering::Acquire),
        }
    }
}

/// State shared between a worker task and the pool that owns it.
///
/// Transitions happen under a lock so the hook observes them in the order
/// they took effect.
pub(crate) struct WorkerCell {
    pub id: u64,
    state: Mutex<WorkerState>,
    hook: Option<TransitionHook>,
    counters: Arc<PoolCounters>,
}

impl WorkerCell {
    pub fn new(id: u64, hook: Option<TransitionHook>, counters: Arc<PoolCounters>) -> Self {
        Self {
            id,
            state: Mutex::new(WorkerState::Idle),
            hook,
            counters,
        }
    }

    pub fn get(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if the worker is currently in `from`.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.transition_if(|s| s == from, to).is_some()
    }

    /// Mark the worker as stopping. Returns `false` if it was already on its way out.
    pub fn mark_stopping(&self) -> bool {
        self.transition_if(
            |s| matches!(s, WorkerState::Idle | WorkerState::Running),
            WorkerState::Stopping,
        )
        .is_some()
    }

    /// Final transition, taken by the worker itself on exit or by the pool when
    /// it aborts a straggler.
    pub fn finish(&self) {
        if self
            .transition_if(|s| s != WorkerState::Stopped, WorkerState::Stopped)
            .is_some()
        {
            self.counters.exited.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn transition_if(
        &self,
        allowed: impl FnOnce(WorkerState) -> bool,
        to: WorkerState,
    ) -> Option<WorkerState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *state;
        if !allowed(from) {
            return None;
        }
        *state = to;
        if let Some(hook) = &self.hook {
            hook(WorkerTransition {
                worker: self.id,
                from,
                to,
            });
        }
        Some(from)
    }
}

/// The iteration loop of one virtual user.
///
/// `stop` is a child of the run cancellation token, so it fires both when the
/// pool shrinks this worker away and when the whole run ends. Cancellation is
/// observed at the top of every iteration and during the pause; an iteration
/// that already started always runs to completion.
pub(crate) async fn vu_loop<W: Workflow>(
    cell: Arc<WorkerCell>,
    workflow: Arc<W>,
    checks: CheckRecorder,
    run_cancel: CancellationToken,
    stop: CancellationToken,
    pause: Duration,
) {
    let id = cell.id;
    let mut iteration = 0;
    tracing::debug!("VU {id} started.");

    loop {
        if stop.is_cancelled() {
            break;
        }
        if !cell.transition(WorkerState::Idle, WorkerState::Running) {
            break;
        }

        let ctx = VuContext::new(id, iteration, checks.clone(), run_cancel.clone());
        let outcome = run_iteration(workflow.as_ref(), ctx).await;
        checks.record_outcome(&outcome);
        iteration += 1;

        // Fails when the pool marked us Stopping mid-iteration.
        if !cell.transition(WorkerState::Running, WorkerState::Idle) {
            break;
        }

        if pause.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = stop.cancelled() => break,
        }
    }

    cell.finish();
    tracing::debug!("VU {id} shutting down after {iteration} iterations.");
}
