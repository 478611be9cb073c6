use std::{
    cmp::Reverse,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use futures::future::join_all;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use super::vu::{PoolCounters, PoolStats, TransitionHook, WorkerCell, WorkerState, vu_loop};
use crate::{aggregate::CheckRecorder, error::ResourceError, workflow::Workflow};

struct WorkerHandle {
    cell: Arc<WorkerCell>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn signal_stop(&self) {
        self.cell.mark_stopping();
        self.stop.cancel();
    }
}

/// Keeps the number of running virtual users in line with a target.
///
/// The pool owns every worker it starts. [`reconcile`](Self::reconcile) grows
/// the pool by spawning workers and shrinks it by signalling workers to stop;
/// it never waits for a worker and never interrupts an iteration. Signalled
/// workers move to a draining set and are reaped once their task ends.
///
/// # Shrink policy
///
/// LIFO with an idle preference: workers currently between iterations are
/// stopped first, and within each group the most recently started worker goes
/// first. Long-lived workers therefore keep their warm connections.
pub struct WorkerPool<W: Workflow> {
    workflow: Arc<W>,
    checks: CheckRecorder,
    cancel: CancellationToken,
    pause: Duration,
    max_vus: Option<usize>,
    hook: Option<TransitionHook>,
    counters: Arc<PoolCounters>,
    next_id: u64,
    peak: usize,
    /// Workers counted towards the target, in start order.
    live: Vec<WorkerHandle>,
    /// Workers told to stop that have not exited yet.
    draining: Vec<WorkerHandle>,
}

impl<W: Workflow> WorkerPool<W> {
    pub fn new(
        workflow: Arc<W>,
        checks: CheckRecorder,
        cancel: CancellationToken,
        pause: Duration,
    ) -> Self {
        Self {
            workflow,
            checks,
            cancel,
            pause,
            max_vus: None,
            hook: None,
            counters: Arc::new(PoolCounters::default()),
            next_id: 0,
            peak: 0,
            live: Vec::new(),
            draining: Vec::new(),
        }
    }

    /// Refuse to hold more than `limit` worker tasks at once, draining ones included.
    pub fn with_max_vus(mut self, limit: Option<usize>) -> Self {
        self.max_vus = limit;
        self
    }

    pub fn with_hook(mut self, hook: Option<TransitionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Workers counted towards the target.
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Workers signalled to stop that are still finishing an iteration.
    pub fn draining(&self) -> usize {
        self.draining.len()
    }

    /// Largest live count seen so far.
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Current state of every live worker, in start order.
    pub fn states(&self) -> Vec<WorkerState> {
        self.live.iter().map(|h| h.cell.get()).collect()
    }

    /// Bring the live worker count to `target`.
    ///
    /// On a spawn failure the remaining shortfall is left for the next call and
    /// the error is returned; workers spawned before the failure stay up.
    pub fn reconcile(&mut self, target: usize) -> Result<(), ResourceError> {
        self.reap();
        let live = self.live.len();

        if target > live {
            tracing::debug!("Growing pool {live} -> {target}");
            for _ in live..target {
                if let Err(e) = self.spawn_worker() {
                    self.counters.spawn_failures.fetch_add(1, Ordering::AcqRel);
                    tracing::warn!(
                        "Could not start worker ({} of {target} running): {e}",
                        self.live.len()
                    );
                    return Err(e);
                }
            }
        } else if target < live {
            tracing::debug!("Shrinking pool {live} -> {target}");
            self.shrink(live - target);
        }
        Ok(())
    }

    fn spawn_worker(&mut self) -> Result<(), ResourceError> {
        if let Some(limit) = self.max_vus {
            if self.live.len() + self.draining.len() >= limit {
                return Err(ResourceError::Exhausted { limit });
            }
        }
        let runtime = Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;

        let id = self.next_id;
        self.next_id += 1;
        let cell = Arc::new(WorkerCell::new(
            id,
            self.hook.clone(),
            Arc::clone(&self.counters),
        ));
        let stop = self.cancel.child_token();
        let task = runtime.spawn(vu_loop(
            Arc::clone(&cell),
            Arc::clone(&self.workflow),
            self.checks.clone(),
            self.cancel.clone(),
            stop.clone(),
            self.pause,
        ));

        self.counters.spawned.fetch_add(1, Ordering::AcqRel);
        self.live.push(WorkerHandle { cell, stop, task });
        self.peak = self.peak.max(self.live.len());
        Ok(())
    }

    fn shrink(&mut self, n: usize) {
        let mut order: Vec<usize> = (0..self.live.len()).collect();
        order.sort_by_key(|&i| (self.live[i].cell.get() != WorkerState::Idle, Reverse(i)));
        let mut chosen: Vec<usize> = order.into_iter().take(n).collect();
        // Remove from the back so earlier indices stay valid.
        chosen.sort_unstable_by(|a, b| b.cmp(a));

        for i in chosen {
            let handle = self.live.remove(i);
            handle.signal_stop();
            self.counters.stop_signals.fetch_add(1, Ordering::AcqRel);
            tracing::debug!("Signalled VU {} to stop", handle.cell.id);
            self.draining.push(handle);
        }
    }

    /// Forget about workers whose task has ended.
    fn reap(&mut self) {
        self.draining.retain(|h| !h.task.is_finished());
        // Live workers only end on their own when the run is cancelled.
        self.live.retain(|h| !h.task.is_finished());
    }

    /// Stop every worker and wait up to `timeout` for them to finish their
    /// current iteration. Workers still running afterwards are aborted.
    ///
    /// Returns the number of aborted stragglers.
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        for handle in self.live.drain(..) {
            handle.signal_stop();
            self.draining.push(handle);
        }
        tracing::info!("Draining {} workers...", self.draining.len());

        let joined = tokio::time::timeout(
            timeout,
            join_all(self.draining.iter_mut().map(|h| &mut h.task)),
        )
        .await;

        match joined {
            Ok(results) => {
                for res in results {
                    if let Err(e) = res {
                        tracing::error!("Worker task failed: {e}");
                    }
                }
                self.draining.clear();
                0
            }
            Err(_) => {
                let mut stragglers = 0;
                for handle in self.draining.drain(..) {
                    if !handle.task.is_finished() {
                        tracing::warn!("Aborting VU {} after drain timeout", handle.cell.id);
                        handle.task.abort();
                        handle.cell.finish();
                        stragglers += 1;
                    }
                }
                stragglers
            }
        }
    }
}
