use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;

use crate::{
    report::{CheckSummary, RunReport, RunStatus},
    workflow::IterationOutcome,
};

/// Label used in the error breakdown for failures not tied to a named step.
pub const UNTAGGED_STEP: &str = "<workflow>";

/// Run-wide tally of check outcomes and iteration results.
///
/// The `CheckAggregator` owns the tallies for one run. Workers never see it
/// directly; they receive cheap [`CheckRecorder`] handles that share the same
/// storage. Every update is a single atomic increment on a per-name counter,
/// so concurrent workers can record in any interleaving without losing counts.
///
/// Check names are free-form. A name is added the first time it is recorded
/// (or [declared](CheckRecorder::declare)) and is never dropped.
///
/// [`finalize`](Self::finalize) consumes the aggregator, so a run can only be
/// finalized once.
#[derive(Debug, Default)]
pub struct CheckAggregator {
    tallies: Arc<Tallies>,
}

/// Cloneable, thread-safe handle used to record outcomes into a [`CheckAggregator`].
#[derive(Clone, Debug)]
pub struct CheckRecorder {
    tallies: Arc<Tallies>,
}

#[derive(Debug, Default)]
struct Tallies {
    checks: DashMap<String, Counts>,
    errors: DashMap<String, AtomicU64>,
    iterations: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
}

#[derive(Debug, Default)]
struct Counts {
    pass: AtomicU64,
    fail: AtomicU64,
}

impl CheckAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> CheckRecorder {
        CheckRecorder {
            tallies: Arc::clone(&self.tallies),
        }
    }

    /// Snapshot every tally into an immutable [`RunReport`].
    ///
    /// Call after all workers have stopped. Handles still held by aborted
    /// stragglers keep writing into storage nobody reads anymore.
    pub fn finalize(self, elapsed: Duration, status: RunStatus, peak_workers: usize) -> RunReport {
        let t = &self.tallies;
        let summaries: BTreeMap<String, CheckSummary> = t
            .checks
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let summary = CheckSummary {
                    name: name.clone(),
                    pass_count: entry.pass.load(Ordering::Acquire),
                    fail_count: entry.fail.load(Ordering::Acquire),
                };
                (name, summary)
            })
            .collect();
        let errors = t
            .errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Acquire)))
            .collect();

        RunReport {
            summaries,
            total_iterations: t.iterations.load(Ordering::Acquire),
            failed_iterations: t.failed.load(Ordering::Acquire),
            interrupted_iterations: t.interrupted.load(Ordering::Acquire),
            errors,
            elapsed,
            peak_workers,
            status,
        }
    }
}

impl CheckRecorder {
    /// Record one observation of the named check.
    pub fn record(&self, name: &str, passed: bool) {
        // Fast path: the name is already known, only a shard read lock is taken.
        if let Some(counts) = self.tallies.checks.get(name) {
            counts.bump(passed);
            return;
        }
        self.tallies
            .checks
            .entry(name.to_owned())
            .or_default()
            .bump(passed);
    }

    /// Register a check without observing it, so it shows up in the report
    /// even if no iteration ever reaches it.
    pub fn declare(&self, name: &str) {
        if !self.tallies.checks.contains_key(name) {
            self.tallies.checks.entry(name.to_owned()).or_default();
        }
    }

    /// Account for one finished iteration.
    pub fn record_outcome(&self, outcome: &IterationOutcome) {
        let t = &self.tallies;
        t.iterations.fetch_add(1, Ordering::AcqRel);
        match outcome {
            IterationOutcome::Completed => {}
            IterationOutcome::Interrupted => {
                t.interrupted.fetch_add(1, Ordering::AcqRel);
            }
            IterationOutcome::Failed { step, .. } => {
                t.failed.fetch_add(1, Ordering::AcqRel);
                let key = step.as_deref().unwrap_or(UNTAGGED_STEP);
                if let Some(count) = t.errors.get(key) {
                    count.fetch_add(1, Ordering::AcqRel);
                } else {
                    t.errors
                        .entry(key.to_owned())
                        .or_default()
                        .fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }
}

impl Counts {
    fn bump(&self, passed: bool) {
        let counter = if passed { &self.pass } else { &self.fail };
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalize(agg: CheckAggregator) -> RunReport {
        agg.finalize(Duration::from_secs(1), RunStatus::Completed, 0)
    }

    #[test]
    fn creates_entries_on_first_use() {
        let agg = CheckAggregator::new();
        let rec = agg.recorder();
        rec.record("added book successfully", true);
        rec.record("added book successfully", false);
        rec.record("deleted user successfully", true);

        let report = finalize(agg);
        let added = &report.summaries["added book successfully"];
        assert_eq!((added.pass_count, added.fail_count), (1, 1));
        let deleted = &report.summaries["deleted user successfully"];
        assert_eq!((deleted.pass_count, deleted.fail_count), (1, 0));
    }

    #[test]
    fn declared_check_without_observations_has_no_rate() {
        let agg = CheckAggregator::new();
        agg.recorder().declare("never reached");

        let report = finalize(agg);
        let summary = &report.summaries["never reached"];
        assert_eq!(summary.total(), 0);
        assert_eq!(summary.pass_rate(), None);
    }

    #[test]
    fn declare_does_not_reset_counts() {
        let agg = CheckAggregator::new();
        let rec = agg.recorder();
        rec.record("a", true);
        rec.declare("a");
        assert_eq!(finalize(agg).summaries["a"].pass_count, 1);
    }

    #[test]
    fn outcomes_are_tallied_by_step() {
        let agg = CheckAggregator::new();
        let rec = agg.recorder();
        rec.record_outcome(&IterationOutcome::Completed);
        rec.record_outcome(&IterationOutcome::Interrupted);
        for _ in 0..2 {
            rec.record_outcome(&IterationOutcome::Failed {
                step: Some("add book".into()),
                error: "boom".into(),
            });
        }
        rec.record_outcome(&IterationOutcome::Failed {
            step: None,
            error: "panicked".into(),
        });

        let report = finalize(agg);
        assert_eq!(report.total_iterations, 5);
        assert_eq!(report.failed_iterations, 3);
        assert_eq!(report.interrupted_iterations, 1);
        assert_eq!(report.errors["add book"], 2);
        assert_eq!(report.errors[UNTAGGED_STEP], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn no_lost_updates_under_contention() {
        const TASKS: u64 = 64;
        const PER_TASK: u64 = 2_000;

        let agg = CheckAggregator::new();
        let handles: Vec<_> = (0..TASKS)
            .map(|i| {
                let rec = agg.recorder();
                tokio::spawn(async move {
                    for j in 0..PER_TASK {
                        rec.record("shared", (i + j) % 3 != 0);
                        rec.record(&format!("task-{}", i % 4), true);
                        if j % 100 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let report = finalize(agg);
        assert_eq!(report.summaries["shared"].total(), TASKS * PER_TASK);
        let per_name: u64 = (0..4)
            .map(|k| report.summaries[&format!("task-{k}")].pass_count)
            .sum();
        assert_eq!(per_name, TASKS * PER_TASK);
    }
}
