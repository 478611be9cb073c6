use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    future::Future,
    io::Write,
    sync::Mutex,
    time::Duration,
};

/// Pass/fail counters for one named check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub pass_count: u64,
    pub fail_count: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.pass_count + self.fail_count
    }

    /// Fraction of observations that passed, or `None` if the check was never observed.
    pub fn pass_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.pass_count as f64 / total as f64),
        }
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    /// The profile ran to its end and every worker drained.
    Completed,
    /// The run was stopped before its deadline and every worker drained.
    Cancelled,
    /// Workers could not be started for too long; the run stayed below target.
    Degraded { spawn_failures: u64 },
    /// Workers were still busy when the hard timeout hit and were aborted.
    FailedToDrain { stragglers: usize },
}

impl RunStatus {
    /// Whether every result the workers produced is accounted for.
    pub fn is_complete(&self) -> bool {
        !matches!(self, RunStatus::FailedToDrain { .. })
    }
}

/// The finalized, immutable result of a run.
///
/// Reports are pure data: they are produced once by
/// [`CheckAggregator::finalize`](crate::CheckAggregator::finalize) and handed
/// to a [`Reporter`] for display or export.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub summaries: BTreeMap<String, CheckSummary>,
    pub total_iterations: u64,
    pub failed_iterations: u64,
    /// Iterations cut short at a step boundary because the run was cancelled.
    pub interrupted_iterations: u64,
    /// Failed iterations per step name.
    pub errors: BTreeMap<String, u64>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub peak_workers: usize,
    pub status: RunStatus,
}

impl RunReport {
    pub fn summary(&self, name: &str) -> Option<&CheckSummary> {
        self.summaries.get(name)
    }

    /// Iterations per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_iterations as f64 / secs
        }
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status: {:?}", self.status)?;
        writeln!(
            f,
            "iterations: {} ({} failed, {} interrupted) in {:.2}s, {:.1}/s, peak {} workers",
            self.total_iterations,
            self.failed_iterations,
            self.interrupted_iterations,
            self.elapsed.as_secs_f64(),
            self.throughput(),
            self.peak_workers,
        )?;
        for s in self.summaries.values() {
            let rate = match s.pass_rate() {
                Some(r) => format!("{:.2}%", r * 100.0),
                None => "n/a".to_owned(),
            };
            let mark = if s.fail_count == 0 { '✓' } else { '✗' };
            writeln!(
                f,
                "  {mark} {:<40} {rate:>8}  ✓ {} / ✗ {}",
                s.name, s.pass_count, s.fail_count
            )?;
        }
        for (step, count) in &self.errors {
            writeln!(f, "  ! {step}: {count} failed iterations")?;
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// A [`Reporter`] consumes a [`RunReport`] and performs side effects: displaying
/// it, sending it to a service, or persisting it somewhere.
///
/// # Example
/// ```rust
/// use horde::{Reporter, RunReport};
/// struct MyReporter;
/// impl Reporter for MyReporter {
///     async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
///         println!("{} iterations", report.total_iterations);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(
        &self,
        report: &RunReport,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

/// Prints the human-readable summary to stdout.
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{report}");
        Ok(())
    }
}

/// Writes the report as a single JSON document.
pub struct JsonReporter<W> {
    out: Mutex<W>,
    pretty: bool,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            pretty: false,
        }
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
        let mut out = self.out.lock().map_err(|_| "json reporter output poisoned")?;
        if self.pretty {
            serde_json::to_writer_pretty(&mut *out, report)?;
        } else {
            serde_json::to_writer(&mut *out, report)?;
        }
        writeln!(out)?;
        Ok(())
    }
}
