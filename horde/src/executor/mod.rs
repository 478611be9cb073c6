//! Executor — orchestration of virtual users over time
//!
//! The `Executor` trait is the runtime that executes a [`Scenario`]. Horde ships
//! the [`RampingExecutor`], which follows a profile of [`Stage`]s: each stage
//! gives a target number of concurrent virtual users (VUs) and a duration over
//! which the executor moves linearly from the previous target to that one.
//!
//! This design separates **deciding how many workers should run** (the stage
//! engine and the coordinating loop) from **running the workflow** (the worker
//! tasks), and keeps the hot path in workers focused on calling the user's
//! workflow.
//!
//! # High-level flow
//! 1. A run-level cancellation token and an empty check aggregator are created.
//! 2. Every `tick`, the coordinating loop resolves the target at the current
//!    elapsed time and asks the [`WorkerPool`] to reconcile towards it:
//!    - too few workers: spawn the difference,
//!    - too many: signal the surplus to stop (idle workers first, newest first).
//! 3. Each worker repeatedly runs one workflow iteration, records its outcome,
//!    then pauses. Stop signals are observed between iterations only.
//! 4. At the deadline (or on cancellation) every worker is signalled, the pool
//!    is drained within a bounded timeout and the aggregator is finalized into
//!    a [`RunReport`].
//!
//! # Mathematical behavior of the stage engine
//! For a stage going from `c0` (the previous target) to `c1` over `d`, the target
//! at `elapsed` time into the stage is:
//!
//! ```text
//! t = min(elapsed / d, 1)
//! target(t) = round(c0 + (c1 - c0) * t)
//! ```
//!
//! A stage with a zero duration is a step: the target jumps to `c1` at once.
//!
//! # Common pitfalls & recommendations
//! - **Do not perform blocking I/O inside the workflow.** Use async clients.
//!   Blocking stalls the runtime threads and every other worker with them.
//! - **Build clients once.** Create HTTP clients outside the workflow and clone
//!   them in; they pool connections internally.
//! - **Pick `tick` relative to your ramps.** A 1s tick on a 10s ramp to 1000 VUs
//!   spawns 100 workers per tick in bursts.
pub mod pool;
pub mod ramping;
pub mod stage;
pub mod vu;

pub use pool::WorkerPool;
pub use ramping::RampingExecutor;
pub use stage::{Profile, Stage, StagePoint};
pub use vu::{PoolStats, TransitionHook, WorkerState, WorkerTransition};

use crate::{report::RunReport, scenario::Scenario, workflow::Workflow};
use std::future::Future;

/// The runtime hook that executes a `Scenario`.
///
/// `Executor` defines the execution strategy for a given scenario: how many
/// virtual users run at any instant and for how long.
pub trait Executor<W>
where
    Self: Send + Sync + Sized,
    W: Workflow,
{
    type Error;
    /// Execute the scenario and return the finalized report.
    fn exec(
        &self,
        scenario: &Scenario<W>,
    ) -> impl Future<Output = Result<RunReport, Self::Error>> + Send;
}
