//! Horde — staged virtual-user load generation for HTTP services.
//!
//! Horde drives a target service with a scripted workflow executed concurrently
//! by many simulated clients ("virtual users"). The number of virtual users
//! follows a time-varying profile of stages, and every named check the workflow
//! records is tallied into a pass/fail report.
//!
//! The library does not ship an HTTP client: workflows bring their own and the
//! executor treats them as opaque callbacks.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Workflow`]: the user-supplied script run once per iteration by each virtual user.
//! - [`Scenario`]: a named workflow, handed to an executor.
//! - [`Executor`]: decides how many virtual users run at any instant. The built-in
//!   [`RampingExecutor`] interpolates linearly between [`Stage`] targets and keeps a
//!   [`WorkerPool`] in line with it.
//! - [`CheckAggregator`]: collects check outcomes from every worker without locks on
//!   the hot path.
//! - [`RunReport`]: the immutable summary of a run.
//! - [`Reporter`]: sends a report somewhere (stdout, JSON, ...).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use horde::{
//!     RampingExecutor, Reporter, Scenario, VuContext, WorkflowError,
//!     executor::{Profile, Stage},
//!     report::StdoutReporter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scenario = Scenario::new("smoke", |ctx: VuContext| async move {
//!         let ok = ctx.step("ping", async { Ok::<_, std::io::Error>(true) }).await?;
//!         ctx.check("ping answered", ok);
//!         Ok::<(), WorkflowError>(())
//!     });
//!
//!     let executor = RampingExecutor::builder()
//!         // Ramp to 10 users, hold, ramp back down.
//!         .profile(Profile::new(vec![
//!             Stage::new(Duration::from_secs(15), 10),
//!             Stage::new(Duration::from_secs(10), 10),
//!             Stage::new(Duration::from_secs(15), 0),
//!         ])?)
//!         .pause(Duration::from_secs(1))
//!         .build();
//!
//!     let report = scenario.run(&executor).await?;
//!     StdoutReporter.report(&report).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `macros`: the `#[workflow]` attribute, turning an `async fn` into a [`Workflow`].
//!   (Enabled by default)

/// Check tallies shared by all workers
pub mod aggregate;
/// JSON run configuration
pub mod config;
/// Error types
pub mod error;
/// Orchestrators that decide how many virtual users run
pub mod executor;
/// Reports and Reporters
pub mod report;
/// Named workflows
pub mod scenario;
/// Workflows and single iterations
pub mod workflow;

pub use aggregate::{CheckAggregator, CheckRecorder};
pub use config::RunConfig;
pub use error::{ConfigError, ResourceError, RunError, WorkflowError};
pub use executor::{Executor, Profile, RampingExecutor, Stage, WorkerPool};
pub use report::{CheckSummary, Reporter, RunReport, RunStatus};
pub use scenario::Scenario;
pub use workflow::{IterationOutcome, VuContext, Workflow, run_iteration};

pub use futures::future::BoxFuture;

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use horde_macros::*;
}
