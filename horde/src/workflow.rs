//! Workflows and the per-iteration execution wrapper.
//!
//! A [`Workflow`] is the user-supplied script a virtual user runs over and over.
//! The executor treats it as an opaque callback: it hands each iteration a
//! fresh [`VuContext`] and turns whatever happens inside (success, error,
//! panic, cancellation) into an [`IterationOutcome`] without ever letting it
//! escape into the pool.
use std::{
    any::Any,
    future::Future,
    panic::{self, AssertUnwindSafe},
};

use futures::{FutureExt, future::BoxFuture};
use tokio_util::sync::CancellationToken;

use crate::{aggregate::CheckRecorder, error::WorkflowError};

/// A scripted sequence of requests run once per iteration by each virtual user.
///
/// Any `Fn(VuContext) -> impl Future<Output = Result<(), WorkflowError>>` is a
/// workflow. With the `macros` feature, `#[workflow]` turns an `async fn` into
/// one as well.
///
/// # Example
/// ```rust
/// use horde::{VuContext, WorkflowError};
///
/// let workflow = |ctx: VuContext| async move {
///     // NEVER build heavy things like HTTP clients in here;
///     // create them once and clone them into the closure.
///     let status = ctx.step("fetch", async { Ok::<_, std::io::Error>(200) }).await?;
///     ctx.check("status is 200", status == 200);
///     Ok::<(), WorkflowError>(())
/// };
/// # let _ = workflow;
/// ```
pub trait Workflow: Send + Sync + 'static {
    fn iterate(&self, ctx: VuContext) -> BoxFuture<'static, Result<(), WorkflowError>>;
}

impl<F, Fut> Workflow for F
where
    F: Fn(VuContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
{
    fn iterate(&self, ctx: VuContext) -> BoxFuture<'static, Result<(), WorkflowError>> {
        Box::pin(self(ctx))
    }
}

/// Everything an iteration gets to know about the run it belongs to.
#[derive(Clone, Debug)]
pub struct VuContext {
    vu: u64,
    iteration: u64,
    checks: CheckRecorder,
    cancel: CancellationToken,
}

impl VuContext {
    pub fn new(vu: u64, iteration: u64, checks: CheckRecorder, cancel: CancellationToken) -> Self {
        Self {
            vu,
            iteration,
            checks,
            cancel,
        }
    }

    /// Id of the virtual user running this iteration.
    pub fn vu_id(&self) -> u64 {
        self.vu
    }

    /// Zero-based iteration count of this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Record the outcome of a named check and hand `passed` back.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.checks.record(name, passed);
        passed
    }

    /// Make a check show up in the report even if it is never recorded.
    pub fn declare_check(&self, name: &str) {
        self.checks.declare(name);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled. Lets a workflow race its own
    /// long waits against shutdown without being able to trigger it.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Run one named step of the workflow.
    ///
    /// The step is skipped with [`WorkflowError::Cancelled`] if the run was
    /// cancelled before it started; futures are lazy, so no request goes out.
    /// Once started, a step is always awaited to completion. Errors are tagged
    /// with the step name.
    pub async fn step<T, E, Fut>(&self, name: &str, fut: Fut) -> Result<T, WorkflowError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        if self.cancel.is_cancelled() {
            tracing::trace!("VU {} skipping step `{name}` after cancellation", self.vu);
            return Err(WorkflowError::Cancelled);
        }
        fut.await.map_err(|e| WorkflowError::step(name, e))
    }
}

/// Result of a single workflow iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    /// The workflow returned an error or panicked.
    Failed {
        step: Option<String>,
        error: String,
    },
    /// The run was cancelled between two steps.
    Interrupted,
}

impl IterationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, IterationOutcome::Failed { .. })
    }
}

/// Execute `workflow` once, catching every error and panic it raises.
pub async fn run_iteration<W>(workflow: &W, ctx: VuContext) -> IterationOutcome
where
    W: Workflow + ?Sized,
{
    let vu = ctx.vu_id();
    let iteration = ctx.iteration();

    let fut = match panic::catch_unwind(AssertUnwindSafe(|| workflow.iterate(ctx))) {
        Ok(fut) => fut,
        Err(payload) => return panicked(vu, iteration, payload),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => IterationOutcome::Completed,
        Ok(Err(WorkflowError::Cancelled)) => IterationOutcome::Interrupted,
        Ok(Err(e)) => {
            tracing::debug!("VU {vu} iteration {iteration} failed: {e}");
            IterationOutcome::Failed {
                step: e.step_name().map(str::to_owned),
                error: e.to_string(),
            }
        }
        Err(payload) => panicked(vu, iteration, payload),
    }
}

fn panicked(vu: u64, iteration: u64, payload: Box<dyn Any + Send>) -> IterationOutcome {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    };
    tracing::warn!("VU {vu} iteration {iteration} panicked: {msg}");
    IterationOutcome::Failed {
        step: None,
        error: format!("panicked: {msg}"),
    }
}
