use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{Executor, pool::WorkerPool, stage::Profile, vu::TransitionHook};
use crate::{
    aggregate::CheckAggregator,
    config::RunConfig,
    error::{ConfigError, RunError},
    report::{RunReport, RunStatus},
    scenario::Scenario,
    workflow::Workflow,
};

/// Executor that ramps a pool of virtual users up and down along a [`Profile`].
///
/// A single coordinating loop wakes every `tick`, asks the profile how many
/// workers it wants at that instant and lets the [`WorkerPool`] reconcile
/// towards it. The loop never waits on a worker.
///
/// The run ends when the profile (or `max_duration`) runs out or when the
/// `cancel` token fires. Workers then get `drain_timeout` to finish their
/// current iteration; whatever is still running afterwards is aborted and the
/// report is marked [`RunStatus::FailedToDrain`].
///
/// # Tuning Knobs
///
/// - `tick`: how often the pool is reconciled. Smaller ticks follow steep ramps
///   more closely. Default 1s.
/// - `pause`: sleep between two iterations of the same worker. Default none.
/// - `max_vus`: hard cap on concurrent worker tasks. Exceeding it is treated as
///   a resource error and retried every tick.
/// - `spawn_retry_limit`: consecutive failing ticks after which the run is
///   flagged [`RunStatus::Degraded`]. It keeps going below target.
#[derive(TypedBuilder)]
pub struct RampingExecutor {
    pub profile: Profile,
    #[builder(default = Duration::from_secs(1))]
    pub tick: Duration,
    #[builder(default = Duration::ZERO)]
    pub pause: Duration,
    /// Stop the run early, regardless of the profile.
    #[builder(default, setter(strip_option))]
    pub max_duration: Option<Duration>,
    /// Defaults to the planned run length, so a run never outlives twice its plan.
    #[builder(default, setter(strip_option))]
    pub drain_timeout: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub max_vus: Option<usize>,
    #[builder(default = 5)]
    pub spawn_retry_limit: u32,
    /// Cancel this token to stop the run before its deadline.
    #[builder(default)]
    pub cancel: CancellationToken,
    /// Observe every worker state change.
    #[builder(default, setter(strip_option))]
    pub on_transition: Option<TransitionHook>,
}

impl RampingExecutor {
    /// Build an executor from a parsed [`RunConfig`].
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let tick = config.tick()?;
        if tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        Ok(Self {
            profile: config.profile()?,
            tick,
            pause: config.pause()?,
            max_duration: config.max_duration()?,
            drain_timeout: config.drain_timeout()?,
            max_vus: config.max_vus,
            spawn_retry_limit: config.spawn_retry_limit,
            cancel: CancellationToken::new(),
            on_transition: None,
        })
    }

    /// A handle that stops the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// How long the coordinating loop runs before draining.
    pub fn planned_duration(&self) -> Duration {
        self.max_duration.unwrap_or(self.profile.total_duration())
    }
}

impl<W: Workflow> Executor<W> for RampingExecutor {
    type Error = RunError;

    async fn exec(&self, scenario: &Scenario<W>) -> Result<RunReport, Self::Error> {
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick.into());
        }
        let planned = self.planned_duration();
        let drain_timeout = self.drain_timeout.unwrap_or(planned).max(self.tick);
        let stage_count = self.profile.stages().len();
        let start = Instant::now();
        let deadline = start
            .checked_add(planned)
            .ok_or(ConfigError::DeadlineOutOfRange { planned })?;

        let aggregator = CheckAggregator::new();
        // Child token: ending the run must not cancel the caller's token.
        let run_cancel = self.cancel.child_token();
        let mut pool = WorkerPool::new(
            scenario.workflow.clone(),
            aggregator.recorder(),
            run_cancel.clone(),
            self.pause,
        )
        .with_max_vus(self.max_vus)
        .with_hook(self.on_transition.clone());

        tracing::info!(
            "Running scenario: {} ({stage_count} stages, {:.1}s, peak {} VUs)",
            scenario.name,
            planned.as_secs_f64(),
            self.profile.peak_target(),
        );

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut current_stage = None;
        let mut failing_ticks = 0u32;
        let mut degraded = false;

        let cancelled = loop {
            tokio::select! {
                biased;
                _ = run_cancel.cancelled() => break true,
                _ = sleep_until(deadline) => break false,
                _ = ticker.tick() => {}
            }

            let point = self.profile.point_at(start.elapsed());
            if current_stage != Some(point.stage) {
                tracing::info!("Starting stage: {}/{stage_count}", point.stage + 1);
                current_stage = Some(point.stage);
            }

            match pool.reconcile(point.target as usize) {
                Ok(()) => failing_ticks = 0,
                Err(_) => {
                    failing_ticks += 1;
                    if failing_ticks >= self.spawn_retry_limit && !degraded {
                        degraded = true;
                        tracing::warn!(
                            "Could not reach target concurrency for {failing_ticks} ticks, \
                             continuing with {} workers",
                            pool.live()
                        );
                    }
                }
            }
        };

        if cancelled {
            tracing::info!("Run cancelled, signaling shutdown...");
        } else {
            tracing::info!("Profile finished, signaling shutdown...");
        }
        run_cancel.cancel();
        let stragglers = pool.drain(drain_timeout).await;

        let status = if stragglers > 0 {
            tracing::warn!("{stragglers} workers failed to drain within {drain_timeout:?}");
            RunStatus::FailedToDrain { stragglers }
        } else if degraded {
            RunStatus::Degraded {
                spawn_failures: pool.stats().spawn_failures,
            }
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(aggregator.finalize(start.elapsed(), status, pool.peak()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VuContext, WorkflowError, executor::Stage};

    #[test]
    fn from_config_carries_every_setting() {
        let config = RunConfig::from_json_str(
            r#"{
                "stages": [ { "duration": "2s", "target": 3 } ],
                "tick": "100ms",
                "pause": "1s",
                "maxDuration": "1s",
                "drainTimeout": "3s",
                "maxVus": 8,
                "spawnRetryLimit": 2
            }"#,
        )
        .unwrap();
        let executor = RampingExecutor::from_config(&config).unwrap();

        assert_eq!(executor.profile.stages(), [Stage::new(Duration::from_secs(2), 3)]);
        assert_eq!(executor.tick, Duration::from_millis(100));
        assert_eq!(executor.pause, Duration::from_secs(1));
        assert_eq!(executor.planned_duration(), Duration::from_secs(1));
        assert_eq!(executor.drain_timeout, Some(Duration::from_secs(3)));
        assert_eq!(executor.max_vus, Some(8));
        assert_eq!(executor.spawn_retry_limit, 2);
    }

    #[tokio::test]
    async fn zero_tick_is_a_config_error() {
        let executor = RampingExecutor::builder()
            .profile(Profile::new(vec![Stage::new(Duration::from_secs(1), 1)]).unwrap())
            .tick(Duration::ZERO)
            .build();
        let scenario = Scenario::new("noop", |_ctx: VuContext| async {
            Ok::<(), WorkflowError>(())
        });

        let err = scenario.run(&executor).await.unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::ZeroTick)));
    }

    #[tokio::test]
    async fn unreachable_deadline_is_a_config_error() {
        let executor = RampingExecutor::builder()
            .profile(Profile::new(vec![Stage::new(Duration::MAX, 1)]).unwrap())
            .build();
        let scenario = Scenario::new("forever", |_ctx: VuContext| async {
            Ok::<(), WorkflowError>(())
        });

        let err = scenario.run(&executor).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Config(ConfigError::DeadlineOutOfRange { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_cuts_the_profile_short() {
        let executor = RampingExecutor::builder()
            .profile(
                Profile::new(vec![
                    Stage::new(Duration::ZERO, 2),
                    Stage::new(Duration::from_secs(60), 2),
                ])
                .unwrap(),
            )
            .tick(Duration::from_millis(100))
            .pause(Duration::from_millis(100))
            .max_duration(Duration::from_secs(2))
            .build();
        let scenario = Scenario::new("short", |_ctx: VuContext| async {
            Ok::<(), WorkflowError>(())
        });

        let report = scenario.run(&executor).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.peak_workers, 2);
        assert!(report.total_iterations > 0);
        assert!(report.elapsed < Duration::from_secs(3));
    }
}
