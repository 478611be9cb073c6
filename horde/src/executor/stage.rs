use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// A stage defines a target number of virtual users and how long to ramp to it.
///
/// Use `Stage::new(Duration::from_secs(10), 100)` to ramp to 100 workers over 10s.
/// If `duration` is `Duration::ZERO`, the target jumps to `target` instantly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub duration: Duration,
    /// Concurrent virtual users at the end of the stage
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Where a run is inside its profile at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagePoint {
    /// Index of the stage the instant falls in.
    pub stage: usize,
    /// Interpolated number of workers wanted at that instant.
    pub target: u32,
}

/// A validated, non-empty sequence of [`Stage`]s.
///
/// The run starts at zero workers and ends once `total_duration` has elapsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    stages: Vec<Stage>,
    total: Duration,
}

impl Profile {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyProfile);
        }
        if stages.iter().all(|s| s.target == 0) {
            return Err(ConfigError::NoWorkers);
        }
        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .ok_or(ConfigError::ProfileTooLong)?;
        Ok(Self { stages, total })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Planned run length: the sum of every stage duration.
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// The largest target any stage asks for.
    pub fn peak_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    pub fn target_at(&self, elapsed: Duration) -> u32 {
        self.point_at(elapsed).target
    }

    /// Resolve the stage and target concurrency at `elapsed` since run start.
    ///
    /// A stage spanning `(t0, t0 + d]` ramps linearly from the previous stage's
    /// target to its own, so the value at the exact end of a stage is that stage's
    /// target. Zero-length stages apply as soon as they are reached. Past the end
    /// of the profile the last reached target is held.
    ///
    /// When a zero-length stage follows a timed one, both end at the same
    /// instant and the earlier stage wins it: the step takes effect just after.
    pub fn point_at(&self, elapsed: Duration) -> StagePoint {
        let mut stage_start = Duration::ZERO;
        let mut current = 0;

        for (i, stage) in self.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                if elapsed >= stage_start {
                    current = stage.target;
                }
                continue;
            }

            let stage_end = stage_start + stage.duration;
            if elapsed <= stage_end {
                let in_stage = elapsed.saturating_sub(stage_start);
                return StagePoint {
                    stage: i,
                    target: calc_target(in_stage, stage.duration, current, stage.target),
                };
            }
            stage_start = stage_end;
            current = stage.target;
        }

        StagePoint {
            stage: self.stages.len() - 1,
            target: current,
        }
    }
}

/// Pure linear interpolation of the worker target inside a single stage.
///
/// The result is rounded to the nearest integer and never negative. `elapsed`
/// beyond `stage_duration` is capped at the stage's end.
pub fn calc_target(elapsed: Duration, stage_duration: Duration, start: u32, end: u32) -> u32 {
    if stage_duration.is_zero() {
        return end;
    }
    // Interpolation factor [0.0..1.0]
    let t = (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0);
    let start = f64::from(start);
    let value = start + (f64::from(end) - start) * t;
    value.round().clamp(0.0, f64::from(u32::MAX)) as u32
}
