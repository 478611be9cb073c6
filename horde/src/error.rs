use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// A malformed run configuration. Always raised before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("profile must contain at least one stage")]
    EmptyProfile,

    #[error("stage {index}: target must be a non-negative integer, got {value}")]
    InvalidTarget { index: usize, value: String },

    #[error("stage {index}: invalid duration: {reason}")]
    InvalidDuration { index: usize, reason: String },

    #[error("profile never asks for a worker (all targets are zero)")]
    NoWorkers,

    #[error("invalid `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("tick interval must be greater than zero")]
    ZeroTick,

    #[error("profile is too long: stage durations overflow when added up")]
    ProfileTooLong,

    #[error("run length {planned:?} puts the deadline out of the clock's range")]
    DeadlineOutOfRange { planned: Duration },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure to bring up a new worker. Retried by the pool on the next tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("worker limit reached ({limit} virtual users)")]
    Exhausted { limit: usize },

    #[error("no tokio runtime available to spawn workers")]
    NoRuntime,
}

/// An error raised by a workflow iteration.
///
/// These never leave the worker: the iteration is recorded as failed and the
/// worker carries on with the next one.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step `{step}` failed: {source}")]
    Step {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// The run was cancelled before the next step could start.
    #[error("iteration cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Wrap any error as a failure of the named step.
    pub fn step(step: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Step {
            step: step.into(),
            source: source.into(),
        }
    }

    /// The step this error was raised in, when known.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Errors that abort a run before it starts.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}
