//! Run configuration loaded from JSON.
//!
//! ```json
//! {
//!   "stages": [
//!     { "duration": "15s", "target": 10 },
//!     { "duration": 10, "target": 10 },
//!     { "duration": "15s", "target": 0 }
//!   ],
//!   "pause": "1s"
//! }
//! ```
//!
//! Durations are either numbers, read as seconds, or human-readable strings
//! such as `"15s"`, `"1m 30s"` or `"250ms"`. A string holding a bare number
//! (`"10"`) is read as seconds too, but logged as ambiguous since it usually
//! means a unit was forgotten.
//!
//! Every value is checked when the config is loaded, so a bad profile fails
//! before any worker starts.
use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    error::ConfigError,
    executor::{Profile, Stage},
};

/// A duration as written in a config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Seconds(f64),
    Text(String),
}

impl DurationSpec {
    pub fn resolve(&self) -> Result<Duration, String> {
        match self {
            DurationSpec::Seconds(secs) => {
                if !secs.is_finite() || *secs < 0.0 {
                    return Err(format!("{secs} is not a non-negative number of seconds"));
                }
                Duration::try_from_secs_f64(*secs).map_err(|e| format!("{secs}s: {e}"))
            }
            DurationSpec::Text(text) => {
                let text = text.trim();
                if let Ok(secs) = text.parse::<f64>() {
                    tracing::warn!("Duration \"{text}\" has no unit, reading it as {text}s");
                    return DurationSpec::Seconds(secs).resolve();
                }
                humantime::parse_duration(text).map_err(|e| format!("\"{text}\": {e}"))
            }
        }
    }
}

impl From<Duration> for DurationSpec {
    fn from(value: Duration) -> Self {
        DurationSpec::Text(humantime::format_duration(value).to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub duration: DurationSpec,
    pub target: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
    pub stages: Vec<StageConfig>,
    /// Reconciliation interval of the worker pool.
    #[serde(default = "default_tick")]
    pub tick: DurationSpec,
    /// Sleep between two iterations of the same worker.
    #[serde(default = "default_pause")]
    pub pause: DurationSpec,
    #[serde(default)]
    pub max_duration: Option<DurationSpec>,
    #[serde(default)]
    pub drain_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub max_vus: Option<usize>,
    #[serde(default = "default_spawn_retry_limit")]
    pub spawn_retry_limit: u32,
}

fn default_tick() -> DurationSpec {
    DurationSpec::Seconds(1.0)
}

fn default_pause() -> DurationSpec {
    DurationSpec::Seconds(0.0)
}

fn default_spawn_retry_limit() -> u32 {
    5
}

impl RunConfig {
    /// A config with default settings around the given stages.
    pub fn with_stages(stages: Vec<StageConfig>) -> Self {
        Self {
            stages,
            tick: default_tick(),
            pause: default_pause(),
            max_duration: None,
            drain_timeout: None,
            max_vus: None,
            spawn_retry_limit: default_spawn_retry_limit(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded run config from {}", path.display());
        Self::from_json_str(&json)
    }

    /// Check every value without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let profile = self.profile()?;
        if self.tick()?.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        self.pause()?;
        let planned = self.max_duration()?.unwrap_or(profile.total_duration());
        if Instant::now().checked_add(planned).is_none() {
            return Err(ConfigError::DeadlineOutOfRange { planned });
        }
        self.drain_timeout()?;
        Ok(())
    }

    pub fn profile(&self) -> Result<Profile, ConfigError> {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                let target = u32::try_from(stage.target).map_err(|_| ConfigError::InvalidTarget {
                    index,
                    value: stage.target.to_string(),
                })?;
                let duration = stage
                    .duration
                    .resolve()
                    .map_err(|reason| ConfigError::InvalidDuration { index, reason })?;
                Ok(Stage::new(duration, target))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Profile::new(stages)
    }

    pub fn tick(&self) -> Result<Duration, ConfigError> {
        setting("tick", &self.tick)
    }

    pub fn pause(&self) -> Result<Duration, ConfigError> {
        setting("pause", &self.pause)
    }

    pub fn max_duration(&self) -> Result<Option<Duration>, ConfigError> {
        self.max_duration
            .as_ref()
            .map(|d| setting("maxDuration", d))
            .transpose()
    }

    pub fn drain_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.drain_timeout
            .as_ref()
            .map(|d| setting("drainTimeout", d))
            .transpose()
    }
}

fn setting(field: &'static str, spec: &DurationSpec) -> Result<Duration, ConfigError> {
    spec.resolve()
        .map_err(|reason| ConfigError::InvalidSetting { field, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_duration_forms() {
        let config = RunConfig::from_json_str(
            r#"{
                "stages": [
                    { "duration": "15s", "target": 10 },
                    { "duration": 10, "target": 10 },
                    { "duration": 2.5, "target": 4 },
                    { "duration": "1m 30s", "target": 0 }
                ],
                "pause": "250ms"
            }"#,
        )
        .unwrap();

        let profile = config.profile().unwrap();
        let durations: Vec<_> = profile.stages().iter().map(|s| s.duration).collect();
        assert_eq!(
            durations,
            [
                Duration::from_secs(15),
                Duration::from_secs(10),
                Duration::from_millis(2500),
                Duration::from_secs(90),
            ]
        );
        assert_eq!(config.pause().unwrap(), Duration::from_millis(250));
        assert_eq!(config.tick().unwrap(), Duration::from_secs(1));
        assert_eq!(config.spawn_retry_limit, 5);
        assert_eq!(config.max_vus, None);
    }

    #[test]
    fn unitless_string_is_read_as_seconds() {
        let config = RunConfig::from_json_str(
            r#"{ "stages": [ { "duration": "15s", "target": 10 }, { "duration": "10", "target": 10 } ] }"#,
        )
        .unwrap();
        assert_eq!(config.profile().unwrap().total_duration(), Duration::from_secs(25));
    }

    #[test]
    fn bad_duration_names_the_stage() {
        let err = RunConfig::from_json_str(
            r#"{ "stages": [ { "duration": "5s", "target": 1 }, { "duration": "soon", "target": 2 } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { index: 1, .. }), "{err}");
    }

    #[test]
    fn negative_values_are_rejected() {
        let err = RunConfig::from_json_str(r#"{ "stages": [ { "duration": -1, "target": 1 } ] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { index: 0, .. }));

        let err = RunConfig::from_json_str(r#"{ "stages": [ { "duration": 1, "target": -3 } ] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { index: 0, .. }));
    }

    #[test]
    fn empty_or_idle_profiles_are_rejected() {
        let err = RunConfig::from_json_str(r#"{ "stages": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProfile));

        let err = RunConfig::from_json_str(r#"{ "stages": [ { "duration": "5s", "target": 0 } ] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoWorkers));
    }

    #[test]
    fn zero_tick_is_rejected() {
        let err = RunConfig::from_json_str(
            r#"{ "stages": [ { "duration": "5s", "target": 1 } ], "tick": 0 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTick));
    }

    #[test]
    fn malformed_json_and_unknown_fields() {
        assert!(matches!(
            RunConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RunConfig::from_json_str(r#"{ "stages": [], "vus": 3 }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn bad_optional_setting_is_named() {
        let err = RunConfig::from_json_str(
            r#"{ "stages": [ { "duration": "5s", "target": 1 } ], "maxDuration": "forever" }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                field: "maxDuration",
                ..
            }
        ));
    }

    #[test]
    fn oversized_durations_are_config_errors() {
        let err = RunConfig::from_json_str(
            r#"{ "stages": [ { "duration": 1e19, "target": 1 }, { "duration": 1e19, "target": 1 } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ProfileTooLong), "{err}");

        let err = RunConfig::from_json_str(r#"{ "stages": [ { "duration": 1e19, "target": 1 } ] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DeadlineOutOfRange { .. }), "{err}");
    }

    #[test]
    fn missing_file() {
        let err = RunConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn durations_round_trip_through_humantime() {
        let spec = DurationSpec::from(Duration::from_millis(1500));
        assert_eq!(spec.resolve().unwrap(), Duration::from_millis(1500));
    }
}
