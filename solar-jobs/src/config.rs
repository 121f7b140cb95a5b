//! # Engine configuration
//!
//! Operator knobs live in a plain string key/value store, [`JobSettings`],
//! so applications can layer values from whatever source they like. The
//! typed [`EngineConfig`] is read out of it with [`EngineConfig::from_settings`]
//! or assembled directly with the `with_*` builders.
//!
//! ```rust
//! use solar_jobs::config::{EngineConfig, JobSettings};
//!
//! let mut settings = JobSettings::new();
//! settings.set("jobs.pool_size", "4");
//! settings.set("jobs.stale_task_age_secs", "7200");
//!
//! let config = EngineConfig::from_settings(&settings).unwrap();
//! assert_eq!(config.pool_size, 4);
//! ```
//!
//! Environment variables map onto keys by stripping a prefix, lowercasing and
//! turning `__` into `.`:
//!
//! ```bash
//! export SOLAR_JOBS__POOL_SIZE=25   # jobs.pool_size
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::{JobsError, JobsResult};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Default environment prefix for [`JobSettings::from_env`]
pub const ENV_PREFIX: &str = "SOLAR_";

#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    values: HashMap<String, String>,
}

impl JobSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every environment variable starting with `prefix`
    ///
    /// `SOLAR_JOBS__POOL_SIZE` with prefix `SOLAR_` becomes `jobs.pool_size`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Load from an explicit set of variables, as [`JobSettings::from_env`] does
    pub fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut settings = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                settings.set(stripped.to_lowercase().replace("__", "."), value);
            }
        }
        settings
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Parse a value, treating a malformed value as a configuration error
    pub fn parse<T>(&self, key: &str) -> JobsResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| JobsError::Config(format!("{key} = '{raw}': {e}")))
            })
            .transpose()
    }

    pub fn get_secs(&self, key: &str) -> JobsResult<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }

    pub fn get_millis(&self, key: &str) -> JobsResult<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}

pub(crate) fn to_chrono(duration: Duration) -> JobsResult<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|e| JobsError::Config(format!("{:?} out of range: {}", duration, e)))
}

/// Tunables for a [`JobEngine`](crate::JobEngine) and its maintenance loops
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum jobs executing at once in this process
    pub pool_size: usize,
    /// Idle sleep between claim attempts of the worker loop
    pub poll_interval: Duration,
    /// Default window size for date-range jobs; `None` runs the range as one batch
    pub batch_duration: Option<Duration>,
    /// Windows below this size are not split
    pub min_batch_duration: Duration,
    /// Maximum ids accepted by an id-set job
    pub id_batch_ceiling: usize,
    /// Executing jobs idle for longer than this are reset to queued; `None` disables the reaper
    pub stale_task_age: Option<Duration>,
    pub reaper_interval: Duration,
    /// Minimum time a completed task stays in the registry
    pub task_retention: Duration,
    pub purger_interval: Duration,
    /// Completed job records older than this are deleted; `None` keeps them
    pub completed_job_retention: Option<Duration>,
    pub job_purge_interval: Duration,
    /// Status event channel capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            poll_interval: Duration::from_millis(1000),
            batch_duration: Some(Duration::from_secs(7 * DAY)),
            min_batch_duration: Duration::from_secs(HOUR),
            id_batch_ceiling: 100,
            stale_task_age: None,
            reaper_interval: Duration::from_secs(HOUR),
            task_retention: Duration::from_secs(4 * HOUR),
            purger_interval: Duration::from_secs(30 * 60),
            completed_job_retention: None,
            job_purge_interval: Duration::from_secs(HOUR),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from settings, falling back to defaults for absent keys
    pub fn from_settings(settings: &JobSettings) -> JobsResult<Self> {
        let defaults = Self::default();

        let batch_duration = match settings.parse::<u64>("jobs.batch_duration_secs")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.batch_duration,
        };

        let config = Self {
            pool_size: settings.parse("jobs.pool_size")?.unwrap_or(defaults.pool_size),
            poll_interval: settings
                .get_millis("jobs.poll_interval_ms")?
                .unwrap_or(defaults.poll_interval),
            batch_duration,
            min_batch_duration: settings
                .get_secs("jobs.min_batch_duration_secs")?
                .unwrap_or(defaults.min_batch_duration),
            id_batch_ceiling: settings
                .parse("jobs.id_batch_ceiling")?
                .unwrap_or(defaults.id_batch_ceiling),
            stale_task_age: settings.get_secs("jobs.stale_task_age_secs")?,
            reaper_interval: settings
                .get_secs("jobs.reaper_interval_secs")?
                .unwrap_or(defaults.reaper_interval),
            task_retention: settings
                .get_secs("jobs.task_retention_secs")?
                .unwrap_or(defaults.task_retention),
            purger_interval: settings
                .get_secs("jobs.purger_interval_secs")?
                .unwrap_or(defaults.purger_interval),
            completed_job_retention: settings.get_secs("jobs.completed_job_retention_secs")?,
            job_purge_interval: settings
                .get_secs("jobs.job_purge_interval_secs")?
                .unwrap_or(defaults.job_purge_interval),
            event_capacity: settings
                .parse("jobs.event_capacity")?
                .unwrap_or(defaults.event_capacity),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from `SOLAR_*` environment variables
    pub fn from_env() -> JobsResult<Self> {
        Self::from_settings(&JobSettings::from_env(ENV_PREFIX))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> JobsResult<()> {
        if self.pool_size == 0 {
            return Err(JobsError::Config("jobs.pool_size must be at least 1".to_string()));
        }
        if self.id_batch_ceiling == 0 {
            return Err(JobsError::Config("jobs.id_batch_ceiling must be at least 1".to_string()));
        }
        for (key, interval) in [
            ("jobs.poll_interval_ms", self.poll_interval),
            ("jobs.reaper_interval_secs", self.reaper_interval),
            ("jobs.purger_interval_secs", self.purger_interval),
            ("jobs.job_purge_interval_secs", self.job_purge_interval),
        ] {
            if interval.is_zero() {
                return Err(JobsError::Config(format!("{key} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_duration(mut self, duration: Option<Duration>) -> Self {
        self.batch_duration = duration;
        self
    }

    pub fn with_min_batch_duration(mut self, duration: Duration) -> Self {
        self.min_batch_duration = duration;
        self
    }

    pub fn with_id_batch_ceiling(mut self, ceiling: usize) -> Self {
        self.id_batch_ceiling = ceiling;
        self
    }

    pub fn with_stale_task_age(mut self, age: Duration) -> Self {
        self.stale_task_age = Some(age);
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_task_retention(mut self, retention: Duration) -> Self {
        self.task_retention = retention;
        self
    }

    pub fn with_purger_interval(mut self, interval: Duration) -> Self {
        self.purger_interval = interval;
        self
    }

    pub fn with_completed_job_retention(mut self, retention: Duration) -> Self {
        self.completed_job_retention = Some(retention);
        self
    }

    pub fn with_job_purge_interval(mut self, interval: Duration) -> Self {
        self.job_purge_interval = interval;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.batch_duration, Some(Duration::from_secs(7 * DAY)));
        assert_eq!(config.min_batch_duration, Duration::from_secs(HOUR));
        assert_eq!(config.id_batch_ceiling, 100);
        assert_eq!(config.task_retention, Duration::from_secs(4 * HOUR));
        assert!(config.stale_task_age.is_none());
        assert!(config.completed_job_retention.is_none());
    }

    #[test]
    fn test_env_vars_map_to_keys() {
        let vars = vec![
            ("SOLAR_JOBS__POOL_SIZE".to_string(), "3".to_string()),
            ("SOLAR_JOBS__STALE_TASK_AGE_SECS".to_string(), "600".to_string()),
            ("SOLAR_JOBS__BATCH_DURATION_SECS".to_string(), "0".to_string()),
            ("OTHER_JOBS__POOL_SIZE".to_string(), "99".to_string()),
        ];
        let settings = JobSettings::from_vars(ENV_PREFIX, vars);
        assert_eq!(settings.get("jobs.pool_size"), Some("3"));

        let config = EngineConfig::from_settings(&settings).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.stale_task_age, Some(Duration::from_secs(600)));
        assert_eq!(config.batch_duration, None);
    }

    #[test]
    fn test_malformed_value_is_config_error() {
        let mut settings = JobSettings::new();
        settings.set("jobs.reaper_interval_secs", "hourly");

        let err = EngineConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, JobsError::Config(msg) if msg.contains("jobs.reaper_interval_secs")));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut settings = JobSettings::new();
        settings.set("jobs.pool_size", "0");
        assert!(EngineConfig::from_settings(&settings).is_err());
    }
}
