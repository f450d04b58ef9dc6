use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Thresholds and polling of the throttler.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThrottleConfig {
    /// Replication lag, in milliseconds, above which work pauses.
    #[serde(default = "default_max_lag_ms")]
    pub max_lag_ms: u64,
    /// `Threads_running` above which work pauses.
    #[serde(default)]
    pub max_threads_running: Option<u64>,
    /// `Threads_running` above which the migration is aborted.
    #[serde(default)]
    pub critical_threads_running: Option<u64>,
    /// How often signals are refreshed, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Suggested pause, in milliseconds, while throttled.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Keep working when the signals cannot be read.
    ///
    /// Disabled by default: without signals the load is unknown, so work pauses.
    #[serde(default)]
    pub proceed_on_missing_signal: bool,
}

impl ThrottleConfig {
    pub fn max_lag(&self) -> Duration {
        Duration::from_millis(self.max_lag_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::invalid(
                "throttle.poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if let (Some(max), Some(critical)) =
            (self.max_threads_running, self.critical_threads_running)
            && critical <= max
        {
            return Err(ValidationError::invalid(
                "throttle.critical_threads_running",
                "must be greater than `throttle.max_threads_running`",
            ));
        }

        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_lag_ms: default_max_lag_ms(),
            max_threads_running: None,
            critical_threads_running: None,
            poll_interval_ms: default_poll_interval_ms(),
            backoff_ms: default_backoff_ms(),
            proceed_on_missing_signal: false,
        }
    }
}

fn default_max_lag_ms() -> u64 {
    1500
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_backoff_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_threshold_must_exceed_max() {
        let config = ThrottleConfig {
            max_threads_running: Some(50),
            critical_threads_running: Some(50),
            ..ThrottleConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ThrottleConfig {
            max_threads_running: Some(50),
            critical_threads_running: Some(200),
            ..ThrottleConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn fails_closed_by_default() {
        let config: ThrottleConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.proceed_on_missing_signal);
        assert_eq!(config.max_lag(), Duration::from_millis(1500));
    }
}
