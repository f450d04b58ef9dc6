use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Timeouts and retries of the cut-over.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CutOverConfig {
    /// Upper bound, in milliseconds, for acquiring the table locks and for the final catch up
    /// while they are held.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Upper bound, in milliseconds, for replay to reach the backfill checkpoint.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Number of cut-over attempts before the migration gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Start with the cut-over postponed until released through the migration handle.
    #[serde(default)]
    pub postpone: bool,
}

impl CutOverConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lock_timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "cut_over.lock_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.max_attempts == 0 {
            return Err(ValidationError::invalid(
                "cut_over.max_attempts",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for CutOverConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_attempts: default_max_attempts(),
            postpone: false,
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    3000
}

fn default_drain_timeout_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}
