use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Sizing of the backfill chunks.
///
/// The copier starts with `initial_size` rows per chunk and adapts the size between
/// `min_size` and `max_size` so that each chunk takes roughly `target_duration_ms`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChunkConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_target_duration_ms")]
    pub target_duration_ms: u64,
}

impl ChunkConfig {
    pub fn target_duration(&self) -> Duration {
        Duration::from_millis(self.target_duration_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_size == 0 {
            return Err(ValidationError::invalid(
                "chunk.min_size",
                "must be greater than 0",
            ));
        }

        if self.min_size > self.max_size {
            return Err(ValidationError::invalid(
                "chunk.max_size",
                "must be greater than or equal to `chunk.min_size`",
            ));
        }

        if !(self.min_size..=self.max_size).contains(&self.initial_size) {
            return Err(ValidationError::invalid(
                "chunk.initial_size",
                "must be between `chunk.min_size` and `chunk.max_size`",
            ));
        }

        if self.target_duration_ms == 0 {
            return Err(ValidationError::invalid(
                "chunk.target_duration_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            target_duration_ms: default_target_duration_ms(),
        }
    }
}

fn default_initial_size() -> usize {
    1000
}

fn default_min_size() -> usize {
    10
}

fn default_max_size() -> usize {
    100_000
}

fn default_target_duration_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_config_is_valid() {
        assert_eq!(ChunkConfig::default().validate(), Ok(()));
    }

    #[test]
    fn initial_size_must_be_within_bounds() {
        let config = ChunkConfig {
            initial_size: 5,
            ..ChunkConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "chunk.initial_size"
        ));
    }
}
