use std::time::Duration;

use osc_config::shared::ChunkConfig;

use crate::types::Cell;

/// A copied range of the unique key, both ends inclusive.
///
/// Boundaries of consecutive chunks are contiguous and strictly increasing: the next chunk
/// starts right after `high`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBoundary {
    pub low: Vec<Cell>,
    pub high: Vec<Cell>,
    pub row_count: usize,
    pub ordinal: u64,
}

/// Computes the size of the next chunk from how long the last one took.
///
/// The size is halved when the last chunk exceeded the target duration, grown by half when it
/// took less than half the target and kept otherwise. The result always lies within the
/// configured bounds.
pub fn next_chunk_size(last_duration: Duration, last_size: usize, config: &ChunkConfig) -> usize {
    let target = config.target_duration();

    let next = if last_duration > target {
        last_size / 2
    } else if last_duration < target / 2 {
        last_size.saturating_add(last_size / 2)
    } else {
        last_size
    };

    next.clamp(config.min_size, config.max_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkConfig {
        ChunkConfig {
            initial_size: 1000,
            min_size: 100,
            max_size: 4000,
            target_duration_ms: 500,
        }
    }

    #[test]
    fn shrinks_slow_chunks() {
        assert_eq!(next_chunk_size(Duration::from_millis(800), 1000, &config()), 500);
        assert_eq!(next_chunk_size(Duration::from_secs(5), 150, &config()), 100);
    }

    #[test]
    fn grows_fast_chunks() {
        assert_eq!(next_chunk_size(Duration::from_millis(100), 1000, &config()), 1500);
        assert_eq!(next_chunk_size(Duration::from_millis(1), 3500, &config()), 4000);
    }

    #[test]
    fn holds_within_band() {
        assert_eq!(next_chunk_size(Duration::from_millis(250), 1000, &config()), 1000);
        assert_eq!(next_chunk_size(Duration::from_millis(500), 1000, &config()), 1000);
    }
}
