use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing binlog coordinates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("invalid binlog file name: {0}")]
    InvalidFileName(String),

    #[error("invalid binlog position: {0}")]
    InvalidPosition(String),
}

/// A MySQL binlog position.
///
/// Positions order first by file number and then by offset, which matches the order in which
/// the server writes events. The offset is the end of the last event written, as reported by
/// `SHOW MASTER STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BinlogPosition {
    /// The binlog file number.
    pub file_number: u32,
    /// The position within the binlog file.
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(file_number: u32, position: u64) -> Self {
        Self {
            file_number,
            position,
        }
    }

    /// Builds a position from a binlog file name such as `mysql-bin.000123` and an offset.
    pub fn from_file(file_name: &str, position: u64) -> Result<Self, PositionError> {
        let file_number = parse_binlog_file_number(file_name)?;

        Ok(Self::new(file_number, position))
    }

    /// Calculates the approximate lag between two binlog positions.
    ///
    /// This is an estimation since we can't know the exact size difference
    /// without accessing the actual binlog files.
    pub fn lag_bytes(&self, other: &BinlogPosition) -> i64 {
        if self.file_number == other.file_number {
            other.position as i64 - self.position as i64
        } else {
            let file_diff = (other.file_number as i64 - self.file_number as i64) * 1024 * 1024;
            file_diff + (other.position as i64 - self.position as i64)
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}:{}", self.file_number, self.position)
    }
}

impl FromStr for BinlogPosition {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (file, position) = s
            .rsplit_once(':')
            .ok_or_else(|| PositionError::InvalidPosition(s.to_string()))?;

        let file_number = file
            .parse::<u32>()
            .map_err(|_| PositionError::InvalidFileName(file.to_string()))?;
        let position = position
            .parse::<u64>()
            .map_err(|_| PositionError::InvalidPosition(s.to_string()))?;

        Ok(Self::new(file_number, position))
    }
}

/// Parses a MySQL binlog file name to extract the file number.
///
/// Binlog files are typically named like "mysql-bin.000123" or "binlog.000456".
pub fn parse_binlog_file_number(file_name: &str) -> Result<u32, PositionError> {
    let Some((_, suffix)) = file_name.rsplit_once('.') else {
        return Err(PositionError::InvalidFileName(file_name.to_string()));
    };

    suffix
        .parse::<u32>()
        .map_err(|_| PositionError::InvalidFileName(file_name.to_string()))
}
