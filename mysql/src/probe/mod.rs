//! Read-only probes against a live MySQL server.
//!
//! Used to read the current binlog coordinates, server load and replication lag.

mod lag;
mod load;

pub use lag::*;
pub use load::*;

use sqlx::Row;
use sqlx::mysql::MySqlRow;
use thiserror::Error;

use crate::types::PositionError;

/// Errors that can occur while probing the server.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to parse binlog position: {0}")]
    Position(#[from] PositionError),

    #[error("Binary logging is disabled on the server")]
    BinlogDisabled,

    #[error("Status variable `{0}` is missing")]
    MissingStatus(String),

    #[error("Failed to parse value `{value}` of `{name}`")]
    InvalidValue { name: String, value: String },

    #[error("Replication is not running on the replica")]
    ReplicationStopped,
}

/// Reads an integer column whose wire type differs between server versions.
fn get_integer(row: &MySqlRow, column: &str) -> Result<Option<i64>, ProbeError> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(column) {
        return Ok(value);
    }

    if let Ok(value) = row.try_get::<Option<u64>, _>(column) {
        return Ok(value.map(|v| v as i64));
    }

    let value: Option<String> = row.try_get(column)?;
    value
        .map(|v| {
            v.trim().parse::<i64>().map_err(|_| ProbeError::InvalidValue {
                name: column.to_string(),
                value: v,
            })
        })
        .transpose()
}
