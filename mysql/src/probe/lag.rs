use std::time::Duration;

use sqlx::{MySqlPool, Row};

use crate::probe::{ProbeError, get_integer};
use crate::types::BinlogPosition;

/// Gets the current binlog position from the MySQL server.
///
/// Falls back to `SHOW BINARY LOG STATUS` on servers where `SHOW MASTER STATUS` was removed.
pub async fn get_current_binlog_position(pool: &MySqlPool) -> Result<BinlogPosition, ProbeError> {
    let row = match sqlx::query("SHOW MASTER STATUS").fetch_optional(pool).await {
        Ok(row) => row,
        Err(sqlx::Error::Database(_)) => {
            sqlx::query("SHOW BINARY LOG STATUS")
                .fetch_optional(pool)
                .await?
        }
        Err(err) => return Err(err.into()),
    };

    let Some(row) = row else {
        return Err(ProbeError::BinlogDisabled);
    };

    let file_name: String = row.try_get("File")?;
    let position = get_integer(&row, "Position")?.unwrap_or(0);

    Ok(BinlogPosition::from_file(&file_name, position as u64)?)
}

/// Returns the replication lag reported by the server.
///
/// Returns `None` when the server is not a replica.
pub async fn get_replica_lag(pool: &MySqlPool) -> Result<Option<Duration>, ProbeError> {
    let (row, column) = match sqlx::query("SHOW REPLICA STATUS").fetch_optional(pool).await {
        Ok(row) => (row, "Seconds_Behind_Source"),
        Err(sqlx::Error::Database(_)) => (
            sqlx::query("SHOW SLAVE STATUS").fetch_optional(pool).await?,
            "Seconds_Behind_Master",
        ),
        Err(err) => return Err(err.into()),
    };

    let Some(row) = row else {
        return Ok(None);
    };

    match get_integer(&row, column)? {
        Some(seconds) => Ok(Some(Duration::from_secs(seconds.max(0) as u64))),
        None => Err(ProbeError::ReplicationStopped),
    }
}
