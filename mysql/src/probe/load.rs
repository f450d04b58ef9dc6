use std::num::NonZeroI32;

use sqlx::{MySqlPool, Row};

use crate::probe::ProbeError;
use crate::version::extract_server_version;

/// Reads a global status counter such as `Threads_running`.
pub async fn get_global_status(pool: &MySqlPool, name: &str) -> Result<u64, ProbeError> {
    // SHOW statements cannot take placeholders in every server version.
    let query = format!("SHOW GLOBAL STATUS LIKE '{}'", name.replace('\'', "''"));
    let row = sqlx::query(&query).fetch_optional(pool).await?;

    let Some(row) = row else {
        return Err(ProbeError::MissingStatus(name.to_string()));
    };

    let value: String = row.try_get(1)?;
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ProbeError::InvalidValue {
            name: name.to_string(),
            value,
        })
}

/// Returns the number of threads currently running on the server.
pub async fn get_threads_running(pool: &MySqlPool) -> Result<u64, ProbeError> {
    get_global_status(pool, "Threads_running").await
}

/// Returns the numeric server version, see [`extract_server_version`].
pub async fn get_server_version(pool: &MySqlPool) -> Result<Option<NonZeroI32>, ProbeError> {
    let version: String = sqlx::query_scalar("SELECT VERSION()")
        .fetch_one(pool)
        .await?;

    Ok(extract_server_version(version))
}
