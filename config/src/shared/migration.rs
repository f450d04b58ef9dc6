use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    BatchConfig, ChunkConfig, CutOverConfig, MySqlConnectionConfig, RetryConfig,
    StateStoreConfig, ThrottleConfig, ValidationError,
};

/// Options of a single table migration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigrationConfig {
    /// Identifier used in logs and in persisted progress.
    pub id: u64,
    /// Database holding the table.
    pub database: String,
    /// Table to alter.
    pub table: String,
    /// Alteration clauses, as they would follow `ALTER TABLE <table>`.
    pub alter: String,
    /// Columns renamed by the alteration, original name to new name.
    #[serde(default)]
    pub column_renames: HashMap<String, String>,
    /// Do not add `STRICT_ALL_TABLES` to the session mode of the writer.
    #[serde(default)]
    pub skip_strict_mode: bool,
    /// Remove `NO_ZERO_IN_DATE` and `NO_ZERO_DATE` from the session mode of the writer.
    #[serde(default)]
    pub allow_zero_in_date: bool,
    /// Try a metadata-only `ALGORITHM=INSTANT` alteration before copying the table.
    #[serde(default)]
    pub attempt_instant_ddl: bool,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub cut_over: CutOverConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl MigrationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.database.is_empty() {
            return Err(ValidationError::EmptyField("migration.database".to_string()));
        }

        if self.table.is_empty() {
            return Err(ValidationError::EmptyField("migration.table".to_string()));
        }

        if self.alter.trim().is_empty() {
            return Err(ValidationError::EmptyField("migration.alter".to_string()));
        }

        self.chunk.validate()?;
        self.throttle.validate()?;
        self.cut_over.validate()?;
        self.retry.validate()?;
        self.batch.validate()?;

        Ok(())
    }
}

/// Top level configuration of the migration service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OscConfig {
    pub connection: MySqlConnectionConfig,
    /// Replica whose replication lag is held under `throttle.max_lag_ms`. Without one, lag never
    /// throttles the migration.
    #[serde(default)]
    pub replica: Option<MySqlConnectionConfig>,
    pub migration: MigrationConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
}

impl OscConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()?;

        if let Some(replica) = &self.replica {
            if replica.host.is_empty() {
                return Err(ValidationError::EmptyField("replica.host".to_string()));
            }
            replica.tls.validate()?;
        }

        self.migration.validate()
    }
}

impl Config for OscConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_configuration_uses_defaults() {
        let config: OscConfig = serde_json::from_str(
            r#"{
                "connection": {"host": "localhost", "name": "test", "username": "osc", "password": null},
                "migration": {"id": 7, "database": "test", "table": "items", "alter": "ADD INDEX (foo)"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.validate(), Ok(()));
        assert!(config.replica.is_none());
        assert_eq!(config.state_store, StateStoreConfig::Memory);
        assert!(!config.migration.skip_strict_mode);
        assert!(!config.migration.allow_zero_in_date);
        assert_eq!(config.migration.cut_over.max_attempts, 5);
    }

    #[test]
    fn empty_alter_is_rejected() {
        let config: MigrationConfig = serde_json::from_str(
            r#"{"id": 1, "database": "test", "table": "items", "alter": "  "}"#,
        )
        .unwrap();

        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyField("migration.alter".to_string()))
        );
    }

    #[test]
    fn replica_connection_is_validated() {
        let mut config: OscConfig = serde_json::from_str(
            r#"{
                "connection": {"host": "primary", "name": "test", "username": "osc", "password": null},
                "replica": {"host": "replica", "port": 3307, "name": "test", "username": "osc", "password": null},
                "migration": {"id": 7, "database": "test", "table": "items", "alter": "ADD INDEX (foo)"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.validate(), Ok(()));
        let replica = config.replica.as_mut().unwrap();
        assert_eq!(replica.port, 3307);

        replica.host.clear();
        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyField("replica.host".to_string()))
        );
    }
}
