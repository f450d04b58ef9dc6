use std::collections::HashMap;

use osc_config::shared::{
    BatchConfig, ChunkConfig, CutOverConfig, MigrationConfig, RetryConfig, ThrottleConfig,
};

use crate::context::shadow_table_name;
use crate::types::{ColumnList, ColumnSchema, TableName, TableSchema, UniqueKey};

/// Schema of a `users`-like table: `id bigint not null`, `name varchar(255) null`,
/// `age int not null`.
pub fn test_schema(database: &str, table: &str) -> TableSchema {
    TableSchema::new(
        TableName::new(database, table),
        vec![
            ColumnSchema::new("id", "bigint", false),
            ColumnSchema::new("name", "varchar(255)", true),
            ColumnSchema::new("age", "int", false),
        ],
    )
}

/// The shadow table of [`test_schema`], with identical columns.
pub fn shadow_schema(database: &str, table: &str) -> TableSchema {
    let original = test_schema(database, table);

    TableSchema::new(shadow_table_name(&original.name), original.column_schemas)
}

/// Primary key on `id`.
pub fn test_unique_key() -> UniqueKey {
    UniqueKey::new("PRIMARY", ColumnList::new(["id"]))
}

/// Schema of a table with a composite key: `id bigint not null`, `item_id bigint not null`.
pub fn item_schema(database: &str, table: &str) -> TableSchema {
    TableSchema::new(
        TableName::new(database, table),
        vec![
            ColumnSchema::new("id", "bigint", false),
            ColumnSchema::new("item_id", "bigint", false),
        ],
    )
}

/// The shadow table of [`item_schema`].
pub fn shadow_item_schema(database: &str, table: &str) -> TableSchema {
    let original = item_schema(database, table);

    TableSchema::new(shadow_table_name(&original.name), original.column_schemas)
}

/// Primary key on `(id, item_id)`.
pub fn item_key() -> UniqueKey {
    UniqueKey::new("PRIMARY", ColumnList::new(["id", "item_id"]))
}

/// A configuration migrating `database.table` with test friendly timings.
pub fn migration_config(database: &str, table: &str) -> MigrationConfig {
    MigrationConfigBuilder::new(database, table).build()
}

/// Builder of [`MigrationConfig`]s for tests.
#[derive(Debug, Clone)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn new(database: &str, table: &str) -> Self {
        let config = MigrationConfig {
            id: 1,
            database: database.to_string(),
            table: table.to_string(),
            alter: "ENGINE=InnoDB".to_string(),
            column_renames: HashMap::new(),
            skip_strict_mode: false,
            allow_zero_in_date: false,
            attempt_instant_ddl: false,
            chunk: ChunkConfig::default(),
            throttle: ThrottleConfig {
                poll_interval_ms: 10,
                backoff_ms: 10,
                ..ThrottleConfig::default()
            },
            cut_over: CutOverConfig {
                lock_timeout_ms: 1000,
                drain_timeout_ms: 10_000,
                max_attempts: 3,
                postpone: false,
            },
            retry: RetryConfig {
                max_attempts: 3,
                initial_retry_delay_ms: 10,
                max_retry_delay_ms: 100,
                backoff_multiplier: 2.0,
            },
            batch: BatchConfig {
                max_size: 100,
                max_fill_ms: 10,
            },
        };

        Self { config }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.config.id = id;
        self
    }

    pub fn alter(mut self, alter: &str) -> Self {
        self.config.alter = alter.to_string();
        self
    }

    /// Starts with chunks of `size` rows and lets them grow up to ten times that.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk = ChunkConfig {
            initial_size: size,
            min_size: size.min(self.config.chunk.min_size).max(1),
            max_size: size.saturating_mul(10),
            ..self.config.chunk
        };
        self
    }

    pub fn attempt_instant_ddl(mut self) -> Self {
        self.config.attempt_instant_ddl = true;
        self
    }

    pub fn postpone_cut_over(mut self) -> Self {
        self.config.cut_over.postpone = true;
        self
    }

    pub fn lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.cut_over.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn drain_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.cut_over.drain_timeout_ms = timeout_ms;
        self
    }

    pub fn cut_over_attempts(mut self, attempts: u32) -> Self {
        self.config.cut_over.max_attempts = attempts;
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.config.throttle = throttle;
        self
    }

    pub fn build(self) -> MigrationConfig {
        self.config
    }
}
