use osc_config::shared::StateStoreConfig;
use sqlx::mysql::MySqlPool;
use tracing::info;

use crate::context::CopyProgress;
use crate::error::MigrationResult;
use crate::store::state::{MemoryStateStore, MySqlStateStore, StateStore, StoredProgress};
use crate::types::{BinlogPosition, MigrationId, TableName};

/// The [`StateStore`] selected by [`StateStoreConfig`].
#[derive(Debug, Clone)]
pub enum ConfiguredStateStore {
    Memory(MemoryStateStore),
    MySql(MySqlStateStore),
}

impl ConfiguredStateStore {
    /// Builds the configured store for migrations of `original`, creating the changelog table
    /// when progress is kept in MySQL.
    pub async fn build(
        config: &StateStoreConfig,
        pool: MySqlPool,
        original: &TableName,
    ) -> MigrationResult<Self> {
        match config {
            StateStoreConfig::Memory => {
                info!("keeping migration progress in memory");
                Ok(Self::Memory(MemoryStateStore::new()))
            }
            StateStoreConfig::Mysql => {
                let store = MySqlStateStore::new(pool, original)?;
                store.create_table().await?;
                info!(table = %original, "keeping migration progress in a changelog table");

                Ok(Self::MySql(store))
            }
        }
    }
}

impl StateStore for ConfiguredStateStore {
    async fn load_progress(&self, id: MigrationId) -> MigrationResult<Option<StoredProgress>> {
        match self {
            Self::Memory(store) => store.load_progress(id).await,
            Self::MySql(store) => store.load_progress(id).await,
        }
    }

    async fn store_copy_progress(
        &self,
        id: MigrationId,
        progress: &CopyProgress,
        complete: bool,
    ) -> MigrationResult<()> {
        match self {
            Self::Memory(store) => store.store_copy_progress(id, progress, complete).await,
            Self::MySql(store) => store.store_copy_progress(id, progress, complete).await,
        }
    }

    async fn store_replay_position(
        &self,
        id: MigrationId,
        position: BinlogPosition,
    ) -> MigrationResult<()> {
        match self {
            Self::Memory(store) => store.store_replay_position(id, position).await,
            Self::MySql(store) => store.store_replay_position(id, position).await,
        }
    }

    async fn clear_progress(&self, id: MigrationId) -> MigrationResult<()> {
        match self {
            Self::Memory(store) => store.clear_progress(id).await,
            Self::MySql(store) => store.clear_progress(id).await,
        }
    }
}
