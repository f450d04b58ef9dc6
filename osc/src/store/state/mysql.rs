use osc_mysql::types::MAX_IDENTIFIER_LENGTH;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::mysql::MySqlPool;

use crate::bail;
use crate::context::CopyProgress;
use crate::error::{ErrorKind, MigrationResult};
use crate::store::state::{StateStore, StoredProgress};
use crate::types::{BinlogPosition, MigrationId, TableName};

const COPY_HINT: &str = "copy";
const REPLAY_HINT: &str = "replay";

/// Name of the changelog table kept next to `original`.
pub fn changelog_table_name(original: &TableName) -> TableName {
    original.sibling(format!("_{}_osc", original.name))
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCopy {
    progress: CopyProgress,
    complete: bool,
}

/// [`StateStore`] writing progress to a changelog table next to the migrated table.
#[derive(Debug, Clone)]
pub struct MySqlStateStore {
    pool: MySqlPool,
    table: TableName,
}

impl MySqlStateStore {
    /// Creates a store for migrations of `original`.
    ///
    /// Fails when the changelog table name exceeds the identifier limit.
    pub fn new(pool: MySqlPool, original: &TableName) -> MigrationResult<Self> {
        let table = changelog_table_name(original);
        if table.name.len() > MAX_IDENTIFIER_LENGTH {
            bail!(
                ErrorKind::TableNameTooLong,
                "Changelog table name exceeds the identifier limit",
                table.name
            );
        }

        Ok(Self { pool, table })
    }

    /// Creates the changelog table when missing.
    pub async fn create_table(&self) -> MigrationResult<()> {
        let query = format!(
            "create table if not exists {} (\
             migration_id bigint unsigned not null, \
             hint varchar(64) not null, \
             value text not null, \
             updated_at timestamp not null default current_timestamp on update current_timestamp, \
             primary key (migration_id, hint))",
            self.table.as_quoted_identifier()
        );
        sqlx::query(&query).execute(&self.pool).await?;

        Ok(())
    }

    async fn upsert(&self, id: MigrationId, hint: &str, value: String) -> MigrationResult<()> {
        let query = format!(
            "insert into {} (migration_id, hint, value) values (?, ?, ?) \
             on duplicate key update value = values(value)",
            self.table.as_quoted_identifier()
        );
        sqlx::query(&query)
            .bind(id)
            .bind(hint)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl StateStore for MySqlStateStore {
    async fn load_progress(&self, id: MigrationId) -> MigrationResult<Option<StoredProgress>> {
        let query = format!(
            "select hint, value from {} where migration_id = ?",
            self.table.as_quoted_identifier()
        );
        let rows = sqlx::query(&query).bind(id).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut progress = StoredProgress::default();
        for row in rows {
            let hint: String = row.try_get("hint")?;
            let value: String = row.try_get("value")?;

            match hint.as_str() {
                COPY_HINT => {
                    let copy: StoredCopy = serde_json::from_str(&value)?;
                    progress.copy = copy.progress;
                    progress.backfill_complete = copy.complete;
                }
                REPLAY_HINT => {
                    progress.replay_position = Some(value.parse::<BinlogPosition>()?);
                }
                _ => {}
            }
        }

        Ok(Some(progress))
    }

    async fn store_copy_progress(
        &self,
        id: MigrationId,
        progress: &CopyProgress,
        complete: bool,
    ) -> MigrationResult<()> {
        let value = serde_json::to_string(&StoredCopy {
            progress: progress.clone(),
            complete,
        })?;

        self.upsert(id, COPY_HINT, value).await
    }

    async fn store_replay_position(
        &self,
        id: MigrationId,
        position: BinlogPosition,
    ) -> MigrationResult<()> {
        self.upsert(id, REPLAY_HINT, position.to_string()).await
    }

    async fn clear_progress(&self, id: MigrationId) -> MigrationResult<()> {
        let query = format!(
            "delete from {} where migration_id = ?",
            self.table.as_quoted_identifier()
        );
        sqlx::query(&query).bind(id).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_the_changelog_table() {
        assert_eq!(
            changelog_table_name(&TableName::new("shop", "orders")),
            TableName::new("shop", "_orders_osc")
        );
    }
}
