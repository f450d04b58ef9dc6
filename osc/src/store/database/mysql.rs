use std::num::NonZeroI32;
use std::sync::Arc;
use std::time::Duration;

use osc_config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use osc_mysql::probe::{get_current_binlog_position, get_server_version};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, MySqlConnection};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::applier::Statement;
use crate::bail;
use crate::conversions::row::{bind_statement, decode_row};
use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::store::database::MigrationStore;
use crate::types::{BinlogPosition, TableRow};

/// Maximum number of pooled connections used by one migration.
const MAX_CONNECTIONS: u32 = 8;

/// Opens a connection pool to the database described by `config`.
pub async fn connect_pool(config: &MySqlConnectionConfig) -> MigrationResult<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(config.with_db())
        .await?;

    info!(host = %config.host, database = %config.name, "connected to mysql");

    Ok(pool)
}

/// [`MigrationStore`] backed by a MySQL server.
///
/// Write groups run in their own transaction. Cut-over locks are taken on a dedicated
/// connection; while it holds them, write groups run on that connection without a transaction,
/// since starting one would release the table locks.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
    lock_session: Arc<Mutex<Option<PoolConnection<MySql>>>>,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            lock_session: Arc::new(Mutex::new(None)),
        }
    }

    /// Connects to the database described by `config`.
    pub async fn connect(config: &MySqlConnectionConfig) -> MigrationResult<Self> {
        Ok(Self::new(connect_pool(config).await?))
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl MigrationStore for MySqlStore {
    async fn execute(&self, statements: &[Statement]) -> MigrationResult<u64> {
        let mut lock_session = self.lock_session.lock().await;
        let mut affected = 0;

        if let Some(connection) = lock_session.as_mut() {
            for statement in statements {
                affected += run_statement(connection, statement).await?;
            }

            return Ok(affected);
        }
        drop(lock_session);

        let mut transaction = self.pool.begin().await?;
        for statement in statements {
            affected += run_statement(&mut transaction, statement).await?;
        }
        transaction.commit().await?;

        Ok(affected)
    }

    async fn query_rows(&self, statement: &Statement) -> MigrationResult<Vec<TableRow>> {
        let rows = bind_statement(statement).fetch_all(&self.pool).await?;

        rows.iter().map(decode_row).collect()
    }

    async fn copy_chunk<F>(&self, select: &Statement, build: F) -> MigrationResult<Vec<TableRow>>
    where
        F: FnOnce(&[TableRow]) -> Vec<Statement> + Send,
    {
        let mut transaction = self.pool.begin().await?;

        let rows = bind_statement(select)
            .fetch_all(&mut *transaction)
            .await?
            .iter()
            .map(decode_row)
            .collect::<MigrationResult<Vec<_>>>()?;

        for statement in build(&rows) {
            run_statement(&mut transaction, &statement).await?;
        }
        transaction.commit().await?;

        Ok(rows)
    }

    async fn current_position(&self) -> MigrationResult<BinlogPosition> {
        Ok(get_current_binlog_position(&self.pool).await?)
    }

    async fn server_version(&self) -> MigrationResult<Option<NonZeroI32>> {
        Ok(get_server_version(&self.pool).await?)
    }

    async fn lock_tables(&self, lock: &Statement, timeout: Duration) -> MigrationResult<()> {
        let mut lock_session = self.lock_session.lock().await;
        if lock_session.is_some() {
            bail!(ErrorKind::InvalidState, "Tables are already locked");
        }

        let mut connection = self.pool.acquire().await?;
        // The server side timeout is whole seconds, the client side one is exact.
        let server_timeout = timeout.as_secs().max(1);
        let set_timeout = format!("SET SESSION lock_wait_timeout = {server_timeout}");
        (&mut *connection).execute(set_timeout.as_str()).await?;

        match tokio::time::timeout(timeout, run_statement(&mut connection, lock)).await {
            Ok(Ok(_)) => {
                debug!(query = %lock.query, "tables locked");
                *lock_session = Some(connection);

                Ok(())
            }
            Ok(Err(err)) => {
                if err.kind() == ErrorKind::LockWaitTimeout {
                    bail!(
                        ErrorKind::CutOverLockTimeout,
                        "Table locks were not granted in time",
                        detail = err.to_string()
                    );
                }

                Err(err)
            }
            Err(_) => {
                // The connection may still be waiting for the locks, it must not go back to
                // the pool.
                connection.close_on_drop();

                Err(migration_error!(
                    ErrorKind::CutOverLockTimeout,
                    "Table locks were not granted in time",
                    format!("waited {timeout:?}")
                ))
            }
        }
    }

    async fn swap_tables(&self, rename: &Statement) -> MigrationResult<()> {
        let mut lock_session = self.lock_session.lock().await;
        let Some(connection) = lock_session.as_mut() else {
            bail!(ErrorKind::InvalidState, "Tables must be locked before the swap");
        };

        run_statement(connection, rename).await?;

        Ok(())
    }

    async fn unlock_tables(&self, unlock: &Statement) -> MigrationResult<()> {
        let Some(mut connection) = self.lock_session.lock().await.take() else {
            return Ok(());
        };

        if let Err(err) = run_statement(&mut connection, unlock).await {
            warn!(error = %err, "failed to unlock tables, closing the locking session");
            // Closing the session releases its locks as well.
            connection.close_on_drop();

            return Err(err);
        }

        Ok(())
    }
}

/// Runs one statement on `connection` and returns the affected rows.
///
/// Statements without parameters go through the text protocol: `LOCK TABLES` and
/// `UNLOCK TABLES` cannot be prepared.
async fn run_statement(
    connection: &mut MySqlConnection,
    statement: &Statement,
) -> MigrationResult<u64> {
    let result = if statement.args.is_empty() {
        connection.execute(statement.query.as_str()).await?
    } else {
        bind_statement(statement).execute(&mut *connection).await?
    };

    Ok(result.rows_affected())
}
