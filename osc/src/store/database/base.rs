use std::future::Future;
use std::num::NonZeroI32;
use std::time::Duration;

use crate::applier::Statement;
use crate::error::MigrationResult;
use crate::types::{BinlogPosition, TableRow};

/// The database holding the original and the shadow table.
///
/// Implementations must be safe to share between the copy worker, the replay worker and the
/// cut-over coordinator.
pub trait MigrationStore {
    /// Runs `statements` as one atomic group and returns the number of affected rows.
    fn execute(&self, statements: &[Statement]) -> impl Future<Output = MigrationResult<u64>> + Send;

    /// Runs a select and returns its rows in select order.
    fn query_rows(
        &self,
        statement: &Statement,
    ) -> impl Future<Output = MigrationResult<Vec<TableRow>>> + Send;

    /// Runs the chunk select `select` and the statements `build` derives from its rows in one
    /// transaction. Returns the selected rows.
    ///
    /// Rows read by the select stay share-locked until the derived statements are committed.
    fn copy_chunk<F>(
        &self,
        select: &Statement,
        build: F,
    ) -> impl Future<Output = MigrationResult<Vec<TableRow>>> + Send
    where
        F: FnOnce(&[TableRow]) -> Vec<Statement> + Send;

    /// Returns the current end of the binlog.
    fn current_position(&self) -> impl Future<Output = MigrationResult<BinlogPosition>> + Send;

    /// Returns the server version, `None` when unknown.
    fn server_version(&self) -> impl Future<Output = MigrationResult<Option<NonZeroI32>>> + Send;

    /// Acquires the table locks of `lock` on a dedicated session.
    ///
    /// Fails with [`ErrorKind::CutOverLockTimeout`](crate::error::ErrorKind::CutOverLockTimeout)
    /// when the locks are not granted within `timeout`. While the locks are held, statements
    /// passed to [`MigrationStore::execute`] run on the locking session.
    fn lock_tables(
        &self,
        lock: &Statement,
        timeout: Duration,
    ) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Runs the atomic rename `rename` on the locking session.
    fn swap_tables(&self, rename: &Statement) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Releases the locks, does nothing when no lock is held.
    fn unlock_tables(&self, unlock: &Statement) -> impl Future<Output = MigrationResult<()>> + Send;
}
