use std::future::Future;

use futures::Stream;

use crate::error::MigrationResult;
use crate::types::{BinlogPosition, ReplicationMessage};

/// Producer of the replication stream.
///
/// Implementations decode the binlog of the server and yield the row changes of the migrated
/// table, plus bare positions for everything else.
pub trait ReplicationSource {
    type Stream: Stream<Item = MigrationResult<ReplicationMessage>> + Send + 'static;

    /// Starts streaming right after `position`.
    fn start_stream(
        &self,
        position: BinlogPosition,
    ) -> impl Future<Output = MigrationResult<Self::Stream>> + Send;
}
