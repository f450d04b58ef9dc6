use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::context::CopyProgress;
use crate::error::MigrationResult;
use crate::types::{BinlogPosition, MigrationId};

/// Progress of a migration as last persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProgress {
    pub copy: CopyProgress,
    pub backfill_complete: bool,
    /// Replay position to restart the replication stream from.
    pub replay_position: Option<BinlogPosition>,
}

/// Persistent storage of migration progress.
///
/// A restarted migration resumes the backfill after the stored cursor. The replication stream
/// must then be restarted from the stored replay position, so that changes to rows copied
/// before the restart are replayed again.
pub trait StateStore {
    /// Loads the stored progress of migration `id`, `None` when nothing was stored.
    fn load_progress(
        &self,
        id: MigrationId,
    ) -> impl Future<Output = MigrationResult<Option<StoredProgress>>> + Send;

    /// Stores the backfill progress of migration `id`.
    fn store_copy_progress(
        &self,
        id: MigrationId,
        progress: &CopyProgress,
        complete: bool,
    ) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Stores the replay position of migration `id`.
    fn store_replay_position(
        &self,
        id: MigrationId,
        position: BinlogPosition,
    ) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Removes everything stored for migration `id`, once it completed.
    fn clear_progress(&self, id: MigrationId) -> impl Future<Output = MigrationResult<()>> + Send;
}
