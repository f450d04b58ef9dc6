use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::context::CopyProgress;
use crate::error::MigrationResult;
use crate::store::state::{StateStore, StoredProgress};
use crate::types::{BinlogPosition, MigrationId};

/// [`StateStore`] keeping progress in memory, lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<HashMap<MigrationId, StoredProgress>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    async fn load_progress(&self, id: MigrationId) -> MigrationResult<Option<StoredProgress>> {
        Ok(self.inner.lock().await.get(&id).cloned())
    }

    async fn store_copy_progress(
        &self,
        id: MigrationId,
        progress: &CopyProgress,
        complete: bool,
    ) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner.entry(id).or_default();
        stored.copy = progress.clone();
        stored.backfill_complete = complete;

        Ok(())
    }

    async fn store_replay_position(
        &self,
        id: MigrationId,
        position: BinlogPosition,
    ) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.entry(id).or_default().replay_position = Some(position);

        Ok(())
    }

    async fn clear_progress(&self, id: MigrationId) -> MigrationResult<()> {
        self.inner.lock().await.remove(&id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    #[tokio::test]
    async fn keeps_copy_and_replay_progress_apart() {
        let store = MemoryStateStore::new();
        let progress = CopyProgress {
            cursor: Some(vec![Cell::I64(42)]),
            chunks_copied: 3,
            rows_copied: 300,
        };

        store.store_copy_progress(7, &progress, false).await.unwrap();
        store
            .store_replay_position(7, BinlogPosition::new(2, 120))
            .await
            .unwrap();

        let stored = store.load_progress(7).await.unwrap().unwrap();
        assert_eq!(stored.copy, progress);
        assert!(!stored.backfill_complete);
        assert_eq!(stored.replay_position, Some(BinlogPosition::new(2, 120)));

        store.clear_progress(7).await.unwrap();
        assert!(store.load_progress(7).await.unwrap().is_none());
    }
}
