use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, info};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx};
use crate::context::{CopyProgress, CopyPublisher, MigrationContext};
use crate::copier::{CopyResult, RowCopier};
use crate::error::{MigrationError, MigrationResult};
use crate::store::database::MigrationStore;
use crate::store::state::StateStore;
use crate::throttle::Throttler;
use crate::workers::base::{Worker, WorkerHandle, WorkerType, join_worker, spawn_worker};

/// Handle of a running [`CopyWorker`].
#[derive(Debug)]
pub struct CopyWorkerHandle {
    context: Arc<MigrationContext>,
    handle: Option<JoinHandle<MigrationResult<()>>>,
}

impl WorkerHandle<CopyProgress> for CopyWorkerHandle {
    fn state(&self) -> CopyProgress {
        self.context.copy_progress()
    }

    async fn wait(mut self) -> MigrationResult<()> {
        join_worker(WorkerType::Copy, self.handle.take()).await
    }
}

/// Worker running the backfill of the shadow table.
#[derive(Debug)]
pub struct CopyWorker<M, T> {
    context: Arc<MigrationContext>,
    store: M,
    state_store: T,
    throttler: Throttler,
    publisher: CopyPublisher,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<M, T> CopyWorker<M, T> {
    pub fn new(
        context: Arc<MigrationContext>,
        store: M,
        state_store: T,
        throttler: Throttler,
        publisher: CopyPublisher,
        shutdown_tx: ShutdownTx,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            context,
            store,
            state_store,
            throttler,
            publisher,
            shutdown_tx,
            shutdown_rx,
        }
    }
}

impl<M, T> Worker<CopyWorkerHandle, CopyProgress> for CopyWorker<M, T>
where
    M: MigrationStore + Send + Sync + 'static,
    T: StateStore + Send + Sync + 'static,
{
    type Error = MigrationError;

    async fn start(self) -> MigrationResult<CopyWorkerHandle> {
        info!("starting copy worker");

        let copy_worker_span = tracing::info_span!(
            "copy_worker",
            migration_id = self.context.id(),
            table = %self.context.original_table()
        );
        let context = self.context.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let copy_worker = async move {
            let copier = RowCopier::new(
                self.context,
                self.store,
                self.state_store,
                self.throttler,
                self.publisher,
                self.shutdown_rx,
            );

            match copier.run().await? {
                CopyResult::Completed { total_rows, .. } => {
                    info!(total_rows, "copy worker completed successfully");
                }
                CopyResult::Shutdown => {
                    info!("copy worker stopped by shutdown");
                }
            }

            Ok(())
        }
        .instrument(copy_worker_span.or_current());

        let handle = spawn_worker(WorkerType::Copy, shutdown_tx, copy_worker);

        Ok(CopyWorkerHandle {
            context,
            handle: Some(handle),
        })
    }
}
