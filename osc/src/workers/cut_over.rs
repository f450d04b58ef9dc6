use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, info};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx};
use crate::context::{CutOverPublisher, MigrationContext};
use crate::cut_over::{CutOverCoordinator, CutOverResult, CutOverState};
use crate::error::{MigrationError, MigrationResult};
use crate::store::database::MigrationStore;
use crate::workers::base::{Worker, WorkerHandle, WorkerType, join_worker, spawn_worker};

/// Handle of a running [`CutOverWorker`].
#[derive(Debug)]
pub struct CutOverWorkerHandle {
    context: Arc<MigrationContext>,
    handle: Option<JoinHandle<MigrationResult<()>>>,
}

impl WorkerHandle<CutOverState> for CutOverWorkerHandle {
    fn state(&self) -> CutOverState {
        self.context.cut_over_state()
    }

    async fn wait(mut self) -> MigrationResult<()> {
        join_worker(WorkerType::CutOver, self.handle.take()).await
    }
}

/// Worker running the [`CutOverCoordinator`].
#[derive(Debug)]
pub struct CutOverWorker<M> {
    context: Arc<MigrationContext>,
    store: M,
    publisher: CutOverPublisher,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<M> CutOverWorker<M> {
    pub fn new(
        context: Arc<MigrationContext>,
        store: M,
        publisher: CutOverPublisher,
        shutdown_tx: ShutdownTx,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            context,
            store,
            publisher,
            shutdown_tx,
            shutdown_rx,
        }
    }
}

impl<M> Worker<CutOverWorkerHandle, CutOverState> for CutOverWorker<M>
where
    M: MigrationStore + Send + Sync + 'static,
{
    type Error = MigrationError;

    async fn start(self) -> MigrationResult<CutOverWorkerHandle> {
        info!("starting cut-over worker");

        let cut_over_span = tracing::info_span!(
            "cut_over_worker",
            migration_id = self.context.id(),
            table = %self.context.original_table()
        );
        let context = self.context.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let cut_over_worker = async move {
            let coordinator =
                CutOverCoordinator::new(self.context, self.store, self.publisher, self.shutdown_rx);

            match coordinator.run().await? {
                CutOverResult::Done => info!("cut-over worker completed successfully"),
                CutOverResult::Aborted => info!("cut-over worker stopped by shutdown"),
            }

            Ok(())
        }
        .instrument(cut_over_span.or_current());

        let handle = spawn_worker(WorkerType::CutOver, shutdown_tx, cut_over_worker);

        Ok(CutOverWorkerHandle {
            context,
            handle: Some(handle),
        })
    }
}
