use std::sync::Arc;

use futures::Stream;
use tokio::task::JoinHandle;
use tracing::{Instrument, info};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx};
use crate::context::{MigrationContext, ReplayProgress, ReplayPublisher};
use crate::error::{MigrationError, MigrationResult};
use crate::replication::replay::{ReplayLoop, ReplayResult};
use crate::store::database::MigrationStore;
use crate::store::state::StateStore;
use crate::throttle::Throttler;
use crate::types::ReplicationMessage;
use crate::workers::base::{Worker, WorkerHandle, WorkerType, join_worker, spawn_worker};

/// Handle of a running [`ReplayWorker`].
#[derive(Debug)]
pub struct ReplayWorkerHandle {
    context: Arc<MigrationContext>,
    handle: Option<JoinHandle<MigrationResult<()>>>,
}

impl WorkerHandle<ReplayProgress> for ReplayWorkerHandle {
    fn state(&self) -> ReplayProgress {
        self.context.replay_progress()
    }

    async fn wait(mut self) -> MigrationResult<()> {
        join_worker(WorkerType::Replay, self.handle.take()).await
    }
}

/// Worker replaying the replication stream onto the shadow table.
#[derive(Debug)]
pub struct ReplayWorker<M, T, S> {
    context: Arc<MigrationContext>,
    store: M,
    state_store: T,
    stream: S,
    throttler: Throttler,
    publisher: ReplayPublisher,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<M, T, S> ReplayWorker<M, T, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: Arc<MigrationContext>,
        store: M,
        state_store: T,
        stream: S,
        throttler: Throttler,
        publisher: ReplayPublisher,
        shutdown_tx: ShutdownTx,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            context,
            store,
            state_store,
            stream,
            throttler,
            publisher,
            shutdown_tx,
            shutdown_rx,
        }
    }
}

impl<M, T, S> Worker<ReplayWorkerHandle, ReplayProgress> for ReplayWorker<M, T, S>
where
    M: MigrationStore + Send + Sync + 'static,
    T: StateStore + Send + Sync + 'static,
    S: Stream<Item = MigrationResult<ReplicationMessage>> + Send + 'static,
{
    type Error = MigrationError;

    async fn start(self) -> MigrationResult<ReplayWorkerHandle> {
        info!("starting replay worker");

        let replay_worker_span = tracing::info_span!(
            "replay_worker",
            migration_id = self.context.id(),
            table = %self.context.original_table()
        );
        let context = self.context.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let replay_worker = async move {
            let replay = ReplayLoop::new(
                self.context,
                self.store,
                self.state_store,
                self.throttler,
                self.publisher,
                self.shutdown_rx,
            );

            match replay.run(self.stream).await? {
                ReplayResult::StreamEnded => info!("replay worker completed, stream ended"),
                ReplayResult::Shutdown => info!("replay worker stopped by shutdown"),
                ReplayResult::CutOverComplete => info!("replay worker completed after the swap"),
            }

            Ok(())
        }
        .instrument(replay_worker_span.or_current());

        let handle = spawn_worker(WorkerType::Replay, shutdown_tx, replay_worker);

        Ok(ReplayWorkerHandle {
            context,
            handle: Some(handle),
        })
    }
}
