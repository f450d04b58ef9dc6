use std::future::Future;

use tokio::task::JoinHandle;
use tracing::error;

use crate::concurrency::shutdown::ShutdownTx;
use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;

/// Kinds of background workers of a migration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerType {
    /// Copies the existing rows into the shadow table.
    Copy,
    /// Replays the replication stream onto the shadow table.
    Replay,
    /// Swaps the shadow table into place.
    CutOver,
}

impl WorkerType {
    fn panic_kind(self) -> ErrorKind {
        match self {
            WorkerType::Copy => ErrorKind::CopyWorkerPanic,
            WorkerType::Replay => ErrorKind::ReplayWorkerPanic,
            WorkerType::CutOver => ErrorKind::CutOverFailed,
        }
    }
}

/// A background worker.
///
/// Starting a worker spawns its task and returns a handle to observe and await it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when the worker fails to start.
    type Error;

    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle of a running worker.
///
/// The state is a snapshot read from the migration context, it stays readable after the worker
/// completed.
pub trait WorkerHandle<S> {
    fn state(&self) -> S;

    /// Waits for the worker to complete and returns its result.
    fn wait(self) -> impl Future<Output = MigrationResult<()>> + Send;
}

/// Signals the migration shutdown when dropped while armed.
struct ShutdownOnFailure {
    worker_type: WorkerType,
    shutdown_tx: Option<ShutdownTx>,
}

impl ShutdownOnFailure {
    fn disarm(mut self) {
        self.shutdown_tx = None;
    }
}

impl Drop for ShutdownOnFailure {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            error!(worker = ?self.worker_type, "worker failed, shutting down the migration");
            shutdown_tx.shutdown();
        }
    }
}

/// Spawns the task of a worker.
///
/// When the task fails or panics the whole migration is shut down, the other workers stop and
/// the cut-over never starts.
pub(crate) fn spawn_worker<F>(
    worker_type: WorkerType,
    shutdown_tx: ShutdownTx,
    worker: F,
) -> JoinHandle<MigrationResult<()>>
where
    F: Future<Output = MigrationResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let guard = ShutdownOnFailure {
            worker_type,
            shutdown_tx: Some(shutdown_tx),
        };

        let result = worker.await;
        if result.is_ok() {
            guard.disarm();
        }

        result
    })
}

/// Awaits a spawned worker task, turning a panic or a cancellation into an error.
pub(crate) async fn join_worker(
    worker_type: WorkerType,
    handle: Option<JoinHandle<MigrationResult<()>>>,
) -> MigrationResult<()> {
    let Some(handle) = handle else {
        return Ok(());
    };

    handle.await.map_err(|err| {
        if err.is_cancelled() {
            migration_error!(
                ErrorKind::OperationCanceled,
                "Worker was cancelled",
                format!("{worker_type:?}"),
                source: err
            )
        } else {
            migration_error!(
                worker_type.panic_kind(),
                "Worker panicked",
                format!("{worker_type:?}"),
                source: err
            )
        }
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::{create_shutdown_channel, is_shutdown};

    #[tokio::test]
    async fn reports_worker_panic_with_its_kind() {
        let handle = tokio::spawn(async {
            if true {
                panic!("boom");
            }

            Ok(())
        });

        let err = join_worker(WorkerType::Copy, Some(handle))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CopyWorkerPanic);
    }

    #[tokio::test]
    async fn forwards_worker_result() {
        let handle = tokio::spawn(async {
            Err(migration_error!(ErrorKind::QueryFailed, "Query failed"))
        });

        let err = join_worker(WorkerType::Replay, Some(handle))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert!(join_worker(WorkerType::Replay, None).await.is_ok());
    }

    #[tokio::test]
    async fn failed_worker_shuts_the_migration_down() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let handle = spawn_worker(WorkerType::Replay, shutdown_tx, async {
            Err(migration_error!(ErrorKind::MalformedEvent, "Rows event without after image"))
        });

        let err = join_worker(WorkerType::Replay, Some(handle))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEvent);
        assert!(is_shutdown(&shutdown_rx));
    }

    #[tokio::test]
    async fn panicked_worker_shuts_the_migration_down() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let handle = spawn_worker(WorkerType::Copy, shutdown_tx, async {
            if true {
                panic!("boom");
            }

            Ok(())
        });

        let err = join_worker(WorkerType::Copy, Some(handle))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CopyWorkerPanic);
        assert!(is_shutdown(&shutdown_rx));
    }

    #[tokio::test]
    async fn completed_worker_leaves_the_migration_running() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let handle = spawn_worker(WorkerType::CutOver, shutdown_tx, async { Ok(()) });

        join_worker(WorkerType::CutOver, Some(handle)).await.unwrap();
        assert!(!is_shutdown(&shutdown_rx));
    }
}
