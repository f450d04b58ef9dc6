use std::sync::Arc;

use osc_config::shared::CutOverConfig;
use tracing::{error, info, warn};

use crate::applier::Applier;
use crate::bail;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx, is_shutdown, wait_for_shutdown};
use crate::context::{CutOverPublisher, MigrationContext};
use crate::cut_over::CutOverState;
use crate::error::{ErrorKind, MigrationResult};
use crate::retry::{RetryBackoff, retry_with_backoff};
use crate::store::database::MigrationStore;
use crate::types::BinlogPosition;

/// Result of the cut-over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutOverResult {
    /// The shadow table replaced the original table.
    Done,
    /// Shutdown was requested before the tables were locked.
    Aborted,
}

/// Drives the cut-over state machine.
///
/// Once the backfill completed, the coordinator waits for the replay to reach the backfill
/// checkpoint, locks both tables, waits for the replay to reach the position read under the
/// lock and renames the tables in one statement. Any failure before the rename releases the
/// locks and leaves the original table untouched. Tables are never locked or renamed once the
/// replay stopped. Shutdown is honoured until the tables are locked; a locked attempt always
/// runs to the rename or to the release of the locks.
#[derive(Debug)]
pub struct CutOverCoordinator<M> {
    context: Arc<MigrationContext>,
    applier: Applier,
    store: M,
    publisher: CutOverPublisher,
    shutdown_rx: ShutdownRx,
}

impl<M> CutOverCoordinator<M>
where
    M: MigrationStore + Send + Sync,
{
    pub fn new(
        context: Arc<MigrationContext>,
        store: M,
        publisher: CutOverPublisher,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            applier: Applier::new(context.clone()),
            context,
            store,
            publisher,
            shutdown_rx,
        }
    }

    /// Runs the cut-over to completion.
    ///
    /// Attempts failing on a lock timeout or on a consistency check are retried up to
    /// `cut_over.max_attempts` times. The error of the last attempt is returned and the state
    /// is left at [`CutOverState::Failed`].
    pub async fn run(mut self) -> MigrationResult<CutOverResult> {
        let config = self.context.config().cut_over.clone();

        let checkpoint = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                self.fail("shutdown requested during the backfill")?;
                info!("cut-over aborted before the backfill completed");

                return Ok(CutOverResult::Aborted);
            }
            checkpoint = self.context.wait_for_backfill() => checkpoint,
        };
        let checkpoint = match checkpoint {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                self.fail(err.to_string())?;
                return Err(err);
            }
        };

        let mut backoff = RetryBackoff::new(self.context.config().retry.clone());
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.publisher.transition(CutOverState::Draining)?;
            info!(attempt, %checkpoint, "starting cut-over attempt");

            let err = match self.attempt(checkpoint, &config).await {
                Ok(ShutdownResult::Ok(())) => return Ok(CutOverResult::Done),
                Ok(ShutdownResult::Shutdown(())) => {
                    self.fail("shutdown requested before the tables were locked")?;
                    info!("cut-over aborted by shutdown");

                    return Ok(CutOverResult::Aborted);
                }
                Err(err) => err,
            };

            self.fail(err.to_string())?;

            if err.kind() == ErrorKind::ReplayStopped && is_shutdown(&self.shutdown_rx) {
                info!("cut-over aborted, the replay stopped on shutdown");
                return Ok(CutOverResult::Aborted);
            }

            let retryable = matches!(
                err.kind(),
                ErrorKind::CutOverLockTimeout | ErrorKind::ConsistencyCheckFailed
            );
            if !retryable || attempt >= config.max_attempts {
                error!(attempt, error = %err, "cut-over failed, the original table is untouched");
                return Err(err);
            }

            let delay = backoff
                .next_delay()
                .unwrap_or_else(|| self.context.config().retry.max_retry_delay());
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "cut-over attempt failed, retrying"
            );

            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!("cut-over aborted by shutdown");
                    return Ok(CutOverResult::Aborted);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &mut self,
        checkpoint: BinlogPosition,
        config: &CutOverConfig,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        if let ShutdownResult::Shutdown(()) = self.drain(checkpoint, config).await? {
            return Ok(ShutdownResult::Shutdown(()));
        }

        self.ensure_replay_running()?;

        let lock = self.applier.build_lock_tables();
        self.store.lock_tables(&lock, config.lock_timeout()).await?;
        info!(query = %lock.query, "tables locked");

        let result = self.swap_locked(config).await;

        let unlock = self.applier.build_unlock_tables();
        match result {
            Ok(()) => {
                if let Err(err) = self.store.unlock_tables(&unlock).await {
                    // The rename is committed, closing the locking session releases the locks.
                    warn!(error = %err, "failed to unlock tables after the swap");
                }

                self.publisher.transition(CutOverState::Done)?;
                info!(
                    table = %self.context.original_table(),
                    old_table = %self.context.old_table(),
                    "cut-over complete"
                );

                Ok(ShutdownResult::Ok(()))
            }
            Err(err) => {
                if let Err(unlock_err) = self.store.unlock_tables(&unlock).await {
                    error!(error = %unlock_err, "failed to unlock tables after a failed cut-over");
                }

                Err(err)
            }
        }
    }

    /// Waits for the replay to reach the backfill checkpoint, then for the postponement to be
    /// released.
    async fn drain(
        &mut self,
        checkpoint: BinlogPosition,
        config: &CutOverConfig,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let drained = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut self.shutdown_rx) => return Ok(ShutdownResult::Shutdown(())),
            drained = tokio::time::timeout(
                config.drain_timeout(),
                self.context.wait_for_replay(checkpoint),
            ) => drained,
        };

        match drained {
            Ok(result) => result?,
            Err(_) => bail!(
                ErrorKind::DrainTimeout,
                "Replay did not reach the backfill checkpoint in time",
                format!(
                    "checkpoint {checkpoint}, replay at {}",
                    self.context.replay_progress().position
                )
            ),
        }

        if self.context.is_postponed() {
            info!("cut-over postponed, waiting for release");

            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut self.shutdown_rx) => return Ok(ShutdownResult::Shutdown(())),
                released = self.context.wait_until_released() => released?,
            }

            info!("cut-over released");
        }

        Ok(ShutdownResult::Ok(()))
    }

    /// Catches up under the lock and renames the tables.
    async fn swap_locked(&mut self, config: &CutOverConfig) -> MigrationResult<()> {
        self.publisher.transition(CutOverState::Locked)?;

        let store = &self.store;
        let locked_position = retry_with_backoff(
            &self.context.config().retry,
            "current_position",
            move || store.current_position(),
        )
        .await?;

        let caught_up = tokio::time::timeout(
            config.lock_timeout(),
            self.context.wait_for_replay(locked_position),
        )
        .await;
        match caught_up {
            Ok(result) => result?,
            Err(_) => bail!(
                ErrorKind::ConsistencyCheckFailed,
                "Replay did not reach the locked position in time",
                format!(
                    "locked at {locked_position}, replay at {}",
                    self.context.replay_progress().position
                )
            ),
        }

        self.ensure_replay_running()?;

        let rename = self.applier.build_rename_tables();
        self.store.swap_tables(&rename).await?;
        self.publisher.transition(CutOverState::Swapped)?;
        info!(query = %rename.query, "tables swapped");

        Ok(())
    }

    /// Changes made after the replay stopped never reach the shadow table.
    fn ensure_replay_running(&self) -> MigrationResult<()> {
        if !self.context.is_replay_running() {
            bail!(
                ErrorKind::ReplayStopped,
                "Replay stopped before the tables were swapped",
                format!("replay at {}", self.context.replay_progress().position)
            );
        }

        Ok(())
    }

    fn fail(&mut self, reason: impl Into<String>) -> MigrationResult<()> {
        let reason = reason.into();
        if self.publisher.state().is_terminal() {
            return Ok(());
        }

        self.publisher.transition(CutOverState::Failed { reason })
    }
}
