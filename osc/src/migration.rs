//! Orchestration of a whole migration.
//!
//! [`Migration::start`] resolves the replay start position, builds the [`MigrationContext`],
//! tries an instant alteration when allowed and otherwise starts the throttler and the copy,
//! replay and cut-over workers. The returned [`MigrationHandle`] controls the running
//! migration and collects its outcome.

use std::num::NonZeroI32;
use std::slice;
use std::sync::Arc;

use osc_config::shared::{MigrationConfig, OscConfig};
use osc_mysql::below_version;
use osc_mysql::version::MYSQL_8_0_13;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::applier::{Applier, InstantDdlEligibility};
use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::context::{
    BackfillState, CopyProgress, MigrationContext, PostponeTx, ReplayProgress,
};
use crate::cut_over::CutOverState;
use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::replication::ReplicationSource;
use crate::retry::retry_with_backoff;
use crate::store::database::{MigrationStore, MySqlStore, connect_pool};
use crate::store::state::{ConfiguredStateStore, StateStore};
use crate::throttle::{MySqlSignalSource, ThrottleSignalSource, Throttler};
use crate::types::{TableName, TableSchema, UniqueKey};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::copy::{CopyWorker, CopyWorkerHandle};
use crate::workers::cut_over::{CutOverWorker, CutOverWorkerHandle};
use crate::workers::replay::{ReplayWorker, ReplayWorkerHandle};

/// Schemas of the migrated tables, resolved by the caller.
#[derive(Debug, Clone)]
pub struct MigrationTables {
    pub original: TableSchema,
    /// The shadow table, already created with the altered structure.
    pub shadow: TableSchema,
    pub unique_key: Option<UniqueKey>,
}

/// How a migration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The alteration was applied in place, no data was copied.
    InstantDdl,
    /// The shadow table replaced the original table.
    Completed {
        rows_copied: u64,
        events_applied: u64,
    },
    /// Shutdown was requested before the cut-over, the original table is untouched.
    Aborted,
}

/// Snapshot of the progress of a running migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    pub copy: CopyProgress,
    pub backfill: BackfillState,
    pub replay: ReplayProgress,
    pub cut_over: CutOverState,
}

/// Stores and throttle signals of a migration against a MySQL server.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    pub store: MySqlStore,
    pub state_store: ConfiguredStateStore,
    pub signals: MySqlSignalSource,
}

impl MySqlBackend {
    /// Connects to the server described by `config`.
    pub async fn connect(config: &OscConfig) -> MigrationResult<Self> {
        config.validate()?;

        let store = MySqlStore::connect(&config.connection).await?;
        let original = TableName::new(
            config.migration.database.clone(),
            config.migration.table.clone(),
        );
        let state_store =
            ConfiguredStateStore::build(&config.state_store, store.pool().clone(), &original)
                .await?;
        let mut signals = MySqlSignalSource::new(store.pool().clone());
        if let Some(replica) = &config.replica {
            info!(host = %replica.host, "reading replication lag from the replica");
            signals = signals.with_replica(connect_pool(replica).await?);
        }

        Ok(Self {
            store,
            state_store,
            signals,
        })
    }
}

/// A migration that was not started yet.
#[derive(Debug)]
pub struct Migration<M, T> {
    config: MigrationConfig,
    store: M,
    state_store: T,
    shutdown_tx: ShutdownTx,
}

impl<M, T> Migration<M, T>
where
    M: MigrationStore + Clone + Send + Sync + 'static,
    T: StateStore + Clone + Send + Sync + 'static,
{
    pub fn new(config: MigrationConfig, store: M, state_store: T) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config,
            store,
            state_store,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Starts the migration of `tables`.
    ///
    /// The replay starts from the stored replay position of a previous run, or from the
    /// current binlog position before anything is copied.
    pub async fn start<G, R>(
        self,
        tables: MigrationTables,
        signals: G,
        source: R,
    ) -> MigrationResult<MigrationHandle<T>>
    where
        G: ThrottleSignalSource + Send + Sync + 'static,
        R: ReplicationSource,
    {
        let run_id = Uuid::new_v4();
        let migration_span = tracing::info_span!(
            "migration",
            migration_id = self.config.id,
            %run_id,
            table = %tables.original.name
        );

        self.start_workers(tables, signals, source)
            .instrument(migration_span)
            .await
    }

    async fn start_workers<G, R>(
        self,
        tables: MigrationTables,
        signals: G,
        source: R,
    ) -> MigrationResult<MigrationHandle<T>>
    where
        G: ThrottleSignalSource + Send + Sync + 'static,
        R: ReplicationSource,
    {
        self.config.validate()?;
        info!(alter = %self.config.alter, "starting migration");

        let stored = self.state_store.load_progress(self.config.id).await?;
        let start_position = match stored.and_then(|progress| progress.replay_position) {
            Some(position) => {
                info!(%position, "resuming replay from stored position");
                position
            }
            None => {
                let store = &self.store;
                let position = retry_with_backoff(&self.config.retry, "current_position", move || {
                    store.current_position()
                })
                .await?;

                // Stored before anything is copied, a restart must replay every change since.
                let (id, state_store) = (self.config.id, &self.state_store);
                retry_with_backoff(&self.config.retry, "store_replay_position", move || {
                    state_store.store_replay_position(id, position)
                })
                .await?;

                position
            }
        };

        let (context, publishers) = MigrationContext::new(
            self.config.clone(),
            tables.original,
            tables.shadow,
            tables.unique_key,
            start_position,
        )?;

        let store = &self.store;
        let server_version = retry_with_backoff(&self.config.retry, "server_version", move || {
            store.server_version()
        })
        .await?;

        if self.config.attempt_instant_ddl && self.try_instant_ddl(&context, server_version).await?
        {
            return Ok(MigrationHandle {
                context,
                throttler: Throttler::unthrottled(),
                postpone_tx: publishers.postpone,
                shutdown_tx: self.shutdown_tx,
                state_store: self.state_store,
                workers: MigrationWorkers::InPlace,
            });
        }

        // The cut-over renames the tables from the session holding their locks.
        if below_version!(server_version, MYSQL_8_0_13) {
            bail!(
                ErrorKind::UnsupportedServerVersion,
                "The server cannot rename locked tables",
                format!(
                    "server version {}, at least {MYSQL_8_0_13} is required",
                    server_version.map_or(0, NonZeroI32::get)
                )
            );
        }

        let shutdown_rx = self.shutdown_tx.subscribe();
        let (throttler, throttler_handle) =
            Throttler::start(signals, self.config.throttle.clone(), shutdown_rx.clone());

        let stream = source.start_stream(start_position).await?;
        info!(position = %start_position, "replication stream started");

        let copy = CopyWorker::new(
            context.clone(),
            self.store.clone(),
            self.state_store.clone(),
            throttler.clone(),
            publishers.copy,
            self.shutdown_tx.clone(),
            shutdown_rx.clone(),
        )
        .start()
        .await?;

        let replay = ReplayWorker::new(
            context.clone(),
            self.store.clone(),
            self.state_store.clone(),
            stream,
            throttler.clone(),
            publishers.replay,
            self.shutdown_tx.clone(),
            shutdown_rx.clone(),
        )
        .start()
        .await?;

        let cut_over = CutOverWorker::new(
            context.clone(),
            self.store.clone(),
            publishers.cut_over,
            self.shutdown_tx.clone(),
            shutdown_rx,
        )
        .start()
        .await?;

        Ok(MigrationHandle {
            context,
            throttler,
            postpone_tx: publishers.postpone,
            shutdown_tx: self.shutdown_tx,
            state_store: self.state_store,
            workers: MigrationWorkers::Started {
                throttler_handle,
                copy,
                replay,
                cut_over,
            },
        })
    }

    /// Applies the alteration in place when possible. Returns `false` when the shadow table
    /// path is needed.
    async fn try_instant_ddl(
        &self,
        context: &Arc<MigrationContext>,
        server_version: Option<NonZeroI32>,
    ) -> MigrationResult<bool> {
        let applier = Applier::new(context.clone());

        if let InstantDdlEligibility::Ineligible { reason } =
            applier.instant_ddl_eligibility(server_version)
        {
            info!(reason = %reason, "instant alteration not possible, using a shadow table");
            return Ok(false);
        }

        let statement = applier.build_instant_ddl_statement();
        match self.store.execute(slice::from_ref(&statement)).await {
            Ok(_) => {
                info!(query = %statement.query, "table altered in place");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::InstantDdlRejected => {
                warn!(error = %err, "instant alteration rejected, using a shadow table");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug)]
enum MigrationWorkers {
    InPlace,
    Started {
        throttler_handle: JoinHandle<()>,
        copy: CopyWorkerHandle,
        replay: ReplayWorkerHandle,
        cut_over: CutOverWorkerHandle,
    },
}

/// Control surface of a started migration.
///
/// Dropping the handle leaves the workers running, [`MigrationHandle::shutdown`] stops them. A
/// worker that fails stops the others on its own.
#[derive(Debug)]
pub struct MigrationHandle<T> {
    context: Arc<MigrationContext>,
    throttler: Throttler,
    postpone_tx: PostponeTx,
    shutdown_tx: ShutdownTx,
    state_store: T,
    workers: MigrationWorkers,
}

impl<T> MigrationHandle<T>
where
    T: StateStore + Send + Sync,
{
    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.context
    }

    pub fn progress(&self) -> MigrationProgress {
        MigrationProgress {
            copy: self.context.copy_progress(),
            backfill: self.context.backfill_state(),
            replay: self.context.replay_progress(),
            cut_over: self.context.cut_over_state(),
        }
    }

    /// Holds the copy and the replay at their next throttle check.
    pub fn pause(&self) {
        self.throttler.pause();
    }

    pub fn resume(&self) {
        self.throttler.resume();
    }

    /// Holds the cut-over once the replay drained.
    pub fn postpone_cut_over(&self) {
        info!("cut-over postponed by operator");
        self.postpone_tx.postpone();
    }

    pub fn release_cut_over(&self) {
        info!("cut-over released by operator");
        self.postpone_tx.release();
    }

    /// Stops the migration. Tables already locked by the cut-over are swapped or released
    /// first.
    pub fn shutdown(&self) {
        info!("shutting down the migration");
        self.shutdown_tx.shutdown();
    }

    /// Waits for the migration to end.
    ///
    /// Errors of all workers are returned together. Stored progress is cleared once the tables
    /// were swapped.
    pub async fn wait(self) -> MigrationResult<MigrationOutcome> {
        let MigrationWorkers::Started {
            throttler_handle,
            copy,
            replay,
            cut_over,
        } = self.workers
        else {
            self.state_store.clear_progress(self.context.id()).await?;
            return Ok(MigrationOutcome::InstantDdl);
        };

        let mut errors = vec![];

        if let Err(err) = cut_over.wait().await {
            errors.push(err);
        }

        // The copy and the replay have nothing left to do once the cut-over ended.
        self.shutdown_tx.shutdown();

        if let Err(err) = copy.wait().await {
            errors.push(err);
        }
        if let Err(err) = replay.wait().await {
            errors.push(err);
        }
        if let Err(err) = throttler_handle.await {
            errors.push(migration_error!(
                ErrorKind::Unknown,
                "Throttler task failed",
                source: err
            ));
        }

        if !errors.is_empty() {
            warn!(errors = errors.len(), "migration failed");
            return Err(errors.into());
        }

        if !self.context.is_cut_over_complete() {
            info!("migration aborted, the original table is untouched");
            return Ok(MigrationOutcome::Aborted);
        }

        self.state_store.clear_progress(self.context.id()).await?;

        let outcome = MigrationOutcome::Completed {
            rows_copied: self.context.copy_progress().rows_copied,
            events_applied: self.context.replay_progress().events_applied,
        };
        info!(?outcome, "migration completed");

        Ok(outcome)
    }

    pub async fn shutdown_and_wait(self) -> MigrationResult<MigrationOutcome> {
        self.shutdown();
        self.wait().await
    }
}
