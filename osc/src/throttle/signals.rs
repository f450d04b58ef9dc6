use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use osc_mysql::probe::{get_replica_lag, get_threads_running};
use sqlx::mysql::MySqlPool;
use tokio::sync::watch;

use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::throttle::ThrottleSignals;

/// Source of the load signals the throttler decides on.
pub trait ThrottleSignalSource {
    fn read_signals(&self) -> impl Future<Output = MigrationResult<ThrottleSignals>> + Send;
}

/// Signal source returning values set by hand.
#[derive(Debug, Clone)]
pub struct StaticSignalSource {
    signals_tx: Arc<watch::Sender<Option<ThrottleSignals>>>,
}

impl StaticSignalSource {
    pub fn new(signals: ThrottleSignals) -> Self {
        let (signals_tx, _) = watch::channel(Some(signals));

        Self {
            signals_tx: Arc::new(signals_tx),
        }
    }

    /// A source reporting no lag and no load.
    pub fn idle() -> Self {
        Self::new(ThrottleSignals {
            lag: Some(Duration::ZERO),
            threads_running: Some(0),
        })
    }

    pub fn set(&self, signals: ThrottleSignals) {
        self.signals_tx.send_replace(Some(signals));
    }

    /// Makes every read fail until the next [`StaticSignalSource::set`].
    pub fn set_unavailable(&self) {
        self.signals_tx.send_replace(None);
    }
}

impl ThrottleSignalSource for StaticSignalSource {
    async fn read_signals(&self) -> MigrationResult<ThrottleSignals> {
        let signals = *self.signals_tx.borrow();

        signals.ok_or_else(|| {
            migration_error!(
                ErrorKind::SourceConnectionFailed,
                "Throttle signals are unavailable"
            )
        })
    }
}

/// Signal source probing MySQL servers.
///
/// Load is read from the migrated server. Lag is read from a replica when one is configured,
/// otherwise the migrated server is assumed to have no lag worth waiting for.
#[derive(Debug, Clone)]
pub struct MySqlSignalSource {
    pool: MySqlPool,
    replica_pool: Option<MySqlPool>,
}

impl MySqlSignalSource {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            replica_pool: None,
        }
    }

    pub fn with_replica(mut self, replica_pool: MySqlPool) -> Self {
        self.replica_pool = Some(replica_pool);
        self
    }
}

impl ThrottleSignalSource for MySqlSignalSource {
    async fn read_signals(&self) -> MigrationResult<ThrottleSignals> {
        let threads_running = get_threads_running(&self.pool).await?;

        // A configured replica without replication status has unknown lag.
        let lag = match &self.replica_pool {
            Some(replica_pool) => get_replica_lag(replica_pool).await?,
            None => Some(Duration::ZERO),
        };

        Ok(ThrottleSignals {
            lag,
            threads_running: Some(threads_running),
        })
    }
}
