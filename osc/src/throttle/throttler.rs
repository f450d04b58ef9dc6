use std::sync::Arc;
use std::time::Duration;

use osc_config::shared::ThrottleConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::concurrency::pause::{PauseTx, create_pause_channel};
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, MigrationResult};
use crate::throttle::{ThrottleDecision, ThrottleSignalSource, evaluate_signals};

/// Wait between checks when a decision carries no backoff.
const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Gate consulted by the copy worker before every chunk and by the replay worker before every
/// batch.
///
/// The decision is refreshed by a background task polling a [`ThrottleSignalSource`]. An
/// operator pause holds the workers regardless of the signals.
#[derive(Debug, Clone)]
pub struct Throttler {
    decision_tx: Arc<watch::Sender<ThrottleDecision>>,
    pause_tx: PauseTx,
}

impl Throttler {
    fn new(initial: ThrottleDecision) -> Self {
        let (decision_tx, _) = watch::channel(initial);
        let (pause_tx, _) = create_pause_channel();

        Self {
            decision_tx: Arc::new(decision_tx),
            pause_tx,
        }
    }

    /// Starts polling `source` every `config.poll_interval()` until shutdown.
    pub fn start<S>(
        source: S,
        config: ThrottleConfig,
        shutdown_rx: ShutdownRx,
    ) -> (Throttler, JoinHandle<()>)
    where
        S: ThrottleSignalSource + Send + Sync + 'static,
    {
        let initial = ThrottleDecision::missing_signal("throttle signals not read yet", &config);
        let throttler = Throttler::new(initial);

        let decision_tx = throttler.decision_tx.clone();
        let handle = tokio::spawn(poll_signals(source, config, decision_tx, shutdown_rx));

        (throttler, handle)
    }

    /// A throttler that only honours the operator pause.
    pub fn unthrottled() -> Throttler {
        Throttler::new(ThrottleDecision::proceed())
    }

    /// Current decision, including the operator pause.
    pub fn decision(&self) -> ThrottleDecision {
        let decision = self.decision_tx.borrow().clone();
        if self.pause_tx.is_paused() && !decision.critical {
            return ThrottleDecision::throttled("paused by operator", DEFAULT_RECHECK_INTERVAL);
        }

        decision
    }

    pub fn pause(&self) {
        info!("migration paused by operator");
        self.pause_tx.pause();
    }

    pub fn resume(&self) {
        info!("migration resumed by operator");
        self.pause_tx.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause_tx.is_paused()
    }

    /// Waits until work may proceed.
    ///
    /// Fails with [`ErrorKind::CriticalLoad`] when the load crossed the critical threshold.
    pub async fn wait_until_permitted(
        &self,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let mut decision_rx = self.decision_tx.subscribe();
        let mut pause_rx = self.pause_tx.subscribe();
        let mut throttled_since: Option<Instant> = None;

        loop {
            decision_rx.mark_unchanged();
            pause_rx.mark_unchanged();

            let decision = self.decision();
            if decision.critical {
                bail!(
                    ErrorKind::CriticalLoad,
                    "Server load crossed the critical threshold",
                    decision.reason.unwrap_or_default()
                );
            }

            if decision.may_proceed {
                if let Some(since) = throttled_since {
                    debug!(throttled_for = ?since.elapsed(), "throttle released");
                }

                return Ok(ShutdownResult::Ok(()));
            }

            if throttled_since.is_none() {
                debug!(reason = ?decision.reason, "throttled");
                throttled_since = Some(Instant::now());
            }

            let recheck = decision.backoff.unwrap_or(DEFAULT_RECHECK_INTERVAL);
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    return Ok(ShutdownResult::Shutdown(()));
                }
                _ = decision_rx.changed() => {}
                _ = pause_rx.changed() => {}
                _ = tokio::time::sleep(recheck) => {}
            }
        }
    }
}

async fn poll_signals<S>(
    source: S,
    config: ThrottleConfig,
    decision_tx: Arc<watch::Sender<ThrottleDecision>>,
    mut shutdown_rx: ShutdownRx,
) where
    S: ThrottleSignalSource + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!("throttler stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let decision = match source.read_signals().await {
            Ok(signals) => evaluate_signals(Some(&signals), &config),
            Err(err) => {
                warn!(error = %err, fail_closed = !config.proceed_on_missing_signal, "failed to read throttle signals");
                evaluate_signals(None, &config)
            }
        };

        let previous = decision_tx.send_replace(decision.clone());
        if previous == decision {
            continue;
        }

        if decision.critical {
            error!(reason = ?decision.reason, "critical load detected");
        } else if !decision.may_proceed {
            info!(reason = ?decision.reason, "throttling");
        } else if !previous.may_proceed {
            info!("throttling stopped");
        }
    }
}
