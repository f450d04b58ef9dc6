use std::time::Duration;

use osc_config::shared::ThrottleConfig;

/// Load signals read from the database.
///
/// A `None` field means the signal could not be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleSignals {
    pub lag: Option<Duration>,
    pub threads_running: Option<u64>,
}

/// Whether the workers may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub may_proceed: bool,
    pub reason: Option<String>,
    /// Suggested wait before checking again.
    pub backoff: Option<Duration>,
    /// The load is so high that the migration must stop.
    pub critical: bool,
}

impl ThrottleDecision {
    pub fn proceed() -> Self {
        Self {
            may_proceed: true,
            reason: None,
            backoff: None,
            critical: false,
        }
    }

    pub fn throttled(reason: impl Into<String>, backoff: Duration) -> Self {
        Self {
            may_proceed: false,
            reason: Some(reason.into()),
            backoff: Some(backoff),
            critical: false,
        }
    }

    pub fn critical(reason: impl Into<String>) -> Self {
        Self {
            may_proceed: false,
            reason: Some(reason.into()),
            backoff: None,
            critical: true,
        }
    }

    /// Decision used when a signal is missing.
    pub fn missing_signal(reason: impl Into<String>, config: &ThrottleConfig) -> Self {
        if config.proceed_on_missing_signal {
            return Self::proceed();
        }

        Self::throttled(reason, config.backoff())
    }
}

/// Decides whether work may proceed given `signals`, `None` when they could not be read.
pub fn evaluate_signals(
    signals: Option<&ThrottleSignals>,
    config: &ThrottleConfig,
) -> ThrottleDecision {
    let Some(signals) = signals else {
        return ThrottleDecision::missing_signal("throttle signals unavailable", config);
    };

    if let (Some(critical), Some(threads_running)) =
        (config.critical_threads_running, signals.threads_running)
        && threads_running > critical
    {
        return ThrottleDecision::critical(format!(
            "threads running {threads_running} exceeds the critical threshold {critical}"
        ));
    }

    match signals.lag {
        None => return ThrottleDecision::missing_signal("replication lag unavailable", config),
        Some(lag) if lag > config.max_lag() => {
            return ThrottleDecision::throttled(
                format!("replication lag {lag:?} exceeds {:?}", config.max_lag()),
                config.backoff(),
            );
        }
        Some(_) => {}
    }

    if let Some(max_threads_running) = config.max_threads_running {
        match signals.threads_running {
            None => {
                return ThrottleDecision::missing_signal("threads running unavailable", config);
            }
            Some(threads_running) if threads_running > max_threads_running => {
                return ThrottleDecision::throttled(
                    format!("threads running {threads_running} exceeds {max_threads_running}"),
                    config.backoff(),
                );
            }
            Some(_) => {}
        }
    }

    ThrottleDecision::proceed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            max_lag_ms: 1000,
            max_threads_running: Some(50),
            critical_threads_running: Some(200),
            ..ThrottleConfig::default()
        }
    }

    fn signals(lag_ms: u64, threads_running: u64) -> ThrottleSignals {
        ThrottleSignals {
            lag: Some(Duration::from_millis(lag_ms)),
            threads_running: Some(threads_running),
        }
    }

    #[test]
    fn proceeds_below_thresholds() {
        assert!(evaluate_signals(Some(&signals(500, 10)), &config()).may_proceed);
    }

    #[test]
    fn throttles_on_lag() {
        let decision = evaluate_signals(Some(&signals(1500, 10)), &config());

        assert!(!decision.may_proceed);
        assert!(!decision.critical);
        assert_eq!(decision.backoff, Some(config().backoff()));
        assert!(decision.reason.unwrap().contains("replication lag"));
    }

    #[test]
    fn throttles_on_load() {
        let decision = evaluate_signals(Some(&signals(0, 51)), &config());

        assert!(!decision.may_proceed);
        assert!(decision.reason.unwrap().contains("threads running"));
    }

    #[test]
    fn critical_load_wins_over_everything() {
        let decision = evaluate_signals(Some(&signals(5000, 201)), &config());

        assert!(decision.critical);
        assert!(!decision.may_proceed);
    }

    #[test]
    fn fails_closed_without_signals() {
        let decision = evaluate_signals(None, &config());
        assert!(!decision.may_proceed);
        assert_eq!(
            decision.reason.as_deref(),
            Some("throttle signals unavailable")
        );

        let partial = ThrottleSignals {
            lag: None,
            threads_running: Some(1),
        };
        assert!(!evaluate_signals(Some(&partial), &config()).may_proceed);
    }

    #[test]
    fn proceeds_without_signals_when_configured() {
        let config = ThrottleConfig {
            proceed_on_missing_signal: true,
            ..config()
        };

        assert!(evaluate_signals(None, &config).may_proceed);
    }
}
