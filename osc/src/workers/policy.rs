use crate::error::{ErrorKind, MigrationError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The operation can be retried automatically after a backoff.
    Timed,
    /// The migration must be restarted after manual intervention.
    Manual,
    /// The operation must not be retried.
    NoRetry,
}

/// Policy describing how a [`MigrationError`] should be handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from a [`MigrationError`].
pub fn build_error_handling_policy(error: &MigrationError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient store failures, expected to recover without intervention.
        ErrorKind::SourceConnectionFailed
        | ErrorKind::LockWaitTimeout
        | ErrorKind::Deadlock
        | ErrorKind::OperationCanceled => ErrorHandlingPolicy::new(RetryDirective::Timed, None),

        // Preconditions of the migration, retrying cannot change the outcome.
        ErrorKind::MissingUniqueKey => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Add a primary key or a unique key over non-nullable columns to the table."),
        ),
        ErrorKind::InvalidUniqueKey => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Choose a unique key whose columns are non-nullable and kept by the alteration."),
        ),
        ErrorKind::SchemaMismatch => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Verify the shadow table schema and the column renames."),
        ),
        ErrorKind::MalformedEvent => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Verify the server uses row based replication with full row images."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the migration configuration."),
        ),
        ErrorKind::TableNameTooLong => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Rename the table so the derived table names fit in 64 characters."),
        ),
        ErrorKind::UnsupportedServerVersion => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Upgrade the server to MySQL 8.0.13 or later, earlier versions cannot rename locked tables."),
        ),

        // Cut-over failures leave the original table in place, a new attempt may succeed.
        ErrorKind::CutOverLockTimeout
        | ErrorKind::ConsistencyCheckFailed
        | ErrorKind::DrainTimeout => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Retry the cut-over when the write load on the table is lower."),
        ),
        ErrorKind::ReplayStopped => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Inspect the replay error and restart the migration, it resumes from the stored progress."),
        ),
        ErrorKind::CriticalLoad => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Restart the migration once the server load is back to normal."),
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "There is no single prescribed solution for this error. The original table is untouched, inspect the error and restart the migration.",
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> MigrationError {
        MigrationError::from((kind, "test error"))
    }

    #[test]
    fn classifies_transient_store_errors_as_timed_retry() {
        for kind in [
            ErrorKind::SourceConnectionFailed,
            ErrorKind::LockWaitTimeout,
            ErrorKind::Deadlock,
            ErrorKind::OperationCanceled,
        ] {
            let policy = build_error_handling_policy(&err(kind));
            assert_eq!(policy.retry_directive(), RetryDirective::Timed, "{kind:?}");
            assert_eq!(policy.solution(), None);
        }
    }

    #[test]
    fn classifies_precondition_violations_as_fatal() {
        for kind in [
            ErrorKind::MissingUniqueKey,
            ErrorKind::InvalidUniqueKey,
            ErrorKind::SchemaMismatch,
            ErrorKind::MalformedEvent,
            ErrorKind::ConfigError,
            ErrorKind::UnsupportedServerVersion,
        ] {
            let policy = build_error_handling_policy(&err(kind));
            assert_eq!(policy.retry_directive(), RetryDirective::NoRetry, "{kind:?}");
            assert!(policy.solution().is_some());
        }
    }

    #[test]
    fn classifies_cut_over_failures_as_manual_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::ConsistencyCheckFailed));
        assert_eq!(policy.retry_directive(), RetryDirective::Manual);
    }

    #[test]
    fn classifies_unknown_kind_as_manual_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::InvalidState));
        assert_eq!(policy.retry_directive(), RetryDirective::Manual);
        assert!(policy.solution().is_some());
    }
}
