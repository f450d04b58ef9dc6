//! Error types and result definitions for migration operations.
//!
//! [`MigrationError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source, the call site and a backtrace. Errors of several
//! workers can be aggregated into one value.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use osc_config::shared::ValidationError;
use osc_mysql::probe::ProbeError;
use osc_mysql::types::{KeyError, PositionError};

/// Result type for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures of several workers, reported together.
    Many {
        errors: Vec<MigrationError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur during a migration.
///
/// The kind decides how an error is handled, see
/// [`build_error_handling_policy`](crate::workers::policy::build_error_handling_policy).
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,

    // Query & Execution Errors
    QueryFailed,
    LockWaitTimeout,
    Deadlock,
    OperationCanceled,

    // Schema & Key Errors
    SourceSchemaError,
    SchemaMismatch,
    MissingUniqueKey,
    InvalidUniqueKey,
    TableNameTooLong,

    // Data & Event Errors
    ConversionError,
    InvalidData,
    MalformedEvent,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // State & Workflow Errors
    InvalidState,
    CopyWorkerPanic,
    ReplayWorkerPanic,
    MigrationAborted,
    CriticalLoad,

    // Cut-Over Errors
    CutOverLockTimeout,
    DrainTimeout,
    ConsistencyCheckFailed,
    CutOverFailed,
    ReplayStopped,

    // Server Errors
    UnsupportedServerVersion,

    // Instant DDL Errors
    InstantDdlRejected,

    // Unknown / Uncategorized
    Unknown,
}

impl MigrationError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of their first error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the dynamic detail, if any.
    ///
    /// Aggregated errors return the first detail found.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error.
    ///
    /// Has no effect on aggregated errors, which expose their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MigrationError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    /// Wraps a foreign error, keeping its message as detail.
    #[track_caller]
    fn wrap<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        MigrationError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for MigrationError {
    fn eq(&self, other: &MigrationError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for MigrationError {
    /// Hashes only the kind and the static description, so repeated occurrences of the same
    /// failure group together regardless of detail or location.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_indented(f, "Backtrace:", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

/// Writes a labelled block, indented below the headline.
fn write_indented(f: &mut fmt::Formatter<'_>, label: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {label}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for MigrationError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MigrationError {
        MigrationError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for MigrationError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MigrationError {
        MigrationError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for MigrationError
where
    E: Into<MigrationError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MigrationError {
        let location = Location::caller();
        let mut errors: Vec<MigrationError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        MigrationError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for MigrationError {
    #[track_caller]
    fn from(err: std::io::Error) -> MigrationError {
        MigrationError::wrap(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for MigrationError {
    #[track_caller]
    fn from(err: serde_json::Error) -> MigrationError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        MigrationError::wrap(kind, description, err)
    }
}

impl From<std::num::ParseIntError> for MigrationError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> MigrationError {
        MigrationError::wrap(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<chrono::ParseError> for MigrationError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> MigrationError {
        MigrationError::wrap(ErrorKind::ConversionError, "Datetime parsing failed", err)
    }
}

impl From<ValidationError> for MigrationError {
    #[track_caller]
    fn from(err: ValidationError) -> MigrationError {
        MigrationError::wrap(ErrorKind::ConfigError, "Invalid configuration", err)
    }
}

impl From<KeyError> for MigrationError {
    #[track_caller]
    fn from(err: KeyError) -> MigrationError {
        let kind = match err {
            KeyError::NotShared(_) => ErrorKind::SchemaMismatch,
            KeyError::Empty(_) | KeyError::UnknownColumn(_) | KeyError::NullableColumn(_) => {
                ErrorKind::InvalidUniqueKey
            }
        };

        MigrationError::wrap(kind, "Unique key cannot be used for the migration", err)
    }
}

impl From<PositionError> for MigrationError {
    #[track_caller]
    fn from(err: PositionError) -> MigrationError {
        MigrationError::wrap(ErrorKind::InvalidData, "Binlog position parsing failed", err)
    }
}

impl From<ProbeError> for MigrationError {
    #[track_caller]
    fn from(err: ProbeError) -> MigrationError {
        match err {
            ProbeError::Database(err) => err.into(),
            ProbeError::Position(err) => err.into(),
            err => MigrationError::wrap(ErrorKind::QueryFailed, "Server probe failed", err),
        }
    }
}

/// MySQL server error numbers with a dedicated classification.
mod mysql_errors {
    pub const TOO_MANY_CONNECTIONS: u16 = 1040;
    pub const BAD_FIELD: u16 = 1054;
    pub const NO_SUCH_TABLE: u16 = 1146;
    pub const LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const LOCK_DEADLOCK: u16 = 1213;
    pub const QUERY_INTERRUPTED: u16 = 1317;
    pub const ALTER_OPERATION_NOT_SUPPORTED: u16 = 1845;
    pub const ALTER_OPERATION_NOT_SUPPORTED_REASON: u16 = 1846;
    pub const QUERY_TIMEOUT: u16 = 3024;
    pub const SERVER_GONE: u16 = 2006;
    pub const SERVER_LOST: u16 = 2013;
}

/// Classifies a MySQL error number.
fn classify_mysql_error(number: u16) -> (ErrorKind, &'static str) {
    use mysql_errors::*;

    match number {
        LOCK_WAIT_TIMEOUT => (ErrorKind::LockWaitTimeout, "MySQL lock wait timeout"),
        LOCK_DEADLOCK => (ErrorKind::Deadlock, "MySQL deadlock detected"),
        SERVER_GONE | SERVER_LOST | TOO_MANY_CONNECTIONS => (
            ErrorKind::SourceConnectionFailed,
            "MySQL connection failed",
        ),
        QUERY_INTERRUPTED | QUERY_TIMEOUT => {
            (ErrorKind::OperationCanceled, "MySQL query interrupted")
        }
        NO_SUCH_TABLE | BAD_FIELD => (
            ErrorKind::SourceSchemaError,
            "MySQL schema object not found",
        ),
        ALTER_OPERATION_NOT_SUPPORTED | ALTER_OPERATION_NOT_SUPPORTED_REASON => (
            ErrorKind::InstantDdlRejected,
            "MySQL rejected the alteration algorithm",
        ),
        _ => (ErrorKind::QueryFailed, "MySQL query failed"),
    }
}

impl From<sqlx::Error> for MigrationError {
    #[track_caller]
    fn from(err: sqlx::Error) -> MigrationError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => {
                match db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    Some(mysql_err) => classify_mysql_error(mysql_err.number()),
                    None => (ErrorKind::QueryFailed, "Database operation failed"),
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => (
                ErrorKind::SourceConnectionFailed,
                "Database connection failed",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::ConversionError, "Database value decoding failed")
            }
            _ => (ErrorKind::QueryFailed, "Database operation failed"),
        };

        MigrationError::wrap(kind, description, err)
    }
}
