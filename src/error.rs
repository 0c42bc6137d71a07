use thiserror::Error;

const SQL_EXCEPTION_DEFAULT: &str =
    "An error occured when executing the SQL Statement. Check inner exception.";
const SQL_EXCEPTION_ROLLBACK_SUCCESS: &str =
    "An error occured when executing the SQL Statement. Rollback Success. Check inner exception.";
const SQL_EXCEPTION_ROLLBACK_FAIL: &str =
    "An error occured when executing the SQL Statement. Rollback Failed. Check inner exception.";
const SQL_EXCEPTION_BULK_COPY: &str =
    "An error occured when performing Sql Bulk Copy. Check inner exception.";

/// Errors reported by a [`Driver`](crate::driver::Driver) or by row conversion.
///
/// These never reach callers on their own; the context wraps them in
/// [`DbContextError::Execution`] together with the phase they failed in.
#[derive(Debug, Error)]
pub enum DriverError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u32),

    #[error("Command was cancelled")]
    Cancelled,

    #[error("Unsupported by this driver: {0}")]
    Unsupported(String),

    #[error("Type conversion error: {0}")]
    ConversionError(String),

    #[error("Invalid attempt to read when no data is present")]
    NoCurrentRow,

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Result set {0} was not returned by the statement")]
    MissingResultSet(usize),

    #[error("Row source error: {0}")]
    RowSourceError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

/// Where an execution failure happened, which decides the wrapping message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// No transaction was involved (reader, enumerable).
    Plain,
    /// The statement failed and its transaction was rolled back.
    RollbackSucceeded,
    /// The statement failed and the rollback failed too.
    RollbackFailed,
    /// The bulk copy path failed.
    BulkCopy,
}

impl FailurePhase {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            FailurePhase::Plain => SQL_EXCEPTION_DEFAULT,
            FailurePhase::RollbackSucceeded => SQL_EXCEPTION_ROLLBACK_SUCCESS,
            FailurePhase::RollbackFailed => SQL_EXCEPTION_ROLLBACK_FAIL,
            FailurePhase::BulkCopy => SQL_EXCEPTION_BULK_COPY,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbContextError {
    /// A precondition failed before any I/O took place.
    #[error("{argument} is not valid: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },

    /// The data engine reported a failure; `source` is the original cause.
    #[error("{}", .phase.message())]
    Execution {
        phase: FailurePhase,
        #[source]
        source: DriverError,
    },

    #[error("Unimplemented feature: {0}")]
    NotSupported(&'static str),
}

impl DbContextError {
    pub(crate) fn invalid(argument: &'static str, reason: impl Into<String>) -> Self {
        DbContextError::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(phase: FailurePhase, source: DriverError) -> Self {
        DbContextError::Execution { phase, source }
    }

    /// Phase of an execution failure, `None` for precondition and unsupported errors.
    #[must_use]
    pub fn phase(&self) -> Option<FailurePhase> {
        match self {
            DbContextError::Execution { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The original driver failure behind an execution error.
    #[must_use]
    pub fn cause(&self) -> Option<&DriverError> {
        match self {
            DbContextError::Execution { source, .. } => Some(source),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, DbContextError::InvalidArgument { .. })
    }
}
