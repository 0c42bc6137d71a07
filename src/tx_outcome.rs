use crate::error::{DbContextError, DriverError, FailurePhase};

/// How a transactional call ended.
///
/// `RollbackFailed` keeps the rollback's own error next to the original cause
/// so callers can inspect it, but [`into_result`](TxOutcome::into_result) only
/// ever surfaces the original cause.
#[derive(Debug)]
pub enum TxOutcome<T> {
    Committed(T),
    RolledBack(DriverError),
    RollbackFailed(DriverError, DriverError),
}

impl<T> TxOutcome<T> {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }

    /// The failure that triggered the rollback, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&DriverError> {
        match self {
            TxOutcome::Committed(_) => None,
            TxOutcome::RolledBack(cause) | TxOutcome::RollbackFailed(cause, _) => Some(cause),
        }
    }

    /// The rollback's own failure, if the rollback failed.
    #[must_use]
    pub fn rollback_error(&self) -> Option<&DriverError> {
        match self {
            TxOutcome::RollbackFailed(_, secondary) => Some(secondary),
            _ => None,
        }
    }

    /// # Errors
    /// `RolledBack` maps to a rollback-succeeded error and `RollbackFailed` to a
    /// rollback-failed error, both carrying the original cause.
    pub fn into_result(self) -> Result<T, DbContextError> {
        match self {
            TxOutcome::Committed(value) => Ok(value),
            TxOutcome::RolledBack(cause) => Err(DbContextError::execution(
                FailurePhase::RollbackSucceeded,
                cause,
            )),
            TxOutcome::RollbackFailed(cause, _secondary) => Err(DbContextError::execution(
                FailurePhase::RollbackFailed,
                cause,
            )),
        }
    }
}
