//! Begin / execute one statement / commit-or-rollback / release.

use tracing::{debug, warn};

use crate::command::Command;
use crate::connection::ConnectionManager;
use crate::driver::Driver;
use crate::error::DriverError;
use crate::tx_outcome::TxOutcome;

/// Run `op` as the single statement of a fresh transaction.
///
/// The connection is released when this returns, whatever the outcome, and
/// is left closed. Callers must check that no transaction is active first.
pub(crate) fn run_in_transaction<T, F>(
    conn: &mut ConnectionManager,
    command: &Command,
    op: F,
) -> TxOutcome<T>
where
    F: FnOnce(&mut dyn Driver, &Command) -> Result<T, DriverError>,
{
    let mut lease = conn.lease();

    let result = (|| -> Result<T, DriverError> {
        // BEGIN must run under this call's canceller.
        lease.acquire(true)?;
        lease.attach();
        lease.begin_transaction()?;
        debug!(sql = command.text(), timeout = command.timeout_secs(), "executing sql");
        let value = op(lease.driver_mut(), command)?;
        lease.commit_transaction()?;
        Ok(value)
    })();

    match result {
        Ok(value) => TxOutcome::Committed(value),
        Err(cause) => {
            warn!(sql = command.text(), error = %cause, "statement failed, rolling back");
            match lease.rollback_transaction() {
                Ok(()) => TxOutcome::RolledBack(cause),
                Err(secondary) => {
                    warn!(error = %secondary, "rollback failed");
                    TxOutcome::RollbackFailed(cause, secondary)
                }
            }
        }
    }
}
