//! Ownership of the single physical connection behind a context.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::driver::{Canceller, ConnectionState, Driver};
use crate::error::DriverError;

type AttachedCommand = Arc<Mutex<Option<Arc<dyn Canceller>>>>;

/// Owns one driver connection and the transaction flag that goes with it.
///
/// Not `Clone` and not `Sync`: a connection belongs to exactly one context.
pub struct ConnectionManager {
    driver: Box<dyn Driver>,
    in_transaction: bool,
    attached: AttachedCommand,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("driver", &self.driver.name())
            .field("state", &self.driver.state())
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(driver: Box<dyn Driver>) -> Self {
        Self {
            driver,
            in_transaction: false,
            attached: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.driver.state()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn driver_mut(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }

    /// Make the connection usable for the next command.
    ///
    /// A broken connection is force-closed first; a closed one is opened when
    /// `open_if_closed` is set.
    ///
    /// # Errors
    /// Returns `DriverError` if reopening fails.
    pub fn acquire(&mut self, open_if_closed: bool) -> Result<ConnectionState, DriverError> {
        if self.driver.state() == ConnectionState::Broken {
            debug!(driver = self.driver.name(), "closing broken connection before reuse");
            if let Err(err) = self.driver.close() {
                debug!(error = %err, "ignoring close failure on broken connection");
            }
            // A broken connection cannot still hold a live transaction.
            self.in_transaction = false;
        }
        if open_if_closed && self.driver.state() == ConnectionState::Closed {
            self.driver.open()?;
            debug!(driver = self.driver.name(), "connection opened");
        }
        Ok(self.driver.state())
    }

    /// # Errors
    /// Returns `DriverError` if the connection cannot be opened or the
    /// transaction cannot be started, or one is already active.
    pub fn begin_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            return Err(DriverError::ExecutionError(
                "a transaction is already active on this connection".into(),
            ));
        }
        self.acquire(true)?;
        self.driver.begin()?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit, then close the physical connection.
    ///
    /// # Errors
    /// Returns `DriverError` if no transaction is active or the commit fails.
    pub fn commit_transaction(&mut self) -> Result<(), DriverError> {
        if !self.in_transaction {
            return Err(DriverError::ExecutionError(
                "no transaction is active on this connection".into(),
            ));
        }
        self.driver.commit()?;
        self.in_transaction = false;
        self.close_quietly();
        Ok(())
    }

    /// Roll back the active transaction, then close the physical connection.
    ///
    /// The transaction flag is cleared even when the rollback fails: closing
    /// the connection ends the transaction on the server either way. Close
    /// failures are swallowed. With no active transaction only the close runs.
    ///
    /// # Errors
    /// Returns the rollback's own `DriverError`.
    pub fn rollback_transaction(&mut self) -> Result<(), DriverError> {
        let result = if self.in_transaction {
            self.driver.rollback()
        } else {
            Ok(())
        };
        self.in_transaction = false;
        self.close_quietly();
        result
    }

    /// End of every call: close unless a transaction is still open, and
    /// detach the command.
    pub fn release(&mut self) {
        if !self.in_transaction {
            self.close_quietly();
        }
        self.detach();
    }

    pub(crate) fn close_quietly(&mut self) {
        if let Err(err) = self.driver.close() {
            debug!(driver = self.driver.name(), error = %err, "ignoring close failure");
        }
    }

    /// Register the driver's canceller as the current command's.
    pub(crate) fn attach(&mut self) {
        let canceller = self.driver.canceller();
        *self.attached.lock().unwrap_or_else(PoisonError::into_inner) = canceller;
    }

    pub(crate) fn detach(&mut self) {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Best-effort cancel of the attached command. Never fails.
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            attached: Arc::clone(&self.attached),
        }
    }

    /// Scope guard that runs [`release`](Self::release) when dropped.
    pub(crate) fn lease(&mut self) -> ConnectionLease<'_> {
        ConnectionLease { conn: self }
    }
}

/// Cancels whichever command is attached to a context when it fires.
///
/// Cheap to clone and safe to trigger from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    attached: AttachedCommand,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

impl CancelHandle {
    /// Request cancellation. Failures are logged and swallowed.
    pub fn cancel(&self) {
        let mut slot = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(canceller) = slot.as_ref() else {
            return;
        };
        match canceller.cancel() {
            Ok(()) => {
                slot.take();
            }
            Err(err) => debug!(error = %err, "ignoring cancellation failure"),
        }
    }

    /// Whether a command is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

pub(crate) struct ConnectionLease<'a> {
    conn: &'a mut ConnectionManager,
}

impl Deref for ConnectionLease<'_> {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl DerefMut for ConnectionLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() && self.conn.in_transaction {
            warn!("rolling back transaction while unwinding");
            let _ = self.conn.rollback_transaction();
        }
        self.conn.release();
    }
}
