//! Readers and converter-driven enumeration. No transaction is opened here.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bulk::RowSource;
use crate::command::{Command, CommandBehavior};
use crate::connection::ConnectionManager;
use crate::driver::{ConnectionState, RowCursor};
use crate::error::{DbContextError, DriverError, FailurePhase};
use crate::shaping::{self, RecordCursor};
use crate::types::RowValues;

/// Forward-only reader that keeps its context's connection open.
///
/// The reader holds the context's connection mutably for as long as it lives,
/// so nothing else can run on that context until it is closed or dropped.
/// Closing applies the command's [`CommandBehavior`]: the physical connection
/// is closed unless the reader was opened inside a transaction.
pub struct DataReader<'c> {
    conn: &'c mut ConnectionManager,
    record: RecordCursor,
    behavior: CommandBehavior,
    closed: bool,
}

impl fmt::Debug for DataReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataReader")
            .field("record", &self.record)
            .field("behavior", &self.behavior)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DataReader<'_> {
    /// Advance to the next row.
    ///
    /// # Errors
    /// Returns `DriverError` if the reader is closed or the row cannot be fetched.
    pub fn read(&mut self) -> Result<bool, DriverError> {
        if self.closed {
            return Err(DriverError::Other("reader is closed".into()));
        }
        self.record.read()
    }

    /// Close the reader. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // A streaming cursor holds the connection until it is dropped.
        self.record.release();
        if self.behavior.close_connection {
            self.conn.close_quietly();
        }
        self.conn.detach();
        debug!(rows = self.record.rows_read(), "reader closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    /// State of the connection the reader is holding.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Best-effort cancel of the command behind this reader.
    pub fn cancel(&self) {
        self.conn.cancel();
    }
}

impl Deref for DataReader<'_> {
    type Target = RecordCursor;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl Drop for DataReader<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl RowSource for DataReader<'_> {
    fn columns(&self) -> Arc<Vec<String>> {
        self.record.shared_columns()
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, DriverError> {
        if self.read()? {
            Ok(self.record.current_row().map(|row| row.rows.clone()))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self) {
        DataReader::close(self);
    }
}

fn open_cursor(
    conn: &mut ConnectionManager,
    command: &Command,
) -> Result<Box<dyn RowCursor>, DriverError> {
    conn.acquire(true)?;
    conn.attach();
    debug!(
        sql = command.text(),
        timeout = command.timeout_secs(),
        sequential = command.behavior().sequential_access,
        "opening reader"
    );
    conn.driver_mut().open_cursor(command)
}

/// Execute `command` and hand back a live reader.
///
/// On failure the connection is released and the error wrapped; there is no
/// transaction to roll back.
pub(crate) fn open_reader<'c>(
    conn: &'c mut ConnectionManager,
    command: &Command,
) -> Result<DataReader<'c>, DbContextError> {
    match open_cursor(conn, command) {
        Ok(cursor) => Ok(DataReader {
            conn,
            record: RecordCursor::new(cursor),
            behavior: command.behavior(),
            closed: false,
        }),
        Err(err) => {
            warn!(sql = command.text(), error = %err, "reader failed to open");
            conn.release();
            Err(DbContextError::execution(FailurePhase::Plain, err))
        }
    }
}

/// Execute `command`, convert every row in order, then release the connection.
pub(crate) fn enumerate<T, F>(
    conn: &mut ConnectionManager,
    command: &Command,
    converter: F,
) -> Result<Vec<T>, DbContextError>
where
    F: FnMut(&RecordCursor) -> Result<T, DriverError>,
{
    let mut lease = conn.lease();
    let result = open_cursor(&mut lease, command).and_then(|cursor| {
        let mut record = RecordCursor::new(cursor);
        shaping::enumerable(&mut record, converter)
    });
    drop(lease);

    result.map_err(|err| {
        warn!(sql = command.text(), error = %err, "enumeration failed");
        DbContextError::execution(FailurePhase::Plain, err)
    })
}
