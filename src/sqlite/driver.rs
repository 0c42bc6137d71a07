use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, InterruptHandle};
use tracing::{debug, warn};

use super::stream::{self, LentConnection, StreamingCursor};
use super::{bulk, query};
use crate::bulk::{BulkPlan, RowSource};
use crate::command::{Command, CommandKind};
use crate::config::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::driver::{BufferedCursor, Canceller, ConnectionState, Driver, RowCursor};
use crate::error::DriverError;
use crate::results::ResultSet;

const ROLLBACK_BUSY_RETRIES: &[Duration] = &[
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(50),
];

/// SQLite's longest busy timeout, used when a bulk copy asks for no limit.
const UNLIMITED_BUSY_TIMEOUT: Duration = Duration::from_millis(2_147_483_647);

/// File-backed `SQLite` connection.
///
/// The command timeout is applied as the connection's busy timeout; a command
/// that waits on a lock longer than that fails with `DriverError::Timeout`.
///
/// A sequential-access cursor lends the connection to a reader thread that
/// steps the statement as rows are read. The connection comes back before the
/// driver does anything else.
pub struct SqliteDriver {
    db_path: String,
    conn: Option<Connection>,
    lent: Option<LentConnection>,
    broken: bool,
}

impl fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("db_path", &self.db_path)
            .field("state", &self.state())
            .finish()
    }
}

impl SqliteDriver {
    /// No connection is opened until the first command.
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: None,
            lent: None,
            broken: false,
        }
    }

    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Take the connection back from a finished or abandoned reader thread.
    fn reclaim(&mut self) {
        let Some(lent) = self.lent.take() else {
            return;
        };
        match lent.reclaim() {
            Some(conn) => self.conn = Some(conn),
            None => {
                warn!(db_path = %self.db_path, "SQLite reader thread panicked, connection lost");
                self.broken = true;
            }
        }
    }

    fn conn(&mut self) -> Result<&Connection, DriverError> {
        self.reclaim();
        if self.broken {
            return Err(DriverError::ConnectionError("SQLite connection is broken".into()));
        }
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionError("SQLite connection is not open".into()))
    }

    /// The connection, configured for a command with the given timeout.
    /// A timeout of zero waits on locks without limit.
    fn prepared_conn(&mut self, timeout_secs: u32) -> Result<&Connection, DriverError> {
        let conn = self.conn()?;
        let busy = match timeout_secs {
            0 => UNLIMITED_BUSY_TIMEOUT,
            secs => Duration::from_secs(u64::from(secs)),
        };
        conn.busy_timeout(busy)?;
        Ok(conn)
    }

    fn open_streaming_cursor(&mut self, command: &Command) -> Result<Box<dyn RowCursor>, DriverError> {
        reject_procedure(command)?;
        let timeout = command.timeout_secs();
        self.prepared_conn(timeout)?;
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DriverError::ConnectionError("SQLite connection is not open".into()))?;
        let (rows, lent) = stream::spawn(
            conn,
            command.text().to_string(),
            command.parameters().to_vec(),
            timeout,
        )
        .inspect_err(|_| self.broken = true)?;
        self.lent = Some(lent);
        match StreamingCursor::start(rows) {
            Ok(cursor) => Ok(Box::new(cursor)),
            Err(err) => {
                self.reclaim();
                Err(err)
            }
        }
    }

    fn rollback_with_busy_retries(conn: &Connection) -> Result<(), DriverError> {
        for (idx, delay) in ROLLBACK_BUSY_RETRIES.iter().copied().enumerate() {
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => return Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::DatabaseBusy
                        && idx + 1 < ROLLBACK_BUSY_RETRIES.len() =>
                {
                    thread::sleep(delay);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(DriverError::ExecutionError("rollback retries exhausted".into()))
    }
}

/// Map engine interrupts and lock waits onto the driver-neutral errors.
pub(super) fn classify(err: DriverError, timeout_secs: u32) -> DriverError {
    let code = match &err {
        DriverError::SqliteError(rusqlite::Error::SqliteFailure(failure, _)) => Some(failure.code),
        _ => None,
    };
    match code {
        Some(ErrorCode::OperationInterrupted) => DriverError::Cancelled,
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            DriverError::Timeout(timeout_secs)
        }
        _ => err,
    }
}

fn reject_procedure(command: &Command) -> Result<(), DriverError> {
    match command.kind() {
        CommandKind::Text => Ok(()),
        CommandKind::StoredProcedure => Err(DriverError::Unsupported(format!(
            "SQLite has no stored procedures ({})",
            command.text()
        ))),
    }
}

struct SqliteCanceller(InterruptHandle);

impl Canceller for SqliteCanceller {
    fn cancel(&self) -> Result<(), DriverError> {
        self.0.interrupt();
        Ok(())
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn state(&self) -> ConnectionState {
        match (&self.conn, self.broken) {
            (_, true) => ConnectionState::Broken,
            (Some(_), false) => ConnectionState::Open,
            (None, false) if self.lent.is_some() => ConnectionState::Open,
            (None, false) => ConnectionState::Closed,
        }
    }

    fn open(&mut self) -> Result<(), DriverError> {
        self.reclaim();
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        self.conn = Some(conn);
        self.broken = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.reclaim();
        self.broken = false;
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| DriverError::from(err)),
            None => Ok(()),
        }
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let result = Self::rollback_with_busy_retries(self.conn()?);
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn query(&mut self, command: &Command) -> Result<Vec<ResultSet>, DriverError> {
        reject_procedure(command)?;
        let timeout = command.timeout_secs();
        let conn = self.prepared_conn(timeout)?;
        query::run_batch(conn, command.text(), command.parameters())
            .map_err(|err| classify(err, timeout))
    }

    fn execute(&mut self, command: &Command) -> Result<usize, DriverError> {
        let results = self.query(command)?;
        Ok(results
            .iter()
            .filter(|set| !set.has_columns())
            .map(|set| set.rows_affected)
            .sum())
    }

    fn open_cursor(&mut self, command: &Command) -> Result<Box<dyn RowCursor>, DriverError> {
        if command.behavior().sequential_access {
            return self.open_streaming_cursor(command);
        }
        let results = self.query(command)?;
        Ok(Box::new(BufferedCursor::first_row_set(results)))
    }

    fn bulk_copy(
        &mut self,
        plan: &BulkPlan,
        source: &mut dyn RowSource,
    ) -> Result<u64, DriverError> {
        let timeout = plan.timeout_secs().unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
        let conn = self.prepared_conn(timeout)?;
        let copied = bulk::copy_rows(conn, plan, source).map_err(|err| classify(err, timeout))?;
        debug!(table = plan.destination(), rows = copied, "sqlite bulk copy complete");
        Ok(copied)
    }

    fn canceller(&mut self) -> Option<Arc<dyn Canceller>> {
        self.reclaim();
        self.conn
            .as_ref()
            .map(|conn| Arc::new(SqliteCanceller(conn.get_interrupt_handle())) as Arc<dyn Canceller>)
    }
}
