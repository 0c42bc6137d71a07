use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Connection};

use super::driver::classify;
use super::params::ParamBinder;
use super::query::{build_result_set, sqlite_extract_value_sync};
use crate::driver::RowCursor;
use crate::error::DriverError;
use crate::parameter::Parameter;
use crate::types::RowValues;

/// Rows the reader thread may fetch ahead of the consumer.
const READ_AHEAD: usize = 16;

pub(crate) enum Fetched {
    Columns(Arc<Vec<String>>),
    Row(Vec<RowValues>),
    Failed(DriverError),
}

/// A connection lent to a reader thread for the life of one sequential cursor.
pub(crate) struct LentConnection(JoinHandle<Connection>);

impl LentConnection {
    /// Wait for the reader thread and take the connection back.
    ///
    /// The thread stops before its next row once the cursor is dropped.
    /// `None` when the thread panicked and the connection went with it.
    pub(crate) fn reclaim(self) -> Option<Connection> {
        self.0.join().ok()
    }
}

/// Move `conn` to a reader thread that runs `sql` and feeds the first row set
/// through a bounded channel, one row at a time.
///
/// Statements before the first row set run to completion; statements after it
/// run once the rows are exhausted, unless the cursor was dropped first.
///
/// # Errors
/// Returns `DriverError::ConnectionError` if the thread cannot be started. The
/// connection is lost in that case.
pub(crate) fn spawn(
    conn: Connection,
    sql: String,
    params: Vec<Parameter>,
    timeout_secs: u32,
) -> Result<(Receiver<Fetched>, LentConnection), DriverError> {
    let (sink, rows) = mpsc::sync_channel(READ_AHEAD);
    let handle = thread::Builder::new()
        .name("sqlite-reader".into())
        .spawn(move || {
            if let Err(err) = stream_rows(&conn, &sql, &params, &sink) {
                let _ = sink.send(Fetched::Failed(classify(err, timeout_secs)));
            }
            conn
        })
        .map_err(|err| {
            DriverError::ConnectionError(format!("failed to spawn SQLite reader thread: {err}"))
        })?;
    Ok((rows, LentConnection(handle)))
}

fn stream_rows(
    conn: &Connection,
    sql: &str,
    params: &[Parameter],
    sink: &SyncSender<Fetched>,
) -> Result<(), DriverError> {
    let mut binder = ParamBinder::new(params);
    let mut batch = Batch::new(conn, sql);
    let mut streamed = false;
    while let Some(mut stmt) = batch.next()? {
        binder.bind(&mut stmt)?;
        if streamed || stmt.column_count() == 0 {
            build_result_set(&mut stmt)?;
            continue;
        }
        streamed = true;

        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(ToString::to_string)
            .collect();
        let width = columns.len();
        if sink.send(Fetched::Columns(Arc::new(columns))).is_err() {
            return Ok(());
        }
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let values = (0..width)
                .map(|i| sqlite_extract_value_sync(row, i))
                .collect::<Result<Vec<_>, _>>()?;
            // A send error means the cursor is gone.
            if sink.send(Fetched::Row(values)).is_err() {
                return Ok(());
            }
        }
    }
    if !streamed {
        let _ = sink.send(Fetched::Columns(Arc::default()));
    }
    Ok(())
}

/// Cursor fed by the reader thread.
pub(crate) struct StreamingCursor {
    columns: Arc<Vec<String>>,
    rows: Receiver<Fetched>,
    done: bool,
}

impl StreamingCursor {
    /// Wait for the reader thread to describe the first row set.
    ///
    /// # Errors
    /// Returns the statement's own error when it fails before producing rows.
    pub(crate) fn start(rows: Receiver<Fetched>) -> Result<Self, DriverError> {
        match rows.recv() {
            Ok(Fetched::Columns(columns)) => Ok(Self {
                columns,
                rows,
                done: false,
            }),
            Ok(Fetched::Failed(err)) => Err(err),
            Ok(Fetched::Row(_)) => Err(DriverError::Other(
                "SQLite reader sent rows before columns".into(),
            )),
            Err(_) => Err(DriverError::ConnectionError(
                "SQLite reader thread stopped unexpectedly".into(),
            )),
        }
    }
}

impl RowCursor for StreamingCursor {
    fn columns(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.columns)
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, DriverError> {
        if self.done {
            return Ok(None);
        }
        match self.rows.recv() {
            Ok(Fetched::Row(values)) => Ok(Some(values)),
            Ok(Fetched::Failed(err)) => {
                self.done = true;
                Err(err)
            }
            Ok(Fetched::Columns(_)) | Err(_) => {
                self.done = true;
                Ok(None)
            }
        }
    }
}
