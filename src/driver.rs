//! The seam between the context and a concrete database engine.
//!
//! A [`Driver`] owns exactly one physical connection. The context decides
//! when to open, begin, commit, roll back and close; the driver only carries
//! those instructions out.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::bulk::{BulkPlan, RowSource};
use crate::command::Command;
use crate::error::DriverError;
use crate::results::ResultSet;
use crate::types::RowValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    Broken,
}

/// Rows of one result set, read forward only.
pub trait RowCursor: Send {
    fn columns(&self) -> Arc<Vec<String>>;

    /// # Errors
    /// Returns `DriverError` if the next row cannot be fetched.
    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, DriverError>;
}

/// Best-effort cancellation of whatever the driver is currently running.
pub trait Canceller: Send + Sync {
    /// # Errors
    /// Returns `DriverError` if the cancel request could not be delivered.
    fn cancel(&self) -> Result<(), DriverError>;
}

pub trait Driver: Send {
    /// Short engine name for log events.
    fn name(&self) -> &'static str;

    fn state(&self) -> ConnectionState;

    /// # Errors
    /// Returns `DriverError` if the connection cannot be established.
    fn open(&mut self) -> Result<(), DriverError>;

    /// Close the physical connection. Closing a closed connection is a no-op.
    ///
    /// # Errors
    /// Returns `DriverError` if the engine reports a failure while closing.
    fn close(&mut self) -> Result<(), DriverError>;

    /// # Errors
    /// Returns `DriverError` if the transaction cannot be started.
    fn begin(&mut self) -> Result<(), DriverError>;

    /// # Errors
    /// Returns `DriverError` if the commit fails.
    fn commit(&mut self) -> Result<(), DriverError>;

    /// # Errors
    /// Returns `DriverError` if the rollback fails.
    fn rollback(&mut self) -> Result<(), DriverError>;

    /// Run the command and return every result it produced, in order.
    /// Statements that produce no row set yield [`ResultSet::affected`].
    ///
    /// # Errors
    /// Returns `DriverError` on any engine failure.
    fn query(&mut self, command: &Command) -> Result<Vec<ResultSet>, DriverError>;

    /// Run the command for its side effects and return rows affected.
    ///
    /// # Errors
    /// Returns `DriverError` on any engine failure.
    fn execute(&mut self, command: &Command) -> Result<usize, DriverError>;

    /// Run the command and hand back a cursor over its first row set.
    ///
    /// # Errors
    /// Returns `DriverError` on any engine failure.
    fn open_cursor(&mut self, command: &Command) -> Result<Box<dyn RowCursor>, DriverError>;

    /// Write every row of `source` into the plan's destination table.
    ///
    /// # Errors
    /// Returns `DriverError` if reading the source or writing a batch fails.
    fn bulk_copy(&mut self, plan: &BulkPlan, source: &mut dyn RowSource)
    -> Result<u64, DriverError>;

    /// Handle able to cancel the command about to run on this connection.
    fn canceller(&mut self) -> Option<Arc<dyn Canceller>>;
}

/// Cursor over rows that were already fetched.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    columns: Arc<Vec<String>>,
    rows: VecDeque<Vec<RowValues>>,
}

impl BufferedCursor {
    #[must_use]
    pub fn new(columns: Arc<Vec<String>>, rows: Vec<Vec<RowValues>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    /// Cursor over the first row set in `sets`, or an empty cursor.
    #[must_use]
    pub fn first_row_set(sets: Vec<ResultSet>) -> Self {
        sets.into_iter()
            .find(ResultSet::has_columns)
            .map(Self::from)
            .unwrap_or_default()
    }
}

impl From<ResultSet> for BufferedCursor {
    fn from(set: ResultSet) -> Self {
        let columns = set.get_column_names().cloned().unwrap_or_default();
        let rows = set.results.into_iter().map(|row| row.rows).collect();
        Self::new(columns, rows)
    }
}

impl RowCursor for BufferedCursor {
    fn columns(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.columns)
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, DriverError> {
        Ok(self.rows.pop_front())
    }
}
