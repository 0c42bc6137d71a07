//! Turning raw results into tables, scalars, objects and sequences.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::conversion::FromRowValue;
use crate::driver::{BufferedCursor, RowCursor};
use crate::error::DriverError;
use crate::results::{CustomDbRow, DataSet, ResultSet, index_columns};
use crate::types::RowValues;

/// Position of a cursor plus typed access to the row it is on.
///
/// Row converters receive a `&RecordCursor`. Before the first successful
/// [`read`](RecordCursor::read) (or after the last) there is no current row
/// and every accessor returns [`DriverError::NoCurrentRow`].
pub struct RecordCursor {
    cursor: Box<dyn RowCursor>,
    columns: Arc<Vec<String>>,
    column_index_cache: Arc<HashMap<String, usize>>,
    current: Option<CustomDbRow>,
    rows_read: usize,
}

impl fmt::Debug for RecordCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCursor")
            .field("columns", &self.columns)
            .field("current", &self.current)
            .field("rows_read", &self.rows_read)
            .finish_non_exhaustive()
    }
}

impl RecordCursor {
    #[must_use]
    pub fn new(cursor: Box<dyn RowCursor>) -> Self {
        let columns = cursor.columns();
        let column_index_cache = index_columns(&columns);
        Self {
            cursor,
            columns,
            column_index_cache,
            current: None,
            rows_read: 0,
        }
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    ///
    /// # Errors
    /// Returns `DriverError` if the driver fails to fetch the row.
    pub fn read(&mut self) -> Result<bool, DriverError> {
        match self.cursor.next_row()? {
            Some(values) => {
                self.current = Some(CustomDbRow::with_cache(
                    Arc::clone(&self.columns),
                    Arc::clone(&self.column_index_cache),
                    values,
                ));
                self.rows_read += 1;
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Drop the driver cursor. Later reads report no more rows.
    pub(crate) fn release(&mut self) {
        self.cursor = Box::new(BufferedCursor::default());
        self.current = None;
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub(crate) fn shared_columns(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.columns)
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn has_row(&self) -> bool {
        self.current.is_some()
    }

    /// Rows read so far.
    #[must_use]
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    #[must_use]
    pub fn current_row(&self) -> Option<&CustomDbRow> {
        self.current.as_ref()
    }

    /// # Errors
    /// `NoCurrentRow` when not positioned on a row, `ColumnNotFound` for an
    /// unknown column.
    pub fn get(&self, column_name: &str) -> Result<&RowValues, DriverError> {
        self.row()?
            .get(column_name)
            .ok_or_else(|| DriverError::ColumnNotFound(column_name.to_string()))
    }

    /// # Errors
    /// `NoCurrentRow` when not positioned on a row, `ColumnNotFound` for an
    /// out-of-range ordinal.
    pub fn get_by_index(&self, index: usize) -> Result<&RowValues, DriverError> {
        self.row()?
            .get_by_index(index)
            .ok_or_else(|| DriverError::ColumnNotFound(format!("#{index}")))
    }

    /// # Errors
    /// As [`get`](Self::get), plus `ConversionError` when the cast fails.
    pub fn get_as<T: FromRowValue>(&self, column_name: &str) -> Result<T, DriverError> {
        self.row()?.get_as(column_name)
    }

    /// # Errors
    /// As [`get_by_index`](Self::get_by_index), plus `ConversionError` when the cast fails.
    pub fn get_as_by_index<T: FromRowValue>(&self, index: usize) -> Result<T, DriverError> {
        self.row()?.get_as_by_index(index)
    }

    fn row(&self) -> Result<&CustomDbRow, DriverError> {
        self.current.as_ref().ok_or(DriverError::NoCurrentRow)
    }
}

/// First column of the first row; `Null` when there is no row.
///
/// # Errors
/// Returns `DriverError` if the first row cannot be fetched.
pub fn scalar(cursor: &mut RecordCursor) -> Result<RowValues, DriverError> {
    if cursor.read()? {
        Ok(cursor.get_by_index(0).cloned().unwrap_or(RowValues::Null))
    } else {
        Ok(RowValues::Null)
    }
}

/// Advance exactly one row and hand the cursor to `converter`.
///
/// The converter runs even when the result is empty; it then sees a cursor
/// with no current row and decides for itself what that means.
///
/// # Errors
/// Returns the fetch error or whatever the converter returns.
pub fn object<T, F>(cursor: &mut RecordCursor, converter: F) -> Result<T, DriverError>
where
    F: FnOnce(&RecordCursor) -> Result<T, DriverError>,
{
    cursor.read()?;
    converter(cursor)
}

/// Convert every remaining row, in order.
///
/// # Errors
/// Stops at the first fetch or converter error.
pub fn enumerable<T, F>(cursor: &mut RecordCursor, mut converter: F) -> Result<Vec<T>, DriverError>
where
    F: FnMut(&RecordCursor) -> Result<T, DriverError>,
{
    let mut out = Vec::new();
    while cursor.read()? {
        out.push(converter(cursor)?);
    }
    Ok(out)
}

/// Every row set produced by a command, skipping DML-only results.
#[must_use]
pub fn data_set(results: Vec<ResultSet>) -> DataSet {
    DataSet::new(results.into_iter().filter(ResultSet::has_columns).collect())
}

/// The first row set, or an empty table when the command returned none.
#[must_use]
pub fn table(results: Vec<ResultSet>) -> ResultSet {
    data_set(results).take_table(0).unwrap_or_default()
}

/// The row set at `index`.
///
/// # Errors
/// Returns `DriverError::MissingResultSet` when the command produced fewer sets.
pub fn nth_table(results: Vec<ResultSet>, index: usize) -> Result<ResultSet, DriverError> {
    data_set(results)
        .take_table(index)
        .ok_or(DriverError::MissingResultSet(index))
}
