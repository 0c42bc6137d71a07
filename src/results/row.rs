use std::collections::HashMap;
use std::sync::Arc;

use crate::conversion::FromRowValue;
use crate::error::DriverError;
use crate::types::RowValues;

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    // Column name -> index, shared with every row of the same result set
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

pub(crate) fn index_columns(column_names: &[String]) -> Arc<HashMap<String, usize>> {
    Arc::new(
        column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect(),
    )
}

impl CustomDbRow {
    /// Create a new database row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `rows` - The values for this row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = index_columns(&column_names);
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    pub(crate) fn with_cache(
        column_names: Arc<Vec<String>>,
        column_index_cache: Arc<HashMap<String, usize>>,
        rows: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            rows,
            column_index_cache,
        }
    }

    /// Get the index of a column by name
    ///
    /// Exact matches win; otherwise the first case-insensitive match is used.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }

        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// Typed access by column name.
    ///
    /// # Errors
    /// Returns `DriverError::ColumnNotFound` for unknown columns and
    /// `DriverError::ConversionError` when the value cannot be cast.
    pub fn get_as<T: FromRowValue>(&self, column_name: &str) -> Result<T, DriverError> {
        let value = self
            .get(column_name)
            .ok_or_else(|| DriverError::ColumnNotFound(column_name.to_string()))?;
        T::from_row_value(value)
    }

    /// Typed access by ordinal.
    ///
    /// # Errors
    /// Returns `DriverError::ColumnNotFound` for an out-of-range index and
    /// `DriverError::ConversionError` when the value cannot be cast.
    pub fn get_as_by_index<T: FromRowValue>(&self, index: usize) -> Result<T, DriverError> {
        let value = self
            .get_by_index(index)
            .ok_or_else(|| DriverError::ColumnNotFound(format!("#{index}")))?;
        T::from_row_value(value)
    }

    /// Number of values in this row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
