use std::collections::HashMap;
use std::sync::Arc;

use super::row::{CustomDbRow, index_columns};
use crate::types::RowValues;

/// A fully materialized table returned by a query.
///
/// Rows share one column-name list and one name-to-index map.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// Rows affected by DML, or rows read for a SELECT
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index_cache: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// Create a new result set with a known capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Result set for a statement that returned no rows, only a count.
    #[must_use]
    pub fn affected(rows_affected: usize) -> ResultSet {
        ResultSet {
            rows_affected,
            ..ResultSet::default()
        }
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index_cache = Some(index_columns(&column_names));
        self.column_names = Some(column_names);
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row to the result set
    ///
    /// Ignored until column names have been set.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(column_names), Some(cache)) = (&self.column_names, &self.column_index_cache) {
            self.results.push(CustomDbRow::with_cache(
                Arc::clone(column_names),
                Arc::clone(cache),
                row_values,
            ));
            self.rows_affected += 1;
        }
    }

    /// Add a prebuilt row to the result set
    pub fn add_row(&mut self, row: CustomDbRow) {
        if self.column_names.is_none() {
            self.column_index_cache = Some(Arc::clone(&row.column_index_cache));
            self.column_names = Some(Arc::clone(&row.column_names));
        }

        self.results.push(row);
        self.rows_affected += 1;
    }

    /// Whether the statement produced a row set at all (as opposed to DML only).
    #[must_use]
    pub fn has_columns(&self) -> bool {
        self.column_names.as_ref().is_some_and(|c| !c.is_empty())
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.results.len()
    }

    /// First column of the first row, the "scalar" of the table.
    #[must_use]
    pub fn first_cell(&self) -> Option<&RowValues> {
        self.results.first().and_then(|row| row.get_by_index(0))
    }
}

/// Every table produced by one command, in order.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    pub tables: Vec<ResultSet>,
}

impl DataSet {
    #[must_use]
    pub fn new(tables: Vec<ResultSet>) -> Self {
        Self { tables }
    }

    #[must_use]
    pub fn table(&self, index: usize) -> Option<&ResultSet> {
        self.tables.get(index)
    }

    /// Remove and return the table at `index`.
    #[must_use]
    pub fn take_table(mut self, index: usize) -> Option<ResultSet> {
        if index < self.tables.len() {
            Some(self.tables.swap_remove(index))
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
