//! Bulk load of a row source into a destination table.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::error::{DbContextError, DriverError, FailurePhase};
use crate::results::ResultSet;
use crate::types::RowValues;

/// Source column to destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub destination: String,
}

impl ColumnMapping {
    #[must_use]
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Settings for one bulk copy.
///
/// `batch_size`, `timeout` and `enable_streaming` are only applied when set;
/// otherwise the driver's own defaults are used. A batch size of zero writes
/// everything as one batch and a timeout of zero means no limit. Without any
/// mappings, source columns go to destination columns by ordinal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCopyConfig {
    pub destination_table: String,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub enable_streaming: Option<bool>,
}

impl BulkCopyConfig {
    #[must_use]
    pub fn new(destination_table: impl Into<String>) -> Self {
        Self {
            destination_table: destination_table.into(),
            ..Self::default()
        }
    }

    /// Append a mapping. Mappings are applied in the order they were added.
    #[must_use]
    pub fn map(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.column_mappings
            .push(ColumnMapping::new(source, destination));
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    #[must_use]
    pub fn timeout(mut self, secs: u32) -> Self {
        self.timeout = Some(secs);
        self
    }

    #[must_use]
    pub fn enable_streaming(mut self, enable: bool) -> Self {
        self.enable_streaming = Some(enable);
        self
    }
}

/// Forward-only rows feeding a bulk copy.
///
/// A [`DataReader`](crate::DataReader) from another context is a row source,
/// as is any materialized [`ResultSet`] via [`VecRowSource`].
pub trait RowSource {
    fn columns(&self) -> Arc<Vec<String>>;

    /// # Errors
    /// Returns `DriverError` if the next row cannot be produced.
    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, DriverError>;

    /// Release whatever the source holds. Called exactly once by the loader.
    fn close(&mut self) {}
}

/// In-memory row source.
#[derive(Debug, Clone, Default)]
pub struct VecRowSource {
    columns: Arc<Vec<String>>,
    rows: VecDeque<Vec<RowValues>>,
    closed: bool,
}

impl VecRowSource {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<RowValues>>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows: rows.into(),
            closed: false,
        }
    }

    /// Pull every remaining row out of `source`.
    ///
    /// # Errors
    /// Returns the first error `source` reports.
    pub fn drain(source: &mut dyn RowSource) -> Result<Self, DriverError> {
        let columns = source.columns();
        let mut rows = VecDeque::new();
        while let Some(row) = source.next_row()? {
            rows.push_back(row);
        }
        Ok(Self {
            columns,
            rows,
            closed: false,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Rows not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl From<ResultSet> for VecRowSource {
    fn from(set: ResultSet) -> Self {
        let columns = set.get_column_names().cloned().unwrap_or_default();
        Self {
            columns,
            rows: set.results.into_iter().map(|row| row.rows).collect(),
            closed: false,
        }
    }
}

impl RowSource for VecRowSource {
    fn columns(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.columns)
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, DriverError> {
        if self.closed {
            return Err(DriverError::RowSourceError("row source is closed".into()));
        }
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
        self.closed = true;
    }
}

/// A mapping resolved against the source's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    pub source_index: usize,
    pub source: String,
    pub destination: String,
}

/// Validated bulk copy handed to a driver.
#[derive(Debug, Clone)]
pub struct BulkPlan {
    destination: String,
    columns: Vec<MappedColumn>,
    by_ordinal: bool,
    batch_size: Option<u32>,
    timeout_secs: Option<u32>,
    streaming: Option<bool>,
}

impl BulkPlan {
    /// Check `config` against the source's columns.
    ///
    /// With no mappings every source column is copied, the n-th source column
    /// into the n-th destination column.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` when a column name is blank
    /// or a source column does not exist.
    pub fn resolve(config: &BulkCopyConfig, source_columns: &[String]) -> Result<Self, DbContextError> {
        if config.column_mappings.is_empty() {
            let columns = source_columns
                .iter()
                .enumerate()
                .map(|(source_index, name)| MappedColumn {
                    source_index,
                    source: name.clone(),
                    destination: name.clone(),
                })
                .collect();
            return Ok(Self::new(config, columns, true));
        }

        let mut columns = Vec::with_capacity(config.column_mappings.len());
        for mapping in &config.column_mappings {
            if mapping.source.trim().is_empty() || mapping.destination.trim().is_empty() {
                return Err(DbContextError::invalid(
                    "columnMappings",
                    "column names cannot be blank",
                ));
            }
            let source_index = source_columns
                .iter()
                .position(|c| c == &mapping.source)
                .or_else(|| {
                    source_columns
                        .iter()
                        .position(|c| c.eq_ignore_ascii_case(&mapping.source))
                })
                .ok_or_else(|| {
                    DbContextError::invalid(
                        "columnMappings",
                        format!("source column '{}' is not in the row source", mapping.source),
                    )
                })?;
            columns.push(MappedColumn {
                source_index,
                source: mapping.source.clone(),
                destination: mapping.destination.clone(),
            });
        }

        Ok(Self::new(config, columns, false))
    }

    fn new(config: &BulkCopyConfig, columns: Vec<MappedColumn>, by_ordinal: bool) -> Self {
        Self {
            destination: config.destination_table.trim().to_string(),
            columns,
            by_ordinal,
            batch_size: config.batch_size,
            timeout_secs: config.timeout,
            streaming: config.enable_streaming,
        }
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub fn columns(&self) -> &[MappedColumn] {
        &self.columns
    }

    /// Whether columns are matched by position rather than by name.
    #[must_use]
    pub fn maps_by_ordinal(&self) -> bool {
        self.by_ordinal
    }

    /// Destination column names, in mapping order. Meaningless when
    /// [`maps_by_ordinal`](Self::maps_by_ordinal) is set.
    pub fn destination_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.destination.as_str())
    }

    /// Rows per batch; zero or unset means a single batch.
    #[must_use]
    pub fn batch_size(&self) -> Option<u32> {
        self.batch_size
    }

    /// Seconds; zero means no limit.
    #[must_use]
    pub fn timeout_secs(&self) -> Option<u32> {
        self.timeout_secs
    }

    #[must_use]
    pub fn streaming(&self) -> Option<bool> {
        self.streaming
    }

    /// The mapped values of `row`, in mapping order.
    ///
    /// # Errors
    /// Returns `DriverError::RowSourceError` when the row is shorter than the
    /// source's column list.
    pub fn project(&self, row: &[RowValues]) -> Result<Vec<RowValues>, DriverError> {
        self.columns
            .iter()
            .map(|c| {
                row.get(c.source_index).cloned().ok_or_else(|| {
                    DriverError::RowSourceError(format!(
                        "row has {} values, column '{}' is #{}",
                        row.len(),
                        c.source,
                        c.source_index
                    ))
                })
            })
            .collect()
    }
}

/// Copy every row of `source` into `config.destination_table`.
///
/// No transaction brackets the copy. Once the destination has been checked the
/// source is closed and the connection released on every path.
pub(crate) fn bulk_copy(
    conn: &mut ConnectionManager,
    source: &mut dyn RowSource,
    config: &BulkCopyConfig,
) -> Result<u64, DbContextError> {
    if config.destination_table.trim().is_empty() {
        return Err(DbContextError::invalid(
            "destinationTableName",
            "destinationTableName cannot be empty",
        ));
    }

    let plan = match BulkPlan::resolve(config, &source.columns()) {
        Ok(plan) => plan,
        Err(err) => {
            source.close();
            return Err(err);
        }
    };

    let mut lease = conn.lease();
    let result = (|| -> Result<u64, DriverError> {
        lease.acquire(true)?;
        lease.attach();
        debug!(
            table = plan.destination(),
            columns = plan.columns().len(),
            batch_size = ?plan.batch_size(),
            streaming = ?plan.streaming(),
            "starting bulk copy"
        );
        if plan.streaming() == Some(false) {
            let mut buffered = VecRowSource::drain(source)?;
            lease.driver_mut().bulk_copy(&plan, &mut buffered)
        } else {
            lease.driver_mut().bulk_copy(&plan, source)
        }
    })();
    source.close();
    drop(lease);

    match result {
        Ok(rows) => {
            debug!(table = plan.destination(), rows, "bulk copy finished");
            Ok(rows)
        }
        Err(err) => {
            warn!(table = plan.destination(), error = %err, "bulk copy failed");
            Err(DbContextError::execution(FailurePhase::BulkCopy, err))
        }
    }
}
