use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::TryStreamExt;
use tiberius::numeric::Numeric;
use tiberius::{QueryItem, QueryStream, Uuid};

use super::client::MssqlClient;
use super::params::bind_query_params;
use crate::command::Command;
use crate::error::DriverError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Run `command` and collect every row set it returns, in order.
///
/// DML statements inside the batch produce no row set on this path; use
/// [`execute`] for affected-row counts.
pub async fn build_result_sets(
    client: &mut MssqlClient,
    command: &Command,
) -> Result<Vec<ResultSet>, DriverError> {
    let stream = bind_query_params(command).query(client).await?;
    collect_result_sets(stream).await
}

async fn collect_result_sets(mut stream: QueryStream<'_>) -> Result<Vec<ResultSet>, DriverError> {
    let mut results: Vec<ResultSet> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let column_names: Vec<String> = meta
                    .columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect();
                let mut result_set = ResultSet::with_capacity(10);
                result_set.set_column_names(Arc::new(column_names));
                results.push(result_set);
            }
            QueryItem::Row(row) => {
                let result_set = results.last_mut().ok_or_else(|| {
                    DriverError::ExecutionError("row received before column metadata".into())
                })?;
                let col_count = row.columns().len();
                let mut row_values = Vec::with_capacity(col_count);
                for i in 0..col_count {
                    row_values.push(extract_value(&row, i)?.unwrap_or(RowValues::Null));
                }
                result_set.add_row_values(row_values);
            }
        }
    }
    Ok(results)
}

/// Run `command` for its side effects and return the total rows affected.
pub async fn execute(client: &mut MssqlClient, command: &Command) -> Result<usize, DriverError> {
    let result = bind_query_params(command).execute(client).await?;
    convert_affected_rows(result.total())
}

/// Run a statement that takes no parameters, such as transaction control.
pub async fn execute_simple(client: &mut MssqlClient, sql: &str) -> Result<(), DriverError> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// Convert affected rows to usize, guarding against overflow.
pub fn convert_affected_rows(rows_affected: u64) -> Result<usize, DriverError> {
    usize::try_from(rows_affected).map_err(|e| {
        DriverError::ExecutionError(format!("Invalid rows affected count: {e}"))
    })
}

/// Extract a value from a row at a specific index.
///
/// Types are probed in turn; a column that matches none of them, or holds
/// NULL, yields `None`.
fn extract_value(row: &tiberius::Row, idx: usize) -> Result<Option<RowValues>, DriverError> {
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Ok(Some(RowValues::Bool(val)));
    }
    if let Ok(Some(val)) = row.try_get::<u8, _>(idx) {
        return Ok(Some(RowValues::Int(i64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<i16, _>(idx) {
        return Ok(Some(RowValues::Int(i64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Ok(Some(RowValues::Int(i64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Ok(Some(RowValues::Int(val)));
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Ok(Some(RowValues::Float(f64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Ok(Some(RowValues::Float(val)));
    }
    if let Ok(Some(val)) = row.try_get::<Numeric, _>(idx) {
        return Ok(Some(RowValues::Float(f64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Ok(Some(RowValues::Timestamp(val)));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDate, _>(idx) {
        return Ok(val.and_hms_opt(0, 0, 0).map(RowValues::Timestamp));
    }
    if let Ok(Some(val)) = row.try_get::<Uuid, _>(idx) {
        return Ok(Some(RowValues::Text(val.to_string())));
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return Ok(Some(RowValues::Text(val.to_string())));
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Ok(Some(RowValues::Blob(val.to_vec())));
    }
    Ok(None)
}
