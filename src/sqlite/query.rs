use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Connection, Statement};

use super::params::ParamBinder;
use crate::error::DriverError;
use crate::parameter::Parameter;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `DriverError` if the value cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DriverError> {
    let value: Value = row.get(idx)?;
    match value {
        Value::Null => Ok(RowValues::Null),
        Value::Integer(i) => Ok(RowValues::Int(i)),
        Value::Real(f) => Ok(RowValues::Float(f)),
        Value::Text(s) => Ok(RowValues::Text(s)),
        Value::Blob(b) => Ok(RowValues::Blob(b)),
    }
}

/// Run one bound statement.
///
/// Statements without result columns report their change count through
/// [`ResultSet::affected`]; everything else is read into a table.
pub(crate) fn build_result_set(stmt: &mut Statement<'_>) -> Result<ResultSet, DriverError> {
    if stmt.column_count() == 0 {
        let changed = stmt.raw_execute()?;
        return Ok(ResultSet::affected(changed));
    }

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows_iter = stmt.raw_query();
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Run every statement in `sql`, in order, returning one result per statement.
pub(crate) fn run_batch(
    conn: &Connection,
    sql: &str,
    params: &[Parameter],
) -> Result<Vec<ResultSet>, DriverError> {
    let mut binder = ParamBinder::new(params);
    let mut batch = Batch::new(conn, sql);
    let mut results = Vec::new();
    while let Some(mut stmt) = batch.next()? {
        binder.bind(&mut stmt)?;
        results.push(build_result_set(&mut stmt)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_returns_one_result_per_statement() {
        let conn = Connection::open_in_memory().unwrap();
        let results = run_batch(
            &conn,
            "CREATE TABLE t (id INTEGER, name TEXT);
             INSERT INTO t VALUES (1, 'a'), (2, 'b');
             SELECT id, name FROM t ORDER BY id;
             SELECT COUNT(*) AS n FROM t;",
            &[],
        )
        .unwrap();
        assert_eq!(results.len(), 4);
        assert!(!results[0].has_columns());
        assert_eq!(results[1].rows_affected, 2);
        assert_eq!(results[2].row_count(), 2);
        assert_eq!(results[3].first_cell(), Some(&RowValues::Int(2)));
    }

    #[test]
    fn positional_parameters_continue_across_statements() {
        let conn = Connection::open_in_memory().unwrap();
        let params = [Parameter::positional(1), Parameter::positional("x")];
        let results = run_batch(&conn, "SELECT ?; SELECT ?;", &params).unwrap();
        assert_eq!(results[0].first_cell(), Some(&RowValues::Int(1)));
        assert_eq!(results[1].first_cell(), Some(&RowValues::Text("x".into())));
    }
}
