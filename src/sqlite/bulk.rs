use rusqlite::Connection;
use tracing::debug;

use super::params::row_value_to_sqlite_value;
use crate::bulk::{BulkPlan, RowSource};
use crate::error::DriverError;

/// Quote a possibly schema-qualified identifier. Already quoted names pass through.
fn quote_identifier(name: &str) -> String {
    if name.starts_with(['"', '[', '`']) {
        return name.to_string();
    }
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn insert_statement(plan: &BulkPlan) -> String {
    let table = quote_identifier(plan.destination());
    let placeholders = (1..=plan.columns().len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    if plan.maps_by_ordinal() {
        return format!("INSERT INTO {table} VALUES ({placeholders})");
    }
    let columns = plan
        .destination_columns()
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})")
}

/// Insert every row of `source` with one prepared statement.
///
/// Outside a transaction each batch commits on its own, so a failure keeps the
/// batches already written and discards the failing one. A batch size of zero,
/// or none, writes everything as one batch. Inside a caller's transaction the
/// rows simply join it.
pub(crate) fn copy_rows(
    conn: &Connection,
    plan: &BulkPlan,
    source: &mut dyn RowSource,
) -> Result<u64, DriverError> {
    let manage_batches = conn.is_autocommit();
    let batch_size = u64::from(plan.batch_size().unwrap_or(0));
    let mut stmt = conn.prepare(&insert_statement(plan))?;

    let mut copied = 0_u64;
    let mut in_batch = 0_u64;
    let result = (|| -> Result<(), DriverError> {
        if manage_batches {
            conn.execute_batch("BEGIN")?;
        }
        while let Some(row) = source.next_row()? {
            let values = plan.project(&row)?;
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, row_value_to_sqlite_value(value))?;
            }
            stmt.raw_execute()?;
            copied += 1;
            in_batch += 1;
            if manage_batches && batch_size > 0 && in_batch == batch_size {
                conn.execute_batch("COMMIT; BEGIN")?;
                debug!(rows = copied, "bulk copy batch committed");
                in_batch = 0;
            }
        }
        if manage_batches {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => Ok(copied),
        Err(err) => {
            if manage_batches && !conn.is_autocommit() {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    debug!(error = %rollback_err, "ignoring rollback failure of bulk copy batch");
                }
            }
            Err(err)
        }
    }
}
