use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, IntoSql, Query, TokenRow, Uuid};
use tracing::debug;

use super::client::MssqlClient;
use crate::bulk::{BulkPlan, RowSource};
use crate::conversion::FromRowValue;
use crate::error::DriverError;
use crate::types::RowValues;

/// Insertable column of the destination table, in table order.
#[derive(Debug, Clone)]
pub(crate) struct DestinationColumn {
    name: String,
    type_name: String,
    scale: u8,
}

/// Columns a bulk insert must supply: everything except identity, computed and
/// rowversion columns.
async fn destination_columns(
    client: &mut MssqlClient,
    table: &str,
) -> Result<Vec<DestinationColumn>, DriverError> {
    let mut query = Query::new(
        "SELECT c.name, TYPE_NAME(c.system_type_id), c.scale \
         FROM sys.columns c \
         WHERE c.object_id = OBJECT_ID(@P1) \
           AND c.is_identity = 0 AND c.is_computed = 0 \
           AND TYPE_NAME(c.system_type_id) <> 'timestamp' \
         ORDER BY c.column_id",
    );
    query.bind(table.to_string());
    let rows = query.query(client).await?.into_first_result().await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: Option<&str> = row.try_get(0)?;
        let type_name: Option<&str> = row.try_get(1)?;
        let scale: Option<u8> = row.try_get(2)?;
        columns.push(DestinationColumn {
            name: name.unwrap_or_default().to_string(),
            type_name: type_name.unwrap_or_default().to_ascii_lowercase(),
            scale: scale.unwrap_or(0),
        });
    }
    if columns.is_empty() {
        return Err(DriverError::ExecutionError(format!(
            "destination table '{table}' was not found or has no insertable columns"
        )));
    }
    Ok(columns)
}

fn numeric(value: &RowValues, scale: u8) -> Result<Numeric, DriverError> {
    let raw = f64::from_row_value(value)? * 10_f64.powi(i32::from(scale));
    if !raw.is_finite() {
        return Err(DriverError::ConversionError(format!(
            "{value:?} cannot be stored as a decimal"
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    let scaled = raw.round() as i128;
    Ok(Numeric::new_with_scale(scaled, scale))
}

/// Coerce a value to the exact wire type of its destination column.
fn column_data(
    value: &RowValues,
    column: &DestinationColumn,
) -> Result<ColumnData<'static>, DriverError> {
    let null = value.is_null();
    let data = match column.type_name.as_str() {
        "bit" => ColumnData::Bit((!null).then(|| bool::from_row_value(value)).transpose()?),
        "tinyint" => ColumnData::U8(
            (!null)
                .then(|| {
                    let v = i64::from_row_value(value)?;
                    u8::try_from(v).map_err(|e| DriverError::ConversionError(e.to_string()))
                })
                .transpose()?,
        ),
        "smallint" => ColumnData::I16(
            (!null)
                .then(|| {
                    let v = i64::from_row_value(value)?;
                    i16::try_from(v).map_err(|e| DriverError::ConversionError(e.to_string()))
                })
                .transpose()?,
        ),
        "int" => ColumnData::I32((!null).then(|| i32::from_row_value(value)).transpose()?),
        "bigint" => ColumnData::I64((!null).then(|| i64::from_row_value(value)).transpose()?),
        "real" => {
            #[allow(clippy::cast_possible_truncation)]
            let v = (!null)
                .then(|| f64::from_row_value(value).map(|f| f as f32))
                .transpose()?;
            ColumnData::F32(v)
        }
        "float" => ColumnData::F64((!null).then(|| f64::from_row_value(value)).transpose()?),
        "decimal" | "numeric" | "money" | "smallmoney" => ColumnData::Numeric(
            (!null)
                .then(|| numeric(value, column.scale))
                .transpose()?,
        ),
        "datetime" | "datetime2" | "smalldatetime" => {
            let v = (!null)
                .then(|| NaiveDateTime::from_row_value(value))
                .transpose()?;
            v.into_sql()
        }
        "date" => {
            let v = (!null)
                .then(|| NaiveDateTime::from_row_value(value).map(|dt| dt.date()))
                .transpose()?;
            Option::<NaiveDate>::into_sql(v)
        }
        "uniqueidentifier" => ColumnData::Guid(
            (!null)
                .then(|| {
                    let text = String::from_row_value(value)?;
                    Uuid::parse_str(&text).map_err(|e| DriverError::ConversionError(e.to_string()))
                })
                .transpose()?,
        ),
        "binary" | "varbinary" | "image" => ColumnData::Binary(
            (!null)
                .then(|| Vec::<u8>::from_row_value(value).map(Cow::Owned))
                .transpose()?,
        ),
        _ => ColumnData::String(
            (!null)
                .then(|| String::from_row_value(value).map(Cow::Owned))
                .transpose()?,
        ),
    };
    Ok(data)
}

/// Position of each destination column within the projected row.
fn value_slots(
    plan: &BulkPlan,
    columns: &[DestinationColumn],
) -> Result<Vec<Option<usize>>, DriverError> {
    if plan.maps_by_ordinal() {
        if plan.columns().len() > columns.len() {
            return Err(DriverError::ExecutionError(format!(
                "row source has {} columns but '{}' only accepts {}",
                plan.columns().len(),
                plan.destination(),
                columns.len()
            )));
        }
        return Ok((0..columns.len())
            .map(|i| (i < plan.columns().len()).then_some(i))
            .collect());
    }
    for destination in plan.destination_columns() {
        if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(destination)) {
            return Err(DriverError::ExecutionError(format!(
                "column '{destination}' is not an insertable column of '{}'",
                plan.destination()
            )));
        }
    }
    Ok(columns
        .iter()
        .map(|column| {
            plan.destination_columns()
                .position(|d| d.eq_ignore_ascii_case(&column.name))
        })
        .collect())
}

/// Write every row of `source` with tiberius' bulk load protocol.
///
/// Each batch is its own `INSERT BULK` request, so completed batches stay
/// committed when a later one fails. Destination columns without a mapping,
/// or past the end of the source row when mapping by ordinal, receive NULL.
pub(crate) async fn copy_rows(
    client: &mut MssqlClient,
    plan: &BulkPlan,
    source: &mut dyn RowSource,
) -> Result<u64, DriverError> {
    let columns = destination_columns(client, plan.destination()).await?;

    let slots = value_slots(plan, &columns)?;

    let null = RowValues::Null;
    let batch_size = u64::from(plan.batch_size().unwrap_or(0));
    let mut copied = 0_u64;
    let mut pending = source.next_row()?;
    while pending.is_some() {
        let mut request = client.bulk_insert(plan.destination()).await?;
        let mut in_batch = 0_u64;
        while let Some(row) = pending.take() {
            let values = plan.project(&row)?;
            let mut token_row = TokenRow::new();
            for (column, slot) in columns.iter().zip(&slots) {
                let value = slot.and_then(|i| values.get(i)).unwrap_or(&null);
                token_row.push(column_data(value, column)?);
            }
            request.send(token_row).await?;
            copied += 1;
            in_batch += 1;
            pending = source.next_row()?;
            if batch_size > 0 && in_batch == batch_size {
                break;
            }
        }
        request.finalize().await?;
        debug!(table = plan.destination(), rows = copied, "bulk copy batch committed");
    }
    Ok(copied)
}
