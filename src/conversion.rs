//! Typed extraction of [`RowValues`].
//!
//! Scalar shaping and the typed row accessors cast through [`FromRowValue`].
//! Integer targets accept `Int` (range-checked) and `Bool`; text accepts any
//! non-binary value rendered as text; `Option<T>` maps NULL to `None`.

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::error::DriverError;
use crate::types::RowValues;

/// Conversion from a borrowed cell value into an owned Rust value.
pub trait FromRowValue: Sized {
    /// # Errors
    /// Returns `DriverError::ConversionError` when the value cannot be represented.
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError>;
}

fn mismatch<T>(value: &RowValues, target: &str) -> Result<T, DriverError> {
    Err(DriverError::ConversionError(format!(
        "cannot convert {} value to {target}",
        value.kind()
    )))
}

impl FromRowValue for RowValues {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        Ok(value.clone())
    }
}

impl FromRowValue for i64 {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        match value {
            RowValues::Int(i) => Ok(*i),
            RowValues::Bool(b) => Ok(i64::from(*b)),
            other => mismatch(other, "i64"),
        }
    }
}

impl FromRowValue for i32 {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        let wide = i64::from_row_value(value)?;
        i32::try_from(wide)
            .map_err(|e| DriverError::ConversionError(format!("{wide} does not fit in i32: {e}")))
    }
}

impl FromRowValue for f64 {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        value.as_float().map_or_else(|| mismatch(value, "f64"), Ok)
    }
}

impl FromRowValue for bool {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        value.as_bool().copied().map_or_else(|| mismatch(value, "bool"), Ok)
    }
}

impl FromRowValue for String {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        match value {
            RowValues::Text(s) => Ok(s.clone()),
            RowValues::Int(i) => Ok(i.to_string()),
            RowValues::Float(f) => Ok(f.to_string()),
            RowValues::Bool(b) => Ok(b.to_string()),
            RowValues::Timestamp(dt) => Ok(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            RowValues::JSON(js) => Ok(js.to_string()),
            other => mismatch(other, "String"),
        }
    }
}

impl FromRowValue for NaiveDateTime {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        value
            .as_timestamp()
            .map_or_else(|| mismatch(value, "NaiveDateTime"), Ok)
    }
}

impl FromRowValue for Vec<u8> {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        value
            .as_blob()
            .map_or_else(|| mismatch(value, "Vec<u8>"), |b| Ok(b.to_vec()))
    }
}

impl FromRowValue for JsonValue {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        match value {
            RowValues::JSON(js) => Ok(js.clone()),
            RowValues::Text(s) => serde_json::from_str(s)
                .map_err(|e| DriverError::ConversionError(format!("invalid JSON text: {e}"))),
            other => mismatch(other, "serde_json::Value"),
        }
    }
}

impl<T: FromRowValue> FromRowValue for Option<T> {
    fn from_row_value(value: &RowValues) -> Result<Self, DriverError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_row_value(value).map(Some)
        }
    }
}
