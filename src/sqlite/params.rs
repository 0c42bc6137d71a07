use std::fmt::Write;

use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::DriverError;
use crate::parameter::Parameter;
use crate::types::RowValues;

// Thread-local buffer for efficient timestamp formatting
thread_local! {
    static TIMESTAMP_BUF: std::cell::RefCell<String> = std::cell::RefCell::new(String::with_capacity(32));
}

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => TIMESTAMP_BUF.with(|buf| {
            let mut borrow = buf.borrow_mut();
            borrow.clear();
            // Writing into a String cannot fail.
            let _ = write!(borrow, "{}", dt.format("%F %T%.f"));
            Value::Text(borrow.clone())
        }),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Binds a command's parameters to the placeholders of each statement in a batch.
///
/// Named placeholders (`:id`, `@id`, `$id`) match parameters by name, ignoring
/// the prefix and ASCII case. Anonymous `?` placeholders take positional
/// parameters in order, continuing across the statements of one batch;
/// `?NNN` takes the NNN-th positional parameter.
pub(crate) struct ParamBinder<'p> {
    named: Vec<&'p Parameter>,
    positional: Vec<&'p Parameter>,
    next_positional: usize,
}

impl<'p> ParamBinder<'p> {
    pub(crate) fn new(params: &'p [Parameter]) -> Self {
        let (positional, named): (Vec<&Parameter>, Vec<&Parameter>) =
            params.iter().partition(|p| p.is_positional());
        Self {
            named,
            positional,
            next_positional: 0,
        }
    }

    pub(crate) fn bind(&mut self, stmt: &mut Statement<'_>) -> Result<(), DriverError> {
        for idx in 1..=stmt.parameter_count() {
            let placeholder = stmt.parameter_name(idx).map(str::to_owned);
            let value = match placeholder.as_deref() {
                None => self.next_anonymous()?,
                Some(name) if name.starts_with('?') => self.numbered(name)?,
                Some(name) => self.by_name(name)?,
            };
            stmt.raw_bind_parameter(idx, row_value_to_sqlite_value(value))?;
        }
        Ok(())
    }

    fn next_anonymous(&mut self) -> Result<&'p RowValues, DriverError> {
        let param = self.positional.get(self.next_positional).copied().ok_or_else(|| {
            DriverError::ExecutionError(format!(
                "no value supplied for positional parameter {}",
                self.next_positional + 1
            ))
        })?;
        self.next_positional += 1;
        Ok(&param.value)
    }

    fn numbered(&self, placeholder: &str) -> Result<&'p RowValues, DriverError> {
        placeholder[1..]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.positional.get(i).copied())
            .map(|p| &p.value)
            .ok_or_else(|| {
                DriverError::ExecutionError(format!("no value supplied for parameter {placeholder}"))
            })
    }

    fn by_name(&self, placeholder: &str) -> Result<&'p RowValues, DriverError> {
        let bare = placeholder.trim_start_matches(['@', ':', '$']);
        self.named
            .iter()
            .find(|p| p.bare_name().eq_ignore_ascii_case(bare))
            .copied()
            .map(|p| &p.value)
            .ok_or_else(|| {
                DriverError::ExecutionError(format!("no value supplied for parameter {placeholder}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rusqlite::Connection;

    #[test]
    fn timestamps_are_formatted_as_text() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::Timestamp(dt)),
            Value::Text("2024-03-01 12:30:00".into())
        );
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
    }

    #[test]
    fn binds_named_and_positional_parameters() {
        let conn = Connection::open_in_memory().unwrap();
        let params = vec![
            Parameter::new("@name", "alice"),
            Parameter::positional(7),
        ];
        let mut binder = ParamBinder::new(&params);
        let mut stmt = conn.prepare("SELECT :NAME, ?").unwrap();
        binder.bind(&mut stmt).unwrap();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.get::<_, String>(0).unwrap(), "alice");
        assert_eq!(row.get::<_, i64>(1).unwrap(), 7);
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut binder = ParamBinder::new(&[]);
        let mut stmt = conn.prepare("SELECT @missing").unwrap();
        assert!(matches!(
            binder.bind(&mut stmt),
            Err(DriverError::ExecutionError(_))
        ));
    }
}
