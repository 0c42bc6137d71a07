//! Command parameters.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DbContextError;
use crate::types::RowValues;

static PARAMETER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[@:$]?[A-Za-z_][A-Za-z0-9_]*$").expect("parameter name pattern compiles")
});

/// Declared SQL type of a parameter.
///
/// Drivers use it to type NULL values and, on SQL Server, to declare named
/// parameters. Values are not coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DbType {
    Int,
    BigInt,
    Float,
    Bit,
    #[default]
    NVarChar,
    DateTime,
    VarBinary,
}

impl DbType {
    /// Best guess for a value whose type was not declared.
    #[must_use]
    pub fn infer(value: &RowValues) -> Self {
        match value {
            RowValues::Int(_) => DbType::BigInt,
            RowValues::Float(_) => DbType::Float,
            RowValues::Bool(_) => DbType::Bit,
            RowValues::Timestamp(_) => DbType::DateTime,
            RowValues::Blob(_) => DbType::VarBinary,
            RowValues::Text(_) | RowValues::JSON(_) | RowValues::Null => DbType::NVarChar,
        }
    }

    /// T-SQL spelling used when declaring a variable of this type.
    #[must_use]
    pub fn sql_name(self) -> &'static str {
        match self {
            DbType::Int => "INT",
            DbType::BigInt => "BIGINT",
            DbType::Float => "FLOAT",
            DbType::Bit => "BIT",
            DbType::NVarChar => "NVARCHAR(MAX)",
            DbType::DateTime => "DATETIME2",
            DbType::VarBinary => "VARBINARY(MAX)",
        }
    }
}

/// Direction of a parameter, kept so callers can describe a procedure's full
/// signature.
///
/// Only [`Input`](Self::Input) can be executed. Commands carrying any other
/// direction are refused with `InvalidArgument` before a connection is opened,
/// since no operation hands output values back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// A named, typed value bound to a command.
///
/// An empty name binds by position (`?` in `SQLite`, `@P1..` on SQL Server).
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub db_type: DbType,
    pub direction: ParameterDirection,
    pub value: RowValues,
}

impl Parameter {
    /// Input parameter whose declared type is inferred from the value.
    pub fn new(name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            db_type: DbType::infer(&value),
            direction: ParameterDirection::Input,
            value,
        }
    }

    /// Positional input parameter.
    pub fn positional(value: impl Into<RowValues>) -> Self {
        Self::new(String::new(), value)
    }

    #[must_use]
    pub fn with_type(mut self, db_type: DbType) -> Self {
        self.db_type = db_type;
        self
    }

    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn is_positional(&self) -> bool {
        self.name.is_empty()
    }

    /// Name without its `@`, `:` or `$` prefix.
    #[must_use]
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches(['@', ':', '$'])
    }

    /// Checks the name and direction before the parameter reaches a driver.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for malformed names or any
    /// direction other than `Input`.
    pub fn validate(&self) -> Result<(), DbContextError> {
        if !self.is_positional() && !PARAMETER_NAME.is_match(&self.name) {
            return Err(DbContextError::invalid(
                "parameters",
                format!("'{}' is not a valid parameter name", self.name),
            ));
        }
        if self.direction != ParameterDirection::Input {
            return Err(DbContextError::invalid(
                "parameters",
                format!(
                    "parameter '{}' uses direction {:?}; only Input is supported",
                    self.name, self.direction
                ),
            ));
        }
        Ok(())
    }
}
