use std::fmt::Write;

use chrono::NaiveDateTime;
use tiberius::Query;

use crate::command::{Command, CommandKind};
use crate::parameter::{DbType, Parameter};
use crate::types::RowValues;

/// Statement text sent to the server for `command`.
///
/// Parameters travel as `@P1..@Pn` in list order. Named parameters are
/// declared up front so the statement can keep referring to them by name;
/// positional ones are referenced directly as `@Pn`. Procedures become an
/// `EXEC` with named or positional arguments.
#[must_use]
pub fn statement_text(command: &Command) -> String {
    let params = command.parameters();
    match command.kind() {
        CommandKind::Text => {
            let mut sql = String::new();
            for (i, param) in params.iter().enumerate() {
                if !param.is_positional() {
                    let _ = writeln!(
                        sql,
                        "DECLARE @{} {} = @P{};",
                        param.bare_name(),
                        param.db_type.sql_name(),
                        i + 1
                    );
                }
            }
            sql.push_str(command.text());
            sql
        }
        CommandKind::StoredProcedure => {
            let args = params
                .iter()
                .enumerate()
                .map(|(i, param)| {
                    if param.is_positional() {
                        format!("@P{}", i + 1)
                    } else {
                        format!("@{} = @P{}", param.bare_name(), i + 1)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            if args.is_empty() {
                format!("EXEC {}", command.text())
            } else {
                format!("EXEC {} {args}", command.text())
            }
        }
    }
}

/// Bind one parameter. NULLs are typed from the declared `DbType`.
fn bind_param<'a>(query: &mut Query<'a>, param: &Parameter) {
    match &param.value {
        RowValues::Int(i) => match param.db_type {
            DbType::Int => match i32::try_from(*i) {
                Ok(small) => query.bind(small),
                Err(_) => query.bind(*i),
            },
            _ => query.bind(*i),
        },
        RowValues::Float(f) => query.bind(*f),
        RowValues::Text(s) => query.bind(s.clone()),
        RowValues::Bool(b) => query.bind(*b),
        RowValues::Timestamp(dt) => query.bind(*dt),
        RowValues::JSON(jsval) => query.bind(jsval.to_string()),
        RowValues::Blob(bytes) => query.bind(bytes.clone()),
        RowValues::Null => match param.db_type {
            DbType::Int => query.bind(Option::<i32>::None),
            DbType::BigInt => query.bind(Option::<i64>::None),
            DbType::Float => query.bind(Option::<f64>::None),
            DbType::Bit => query.bind(Option::<bool>::None),
            DbType::NVarChar => query.bind(Option::<String>::None),
            DbType::DateTime => query.bind(Option::<NaiveDateTime>::None),
            DbType::VarBinary => query.bind(Option::<Vec<u8>>::None),
        },
    }
}

/// Build the tiberius query for `command` with every parameter bound.
#[must_use]
pub fn bind_query_params(command: &Command) -> Query<'static> {
    let mut query = Query::new(statement_text(command));
    for param in command.parameters() {
        bind_param(&mut query, param);
    }
    query
}
