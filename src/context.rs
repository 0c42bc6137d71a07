//! The public facade: one context, one connection, one statement per call.

use std::fmt;

use tracing::debug;

use crate::bulk::{self, BulkCopyConfig, RowSource};
use crate::command::{Command, CommandBehavior, CommandKind};
use crate::config::{ContextOptions, Timeout};
use crate::connection::{CancelHandle, ConnectionManager};
use crate::conversion::FromRowValue;
use crate::driver::{ConnectionState, Driver};
use crate::error::{DbContextError, DriverError, FailurePhase};
use crate::parameter::Parameter;
use crate::results::{DataSet, ResultSet};
use crate::shaping::{self, RecordCursor};
use crate::streaming::{self, DataReader};
use crate::transaction::run_in_transaction;
use crate::types::{DatabaseType, RowValues};

/// Transactional data access against a single database.
///
/// Every `execute_*` call that is not a reader, an enumeration or a bulk copy
/// runs its statement in a transaction of its own: begin, execute, commit, and
/// roll back on any failure. The physical connection is closed again when the
/// call returns.
///
/// A context owns its connection exclusively. It is `Send` but not `Sync`,
/// and every operation takes `&mut self`.
///
/// # Examples
/// ```rust,no_run
/// use sql_context::prelude::*;
///
/// # fn demo() -> Result<(), DbContextError> {
/// let mut ctx = DbContext::sqlite("cases.db")?;
/// ctx.execute_non_query("CREATE TABLE t (id INTEGER)", &[], -1)?;
/// let count: i64 = ctx.execute_scalar("SELECT COUNT(*) FROM t", &[], -1)?;
/// assert_eq!(count, 0);
/// # Ok(()) }
/// ```
pub struct DbContext {
    options: ContextOptions,
    conn: ConnectionManager,
}

impl fmt::Debug for DbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbContext")
            .field("options", &self.options)
            .field("conn", &self.conn)
            .finish()
    }
}

fn require_text(argument: &'static str, text: &str) -> Result<(), DbContextError> {
    if text.trim().is_empty() {
        return Err(DbContextError::invalid(
            argument,
            format!("'{argument}' cannot be null or blank"),
        ));
    }
    Ok(())
}

fn require_option(argument: &'static str, value: &str) -> Result<(), DbContextError> {
    if value.trim().is_empty() {
        return Err(DbContextError::invalid(
            argument,
            format!("'{argument}' is required"),
        ));
    }
    Ok(())
}

impl DbContext {
    /// SQL Server context. No connection is opened until the first call.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` when a field is blank or the
    /// `mssql` feature is not enabled.
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, DbContextError> {
        Self::from_options(ContextOptions::mssql(
            server.into(),
            database.into(),
            user.into(),
            password.into(),
        ))
    }

    /// `SQLite` context over the database file at `db_path`.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for a blank path.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(db_path: impl Into<String>) -> Result<Self, DbContextError> {
        Self::from_options(ContextOptions::sqlite(db_path.into()))
    }

    /// Build the driver named by `options.database_type`.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` when the options are incomplete
    /// or the driver was not compiled in.
    pub fn from_options(options: ContextOptions) -> Result<Self, DbContextError> {
        let driver: Box<dyn Driver> = match options.database_type {
            DatabaseType::Mssql => {
                require_option("server", &options.server)?;
                require_option("database", &options.database)?;
                require_option("user", &options.user)?;
                Self::mssql_driver(&options)?
            }
            DatabaseType::Sqlite => {
                require_option("database", &options.database)?;
                Self::sqlite_driver(&options)?
            }
        };
        Ok(Self::with_driver(options, driver))
    }

    #[cfg(feature = "mssql")]
    fn mssql_driver(options: &ContextOptions) -> Result<Box<dyn Driver>, DbContextError> {
        let driver = crate::mssql::MssqlDriver::new(options.clone())
            .map_err(|e| DbContextError::execution(FailurePhase::Plain, e))?;
        Ok(Box::new(driver))
    }

    #[cfg(not(feature = "mssql"))]
    fn mssql_driver(_options: &ContextOptions) -> Result<Box<dyn Driver>, DbContextError> {
        Err(DbContextError::invalid(
            "database_type",
            "SQL Server support requires the 'mssql' feature",
        ))
    }

    #[cfg(feature = "sqlite")]
    #[allow(clippy::unnecessary_wraps)]
    fn sqlite_driver(options: &ContextOptions) -> Result<Box<dyn Driver>, DbContextError> {
        Ok(Box::new(crate::sqlite::SqliteDriver::new(
            options.database.clone(),
        )))
    }

    #[cfg(not(feature = "sqlite"))]
    fn sqlite_driver(_options: &ContextOptions) -> Result<Box<dyn Driver>, DbContextError> {
        Err(DbContextError::invalid(
            "database_type",
            "SQLite support requires the 'sqlite' feature",
        ))
    }

    /// Context over a caller-supplied driver.
    #[must_use]
    pub fn with_driver(options: ContextOptions, driver: Box<dyn Driver>) -> Self {
        debug!(driver = driver.name(), database = %options.database, "context created");
        Self {
            options,
            conn: ConnectionManager::new(driver),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.options.database
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.options.server
    }

    #[must_use]
    pub fn is_master_database(&self) -> bool {
        self.options.is_master_database()
    }

    /// Empty input parameter, to be named and filled in by the caller.
    #[must_use]
    pub fn create_parameter(&self) -> Parameter {
        Parameter::positional(RowValues::Null)
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.conn.in_transaction()
    }

    /// Bring the connection into a usable state: a broken connection is
    /// closed, and a closed one is opened when `open_if_closed` is set.
    ///
    /// # Errors
    /// Returns `DbContextError::Execution` if the connection cannot be opened.
    pub fn get_connection(
        &mut self,
        open_if_closed: bool,
    ) -> Result<ConnectionState, DbContextError> {
        self.conn
            .acquire(open_if_closed)
            .map_err(|e| DbContextError::execution(FailurePhase::Plain, e))
    }

    /// Start a caller-owned transaction. Readers, enumerations and bulk copies
    /// run inside it until it is committed or rolled back; the transactional
    /// `execute_*` calls are rejected while it is active.
    ///
    /// # Errors
    /// Returns `DbContextError::Execution` if the connection cannot be opened,
    /// the engine refuses, or a transaction is already active.
    pub fn begin_transaction(&mut self) -> Result<(), DbContextError> {
        self.conn
            .begin_transaction()
            .map_err(|e| DbContextError::execution(FailurePhase::Plain, e))?;
        debug!("transaction started");
        Ok(())
    }

    /// Commit the caller-owned transaction and close the connection.
    ///
    /// # Errors
    /// Returns `DbContextError::Execution` if no transaction is active or the
    /// commit fails.
    pub fn commit_transaction(&mut self) -> Result<(), DbContextError> {
        self.conn
            .commit_transaction()
            .map_err(|e| DbContextError::execution(FailurePhase::Plain, e))?;
        debug!("transaction committed");
        Ok(())
    }

    /// Roll back the caller-owned transaction and close the connection.
    /// Rollback and close failures are logged and swallowed.
    pub fn rollback_transaction(&mut self) {
        match self.conn.rollback_transaction() {
            Ok(()) => debug!("transaction rolled back"),
            Err(err) => debug!(error = %err, "ignoring rollback failure"),
        }
    }

    /// Close the connection unless a transaction is active, and forget the
    /// attached command.
    pub fn release_connection(&mut self) {
        self.conn.release();
    }

    /// Best-effort cancel of the running command. Never fails.
    pub fn cancel(&self) {
        self.conn.cancel();
    }

    /// Handle that cancels this context's running command from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.conn.cancel_handle()
    }

    fn command(
        &self,
        argument: &'static str,
        text: &str,
        kind: CommandKind,
        parameters: &[Parameter],
        timeout: Timeout,
    ) -> Result<Command, DbContextError> {
        require_text(argument, text)?;
        let timeout_secs = timeout.resolve()?;
        for param in parameters {
            param.validate()?;
        }
        Ok(Command::new(text, kind, timeout_secs).with_parameters(parameters))
    }

    fn sql(
        &self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<Command, DbContextError> {
        self.command("sqlStatement", sql, CommandKind::Text, parameters, timeout.into())
    }

    fn procedure(
        &self,
        procedure_name: &str,
        parameters: &[Parameter],
    ) -> Result<Command, DbContextError> {
        self.command(
            "procedureName",
            procedure_name,
            CommandKind::StoredProcedure,
            parameters,
            Timeout::Default,
        )
    }

    fn transactional<T, F>(&mut self, command: &Command, op: F) -> Result<T, DbContextError>
    where
        F: FnOnce(&mut dyn Driver, &Command) -> Result<T, DriverError>,
    {
        if self.conn.in_transaction() {
            return Err(DbContextError::invalid(
                "transaction",
                "a caller-owned transaction is active; commit or roll it back first",
            ));
        }
        run_in_transaction(&mut self.conn, command, op).into_result()
    }

    /// First row set of `sql` as a table; empty when the statement returns none.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for blank SQL, a timeout
    /// below one second, a bad parameter or an active caller transaction, and
    /// `DbContextError::Execution` when the statement fails.
    pub fn execute_table(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<ResultSet, DbContextError> {
        let command = self.sql(sql, parameters, timeout)?;
        self.transactional(&command, |driver, cmd| {
            driver.query(cmd).map(shaping::table)
        })
    }

    /// Every row set of `sql`, in order.
    ///
    /// # Errors
    /// As [`execute_table`](Self::execute_table).
    pub fn execute_data_set(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<DataSet, DbContextError> {
        let command = self.sql(sql, parameters, timeout)?;
        self.transactional(&command, |driver, cmd| {
            driver.query(cmd).map(shaping::data_set)
        })
    }

    /// Second row set of `sql`. A statement that produces fewer than two
    /// row sets fails and is rolled back.
    ///
    /// # Errors
    /// As [`execute_table`](Self::execute_table); a missing second set is an
    /// execution failure caused by `DriverError::MissingResultSet`.
    pub fn execute_second_table(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<ResultSet, DbContextError> {
        let command = self.sql(sql, parameters, timeout)?;
        self.transactional(&command, |driver, cmd| {
            shaping::nth_table(driver.query(cmd)?, 1)
        })
    }

    /// First column of the first row, cast to `T`. An empty result casts
    /// `RowValues::Null`, so ask for `Option<T>` when no row is possible.
    ///
    /// # Errors
    /// As [`execute_table`](Self::execute_table); a failed cast is an
    /// execution failure and rolls the statement back.
    pub fn execute_scalar<T: FromRowValue>(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<T, DbContextError> {
        let command = self.sql(sql, parameters, timeout)?;
        self.transactional(&command, |driver, cmd| {
            let mut record = RecordCursor::new(driver.open_cursor(cmd)?);
            T::from_row_value(&shaping::scalar(&mut record)?)
        })
    }

    /// Untyped scalar: the raw first cell, `RowValues::Null` when empty.
    ///
    /// # Errors
    /// As [`execute_table`](Self::execute_table).
    pub fn execute_scalar_value(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<RowValues, DbContextError> {
        self.execute_scalar::<RowValues>(sql, parameters, timeout)
    }

    /// Run `sql` for its side effects and return the rows affected.
    ///
    /// # Errors
    /// As [`execute_table`](Self::execute_table).
    pub fn execute_non_query(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
    ) -> Result<usize, DbContextError> {
        let command = self.sql(sql, parameters, timeout)?;
        self.transactional(&command, |driver, cmd| driver.execute(cmd))
    }

    /// Advance one row and build a value from it with `converter`.
    ///
    /// The converter also runs for an empty result; the record then has no
    /// current row and column access returns `DriverError::NoCurrentRow`.
    ///
    /// # Errors
    /// As [`execute_table`](Self::execute_table); a converter error is an
    /// execution failure and rolls the statement back.
    pub fn execute_object<T, F>(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
        converter: F,
    ) -> Result<T, DbContextError>
    where
        F: FnOnce(&RecordCursor) -> Result<T, DriverError>,
    {
        let command = self.sql(sql, parameters, timeout)?;
        self.transactional(&command, |driver, cmd| {
            let mut record = RecordCursor::new(driver.open_cursor(cmd)?);
            shaping::object(&mut record, converter)
        })
    }

    /// Run a stored procedure for its side effects with the default timeout.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for a blank procedure name, a
    /// bad parameter or an active caller transaction, and
    /// `DbContextError::Execution` when the call fails.
    pub fn execute_procedure_non_query(
        &mut self,
        procedure_name: &str,
        parameters: &[Parameter],
    ) -> Result<usize, DbContextError> {
        let command = self.procedure(procedure_name, parameters)?;
        self.transactional(&command, |driver, cmd| driver.execute(cmd))
    }

    /// Open a reader over `sql`. See [`DataReader`] for how long the
    /// connection stays open.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for blank SQL or a timeout
    /// below one second, and `DbContextError::Execution` when the statement
    /// fails.
    pub fn execute_reader(
        &mut self,
        sql: &str,
        timeout: impl Into<Timeout>,
    ) -> Result<DataReader<'_>, DbContextError> {
        self.execute_parameterized_reader(sql, &[], timeout, false)
    }

    /// Open a reader over a parameterized `sql`, optionally with sequential
    /// column access.
    ///
    /// # Errors
    /// As [`execute_reader`](Self::execute_reader), plus bad parameters.
    pub fn execute_parameterized_reader(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
        sequential_access: bool,
    ) -> Result<DataReader<'_>, DbContextError> {
        let behavior = CommandBehavior::for_reader(self.conn.in_transaction(), sequential_access);
        let command = self.sql(sql, parameters, timeout)?.with_behavior(behavior);
        streaming::open_reader(&mut self.conn, &command)
    }

    /// Open a reader over a stored procedure's first row set.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for a blank procedure name or
    /// a bad parameter, and `DbContextError::Execution` when the call fails.
    pub fn execute_procedure_reader(
        &mut self,
        procedure_name: &str,
        parameters: &[Parameter],
    ) -> Result<DataReader<'_>, DbContextError> {
        let behavior = CommandBehavior::for_reader(self.conn.in_transaction(), false);
        let command = self
            .procedure(procedure_name, parameters)?
            .with_behavior(behavior);
        streaming::open_reader(&mut self.conn, &command)
    }

    /// Convert every row of `sql` with `converter`, eagerly and in order, then
    /// release the connection. No transaction is opened.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for blank SQL, a timeout
    /// below one second or a bad parameter, and `DbContextError::Execution`
    /// when the statement or a conversion fails.
    pub fn execute_enumerable<T, F>(
        &mut self,
        sql: &str,
        parameters: &[Parameter],
        timeout: impl Into<Timeout>,
        converter: F,
    ) -> Result<Vec<T>, DbContextError>
    where
        F: FnMut(&RecordCursor) -> Result<T, DriverError>,
    {
        let command = self.sql(sql, parameters, timeout)?;
        streaming::enumerate(&mut self.conn, &command, converter)
    }

    /// Bulk-load every row of `source` into `config.destination_table`.
    ///
    /// Returns the number of rows written. The source is closed on every path
    /// past argument validation.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for a blank destination or
    /// bad mappings, and a bulk-copy `DbContextError::Execution` when the
    /// copy fails.
    pub fn execute_bulk_copy(
        &mut self,
        source: &mut dyn RowSource,
        config: &BulkCopyConfig,
    ) -> Result<u64, DbContextError> {
        bulk::bulk_copy(&mut self.conn, source, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn context_is_send() {
        assert_send::<DbContext>();
    }

    #[cfg(not(feature = "mssql"))]
    #[test]
    fn mssql_needs_its_feature() {
        let err = DbContext::new("localhost", "EDDS", "user", "pw").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn blank_options_are_rejected() {
        let err = DbContext::new(" ", "EDDS", "user", "pw").unwrap_err();
        assert!(matches!(
            err,
            DbContextError::InvalidArgument { argument: "server", .. }
        ));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn blank_statements_never_touch_the_connection() {
        let mut ctx = DbContext::sqlite("unused.db").unwrap();
        let err = ctx.execute_table("   ", &[], -1).unwrap_err();
        assert!(matches!(
            err,
            DbContextError::InvalidArgument { argument: "sqlStatement", .. }
        ));
        let err = ctx.execute_procedure_non_query("", &[]).unwrap_err();
        assert!(matches!(
            err,
            DbContextError::InvalidArgument { argument: "procedureName", .. }
        ));
        assert_eq!(ctx.connection_state(), ConnectionState::Closed);
        assert!(!std::path::Path::new("unused.db").exists());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn master_database_check_uses_database_name() {
        let ctx = DbContext::sqlite("edds").unwrap();
        assert!(ctx.is_master_database());
        assert_eq!(ctx.database(), "edds");
        assert_eq!(ctx.server_name(), "");
    }
}
