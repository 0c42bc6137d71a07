//! Asynchronous counterparts of the [`DbContext`] operations.
//!
//! The contract is declared so callers can program against it, but no
//! implementation exists yet: every method resolves to
//! [`DbContextError::NotSupported`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bulk::{BulkCopyConfig, RowSource};
use crate::config::Timeout;
use crate::context::DbContext;
use crate::driver::ConnectionState;
use crate::error::{DbContextError, DriverError};
use crate::parameter::Parameter;
use crate::results::ResultSet;
use crate::shaping::RecordCursor;
use crate::streaming::DataReader;
use crate::types::RowValues;

/// Converter handed to the async object and enumerable operations.
pub type AsyncConverter<T> = Box<dyn FnMut(&RecordCursor) -> Result<T, DriverError> + Send>;

/// A statement for the asynchronous operations.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub sql: String,
    pub parameters: Vec<Parameter>,
    pub timeout: Timeout,
    pub cancel: CancellationToken,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
pub trait AsyncDbContext: Send {
    async fn get_connection_async(
        &mut self,
        _cancel: CancellationToken,
    ) -> Result<ConnectionState, DbContextError> {
        Err(DbContextError::NotSupported("get_connection_async"))
    }

    async fn begin_transaction_async(
        &mut self,
        _cancel: CancellationToken,
    ) -> Result<(), DbContextError> {
        Err(DbContextError::NotSupported("begin_transaction_async"))
    }

    async fn execute_bulk_copy_async(
        &mut self,
        _source: &mut (dyn RowSource + Send),
        _config: &BulkCopyConfig,
        _cancel: CancellationToken,
    ) -> Result<u64, DbContextError> {
        Err(DbContextError::NotSupported("execute_bulk_copy_async"))
    }

    async fn execute_table_async(&mut self, _query: Query) -> Result<ResultSet, DbContextError> {
        Err(DbContextError::NotSupported("execute_table_async"))
    }

    async fn execute_reader_async(
        &mut self,
        _query: Query,
    ) -> Result<DataReader<'_>, DbContextError> {
        Err(DbContextError::NotSupported("execute_reader_async"))
    }

    async fn execute_non_query_async(&mut self, _query: Query) -> Result<usize, DbContextError> {
        Err(DbContextError::NotSupported("execute_non_query_async"))
    }

    async fn execute_object_async<T: Send>(
        &mut self,
        _query: Query,
        _converter: AsyncConverter<T>,
    ) -> Result<T, DbContextError> {
        Err(DbContextError::NotSupported("execute_object_async"))
    }

    async fn execute_scalar_async(&mut self, _query: Query) -> Result<RowValues, DbContextError> {
        Err(DbContextError::NotSupported("execute_scalar_async"))
    }

    async fn execute_enumerable_async<T: Send>(
        &mut self,
        _query: Query,
        _converter: AsyncConverter<T>,
    ) -> Result<Vec<T>, DbContextError> {
        Err(DbContextError::NotSupported("execute_enumerable_async"))
    }
}

impl AsyncDbContext for DbContext {}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_is_unsupported() {
        let mut ctx = DbContext::sqlite("never-opened.db").unwrap();
        let query = Query::new("SELECT 1").with_timeout(5);

        assert!(matches!(
            ctx.execute_table_async(query.clone()).await,
            Err(DbContextError::NotSupported("execute_table_async"))
        ));
        assert!(matches!(
            ctx.execute_non_query_async(query.clone()).await,
            Err(DbContextError::NotSupported(_))
        ));
        assert!(matches!(
            ctx.execute_scalar_async(query.clone()).await,
            Err(DbContextError::NotSupported(_))
        ));
        let converted = ctx
            .execute_enumerable_async(query, Box::new(|r: &RecordCursor| r.get_as::<i64>("n")))
            .await;
        assert!(matches!(converted, Err(DbContextError::NotSupported(_))));
        assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    }
}
