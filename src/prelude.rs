//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so a single
//! `use sql_context::prelude::*;` is enough to get started.

pub use crate::asynchronous::{AsyncDbContext, Query};
pub use crate::bulk::{BulkCopyConfig, ColumnMapping, RowSource, VecRowSource};
pub use crate::config::{ContextOptions, ContextOptionsBuilder, Timeout};
pub use crate::connection::CancelHandle;
pub use crate::context::DbContext;
pub use crate::conversion::FromRowValue;
pub use crate::driver::ConnectionState;
pub use crate::error::{DbContextError, DriverError, FailurePhase};
pub use crate::parameter::{DbType, Parameter, ParameterDirection};
pub use crate::results::{CustomDbRow, DataSet, ResultSet};
pub use crate::shaping::RecordCursor;
pub use crate::streaming::DataReader;
pub use crate::types::{DatabaseType, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteDriver;

#[cfg(feature = "mssql")]
pub use crate::mssql::{MssqlClient, MssqlDriver, create_mssql_client};
