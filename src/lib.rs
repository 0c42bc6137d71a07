//! Per-call transactional SQL execution.
//!
//! A [`DbContext`] owns one connection. Each `execute_*` call validates its
//! arguments, opens the connection, runs one statement inside its own
//! transaction, shapes the result and closes the connection again. Readers,
//! enumerations and bulk copies skip the transaction.

pub mod asynchronous;
pub mod bulk;
pub mod command;
pub mod config;
pub mod connection;
pub mod context;
pub mod conversion;
pub mod driver;
pub mod error;
pub mod parameter;
pub mod prelude;
pub mod results;
pub mod shaping;
pub mod streaming;
mod transaction;
pub mod tx_outcome;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use asynchronous::{AsyncDbContext, Query};
pub use bulk::{BulkCopyConfig, ColumnMapping, RowSource, VecRowSource};
pub use config::{ContextOptions, ContextOptionsBuilder, DEFAULT_COMMAND_TIMEOUT_SECS, Timeout};
pub use connection::CancelHandle;
pub use context::DbContext;
pub use conversion::FromRowValue;
pub use driver::{ConnectionState, Driver};
pub use error::{DbContextError, DriverError, FailurePhase};
pub use parameter::{DbType, Parameter, ParameterDirection};
pub use results::{CustomDbRow, DataSet, ResultSet};
pub use shaping::RecordCursor;
pub use streaming::DataReader;
pub use tx_outcome::TxOutcome;
pub use types::{DatabaseType, RowValues};
