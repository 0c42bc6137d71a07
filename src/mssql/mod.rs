// SQL Server driver, split into:
// - client: tiberius configuration and connection setup
// - params: statement text and parameter binding
// - query: result extraction and execution
// - bulk: bulk load through the TDS bulk protocol
// - driver: the blocking Driver implementation

mod bulk;
pub mod client;
mod driver;
pub mod params;
pub mod query;

pub use client::{MssqlClient, create_mssql_client};
pub use driver::MssqlDriver;
