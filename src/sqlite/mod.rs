// SQLite driver, split into:
// - driver: connection lifecycle and the Driver implementation
// - params: parameter conversion and placeholder binding
// - query: statement batches and result extraction
// - bulk: prepared-insert bulk copy
// - stream: sequential-access cursors stepped on a reader thread

mod bulk;
mod driver;
pub mod params;
pub mod query;
mod stream;

pub use driver::SqliteDriver;
