use tiberius::{Client, Config, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ContextOptions;
use crate::error::DriverError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Tiberius configuration for the fixed connection-string policy.
///
/// # Errors
/// Returns `DriverError::MssqlError` if the connection string is rejected.
pub fn build_tiberius_config(options: &ContextOptions) -> Result<Config, DriverError> {
    let mut config = Config::from_ado_string(&options.connection_string())?;
    if options.trust_server_certificate {
        config.trust_cert();
    }
    Ok(config)
}

/// Open a new SQL Server connection, resolving named instances through the
/// SQL Browser service.
///
/// # Errors
/// Returns `DriverError::ConnectionError` if the server cannot be reached or
/// rejects the login.
pub async fn create_mssql_client(options: &ContextOptions) -> Result<MssqlClient, DriverError> {
    let config = build_tiberius_config(options)?;

    let tcp = TcpStream::connect_named(&config)
        .await
        .map_err(|e| DriverError::ConnectionError(format!("TCP connection error: {e}")))?;
    tcp.set_nodelay(true)
        .map_err(|e| DriverError::ConnectionError(format!("TCP configuration error: {e}")))?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| DriverError::ConnectionError(format!("SQL Server connection error: {e}")))
}
