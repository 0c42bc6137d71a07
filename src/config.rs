use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DbContextError;
use crate::types::DatabaseType;

pub(crate) const CONNECTION_STRING_PERSIST_SECURITY_INFO: &str = "False";
pub(crate) const CONNECTION_STRING_PACKET_SIZE: u32 = 4096;
pub(crate) const CONNECTION_STRING_CONNECT_TIMEOUT: u32 = 30;

/// Command timeout used when a call does not specify one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u32 = 30;

/// Name of the primary workspace database.
const MASTER_DATABASE: &str = "EDDS";

/// Per-command timeout.
///
/// `Timeout::from(-1)` is the "use the default" sentinel, not "no timeout".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Default,
    Seconds(i32),
}

impl Timeout {
    /// Resolve to whole seconds, rejecting explicit values below one.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` for a non-positive explicit timeout.
    pub fn resolve(self) -> Result<u32, DbContextError> {
        match self {
            Timeout::Default => Ok(DEFAULT_COMMAND_TIMEOUT_SECS),
            Timeout::Seconds(secs) if secs >= 1 => Ok(secs.unsigned_abs()),
            Timeout::Seconds(secs) => Err(DbContextError::invalid(
                "timeout",
                format!("[Value: {secs}]. 'timeout' should be greater than zero."),
            )),
        }
    }
}

impl From<i32> for Timeout {
    fn from(secs: i32) -> Self {
        if secs == -1 {
            Timeout::Default
        } else {
            Timeout::Seconds(secs)
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::Seconds(i32::try_from(duration.as_secs()).unwrap_or(i32::MAX))
    }
}

/// Options for building a [`DbContext`](crate::DbContext).
///
/// For SQL Server `server`/`database`/`user`/`password` are assembled into a
/// connection string with a fixed policy (see [`ContextOptions::connection_string`]).
/// For `SQLite`, `database` is the path of the database file and the remaining
/// fields are ignored.
#[derive(Clone, Serialize, Deserialize)]
pub struct ContextOptions {
    pub database_type: DatabaseType,
    pub server: String,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub trust_server_certificate: bool,
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("database_type", &self.database_type)
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("instance_name", &self.instance_name)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

impl ContextOptions {
    #[must_use]
    pub fn mssql(server: String, database: String, user: String, password: String) -> Self {
        Self {
            database_type: DatabaseType::Mssql,
            server,
            database,
            user,
            password,
            port: None,
            instance_name: None,
            trust_server_certificate: false,
        }
    }

    #[must_use]
    pub fn sqlite(db_path: String) -> Self {
        Self {
            database_type: DatabaseType::Sqlite,
            server: String::new(),
            database: db_path,
            user: String::new(),
            password: String::new(),
            port: None,
            instance_name: None,
            trust_server_certificate: false,
        }
    }

    /// ADO-style connection string: persist security info off, 4096 byte
    /// packets, 30 second connect timeout, SQL user/password authentication.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let mut data_source = self.server.clone();
        if let Some(instance) = &self.instance_name {
            data_source = format!("{data_source}\\{instance}");
        }
        if let Some(port) = self.port {
            data_source = format!("{data_source},{port}");
        }
        format!(
            "data source={data_source};initial catalog={};persist security info={CONNECTION_STRING_PERSIST_SECURITY_INFO};user id={};password={};packet size={CONNECTION_STRING_PACKET_SIZE};connect timeout={CONNECTION_STRING_CONNECT_TIMEOUT};",
            self.database, self.user, self.password,
        )
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(CONNECTION_STRING_CONNECT_TIMEOUT))
    }

    #[must_use]
    pub fn is_master_database(&self) -> bool {
        self.database.eq_ignore_ascii_case(MASTER_DATABASE)
    }
}

/// Fluent builder for [`ContextOptions`].
#[derive(Debug, Clone)]
pub struct ContextOptionsBuilder {
    opts: ContextOptions,
}

impl ContextOptionsBuilder {
    #[must_use]
    pub fn new(server: String, database: String, user: String, password: String) -> Self {
        Self {
            opts: ContextOptions::mssql(server, database, user, password),
        }
    }

    #[must_use]
    pub fn database_type(mut self, database_type: DatabaseType) -> Self {
        self.opts.database_type = database_type;
        self
    }

    #[must_use]
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.opts.port = port;
        self
    }

    #[must_use]
    pub fn instance_name(mut self, instance_name: Option<String>) -> Self {
        self.opts.instance_name = instance_name;
        self
    }

    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.opts.trust_server_certificate = trust;
        self
    }

    #[must_use]
    pub fn finish(self) -> ContextOptions {
        self.opts
    }

    /// Build a [`DbContext`](crate::DbContext). No connection is opened yet.
    ///
    /// # Errors
    /// Returns `DbContextError::InvalidArgument` when the options are incomplete
    /// or name a driver that was not compiled in.
    pub fn build(self) -> Result<crate::DbContext, DbContextError> {
        crate::DbContext::from_options(self.finish())
    }
}
