use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::{MssqlClient, create_mssql_client};
use super::{bulk, query};
use crate::bulk::{BulkPlan, RowSource};
use crate::command::Command;
use crate::config::{ContextOptions, DEFAULT_COMMAND_TIMEOUT_SECS};
use crate::driver::{BufferedCursor, Canceller, ConnectionState, Driver, RowCursor};
use crate::error::DriverError;
use crate::results::ResultSet;

/// SQL Server connection driven from a private current-thread runtime.
///
/// Every call blocks until the round trip completes, so the driver must not
/// be used from inside another tokio runtime. A command that times out or is
/// cancelled leaves the TDS stream mid-response; the connection is then
/// marked broken and reopened before the next command.
pub struct MssqlDriver {
    options: ContextOptions,
    runtime: Runtime,
    client: Option<MssqlClient>,
    broken: bool,
    token: CancellationToken,
}

impl fmt::Debug for MssqlDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlDriver")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Await `fut` under the command timeout, giving up early on cancellation.
/// A timeout of zero waits without limit.
fn drive<T>(
    runtime: &Runtime,
    token: &CancellationToken,
    timeout_secs: u32,
    fut: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    runtime.block_on(async {
        let limited = async {
            if timeout_secs == 0 {
                return fut.await;
            }
            tokio::time::timeout(Duration::from_secs(u64::from(timeout_secs)), fut)
                .await
                .unwrap_or(Err(DriverError::Timeout(timeout_secs)))
        };
        tokio::select! {
            () = token.cancelled() => Err(DriverError::Cancelled),
            res = limited => res,
        }
    })
}

/// Whether a failure leaves the connection unusable.
fn breaks_connection(err: &DriverError) -> bool {
    matches!(
        err,
        DriverError::Timeout(_)
            | DriverError::Cancelled
            | DriverError::ConnectionError(_)
            | DriverError::MssqlError(tiberius::error::Error::Io { .. })
    )
}

impl MssqlDriver {
    /// No connection is opened until the first command.
    ///
    /// # Errors
    /// Returns `DriverError::ConnectionError` if the runtime cannot be created.
    pub fn new(options: ContextOptions) -> Result<Self, DriverError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::ConnectionError(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            options,
            runtime,
            client: None,
            broken: false,
            token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Run `op` against the open client, marking the connection broken when
    /// the failure leaves it unusable.
    fn run<T, F>(&mut self, timeout_secs: u32, op: F) -> Result<T, DriverError>
    where
        F: AsyncFnOnce(&mut MssqlClient) -> Result<T, DriverError>,
    {
        if self.broken {
            return Err(DriverError::ConnectionError(
                "SQL Server connection is broken".into(),
            ));
        }
        let Self {
            runtime,
            client,
            token,
            ..
        } = self;
        let client = client.as_mut().ok_or_else(|| {
            DriverError::ConnectionError("SQL Server connection is not open".into())
        })?;
        let result = drive(runtime, token, timeout_secs, op(client));
        if let Err(err) = &result {
            if breaks_connection(err) {
                debug!(error = %err, "marking SQL Server connection broken");
                self.broken = true;
            }
        }
        result
    }
}

struct MssqlCanceller(CancellationToken);

impl Canceller for MssqlCanceller {
    fn cancel(&self) -> Result<(), DriverError> {
        self.0.cancel();
        Ok(())
    }
}

impl Driver for MssqlDriver {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn state(&self) -> ConnectionState {
        match (&self.client, self.broken) {
            (_, true) => ConnectionState::Broken,
            (Some(_), false) => ConnectionState::Open,
            (None, false) => ConnectionState::Closed,
        }
    }

    fn open(&mut self) -> Result<(), DriverError> {
        if self.client.is_some() {
            return Ok(());
        }
        let connect_timeout = self.options.connect_timeout();
        let options = &self.options;
        let client = self.runtime.block_on(async {
            tokio::time::timeout(connect_timeout, create_mssql_client(options))
                .await
                .unwrap_or_else(|_| {
                    Err(DriverError::ConnectionError(format!(
                        "connect timed out after {}s",
                        connect_timeout.as_secs()
                    )))
                })
        })?;
        self.client = Some(client);
        self.broken = false;
        self.token = CancellationToken::new();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.broken = false;
        // A cancel belongs to the call that requested it.
        self.token = CancellationToken::new();
        match self.client.take() {
            Some(client) => {
                let closed = self
                    .runtime
                    .block_on(tokio::time::timeout(Duration::from_secs(5), client.close()));
                match closed {
                    Ok(result) => result.map_err(DriverError::from),
                    Err(_) => Err(DriverError::Timeout(5)),
                }
            }
            None => Ok(()),
        }
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.run(DEFAULT_COMMAND_TIMEOUT_SECS, async |client| {
            query::execute_simple(client, "BEGIN TRANSACTION").await
        })
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.run(DEFAULT_COMMAND_TIMEOUT_SECS, async |client| {
            query::execute_simple(client, "COMMIT TRANSACTION").await
        })
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let result = self.run(DEFAULT_COMMAND_TIMEOUT_SECS, async |client| {
            query::execute_simple(client, "ROLLBACK TRANSACTION").await
        });
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn query(&mut self, command: &Command) -> Result<Vec<ResultSet>, DriverError> {
        self.run(command.timeout_secs(), async |client| {
            query::build_result_sets(client, command).await
        })
    }

    fn execute(&mut self, command: &Command) -> Result<usize, DriverError> {
        self.run(command.timeout_secs(), async |client| {
            query::execute(client, command).await
        })
    }

    fn open_cursor(&mut self, command: &Command) -> Result<Box<dyn RowCursor>, DriverError> {
        let sets = self.query(command)?;
        Ok(Box::new(BufferedCursor::first_row_set(sets)))
    }

    fn bulk_copy(
        &mut self,
        plan: &BulkPlan,
        source: &mut dyn RowSource,
    ) -> Result<u64, DriverError> {
        let timeout = plan.timeout_secs().unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
        self.run(timeout, async |client| bulk::copy_rows(client, plan, source).await)
    }

    fn canceller(&mut self) -> Option<Arc<dyn Canceller>> {
        self.client.as_ref()?;
        self.token = CancellationToken::new();
        Some(Arc::new(MssqlCanceller(self.token.clone())))
    }
}
