#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sql_context::bulk::{BulkPlan, RowSource};
use sql_context::command::Command;
use sql_context::driver::{BufferedCursor, Canceller, ConnectionState, Driver, RowCursor};
use sql_context::{ContextOptions, DbContext, DriverError, ResultSet, RowValues};

/// Failures to inject into a [`ScriptedDriver`].
#[derive(Debug)]
pub struct Script {
    pub fail_begin: bool,
    pub fail_statement: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_cancel: bool,
    /// Reported as `Broken` while open, until the next close.
    pub broken: bool,
    /// Row sets returned per statement, each one column `n` holding 1, 2, ...
    pub row_sets: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_begin: false,
            fail_statement: false,
            fail_commit: false,
            fail_rollback: false,
            fail_cancel: false,
            broken: false,
            row_sets: 1,
        }
    }
}

/// Shared view of what the driver was asked to do.
#[derive(Clone, Default)]
pub struct Handle {
    log: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<Script>>,
}

impl Handle {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.script.lock().unwrap());
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn fail(&self, pick: impl FnOnce(&Script) -> bool, what: &str) -> Result<(), DriverError> {
        if pick(&self.script.lock().unwrap()) {
            Err(DriverError::ExecutionError(format!("scripted {what} failure")))
        } else {
            Ok(())
        }
    }
}

/// In-memory driver that logs every call and fails on request.
///
/// Cancellation works like a token: a successful cancel fails every later
/// command until [`Driver::canceller`] hands out a fresh one.
pub struct ScriptedDriver {
    handle: Handle,
    open: bool,
    cancelled: Arc<AtomicBool>,
}

impl ScriptedDriver {
    fn check_cancelled(&self) -> Result<(), DriverError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn row_sets(&self) -> Vec<ResultSet> {
        let count = self.handle.script.lock().unwrap().row_sets;
        (1..=count)
            .map(|n| {
                let mut set = ResultSet::with_capacity(1);
                set.set_column_names(Arc::new(vec!["n".to_string()]));
                set.add_row_values(vec![RowValues::Int(n as i64)]);
                set
            })
            .collect()
    }
}

struct ScriptedCanceller {
    handle: Handle,
    cancelled: Arc<AtomicBool>,
}

impl Canceller for ScriptedCanceller {
    fn cancel(&self) -> Result<(), DriverError> {
        self.handle.record("cancel");
        self.handle.fail(|s| s.fail_cancel, "cancel")?;
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn state(&self) -> ConnectionState {
        if !self.open {
            ConnectionState::Closed
        } else if self.handle.script.lock().unwrap().broken {
            ConnectionState::Broken
        } else {
            ConnectionState::Open
        }
    }

    fn open(&mut self) -> Result<(), DriverError> {
        self.handle.record("open");
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.open {
            self.handle.record("close");
        }
        self.open = false;
        self.handle.script(|s| s.broken = false);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.handle.record("begin");
        self.check_cancelled()?;
        self.handle.fail(|s| s.fail_begin, "begin")
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.handle.record("commit");
        self.check_cancelled()?;
        self.handle.fail(|s| s.fail_commit, "commit")
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.handle.record("rollback");
        self.handle.fail(|s| s.fail_rollback, "rollback")
    }

    fn query(&mut self, command: &Command) -> Result<Vec<ResultSet>, DriverError> {
        self.handle.record(format!("query:{}", command.text()));
        self.check_cancelled()?;
        self.handle.fail(|s| s.fail_statement, "statement")?;
        Ok(self.row_sets())
    }

    fn execute(&mut self, command: &Command) -> Result<usize, DriverError> {
        self.handle.record(format!("execute:{}", command.text()));
        self.check_cancelled()?;
        self.handle.fail(|s| s.fail_statement, "statement")?;
        Ok(1)
    }

    fn open_cursor(&mut self, command: &Command) -> Result<Box<dyn RowCursor>, DriverError> {
        self.handle.record(format!("cursor:{}", command.text()));
        self.check_cancelled()?;
        self.handle.fail(|s| s.fail_statement, "statement")?;
        Ok(Box::new(BufferedCursor::first_row_set(self.row_sets())))
    }

    fn bulk_copy(
        &mut self,
        plan: &BulkPlan,
        source: &mut dyn RowSource,
    ) -> Result<u64, DriverError> {
        let mut copied = 0;
        while let Some(row) = source.next_row()? {
            plan.project(&row)?;
            copied += 1;
        }
        self.handle
            .record(format!("bulk:{}:{copied}", plan.destination()));
        Ok(copied)
    }

    fn canceller(&mut self) -> Option<Arc<dyn Canceller>> {
        self.cancelled = Arc::new(AtomicBool::new(false));
        Some(Arc::new(ScriptedCanceller {
            handle: self.handle.clone(),
            cancelled: Arc::clone(&self.cancelled),
        }))
    }
}

pub fn scripted_context() -> (DbContext, Handle) {
    let handle = Handle::default();
    let driver = ScriptedDriver {
        handle: handle.clone(),
        open: false,
        cancelled: Arc::new(AtomicBool::new(false)),
    };
    let ctx = DbContext::with_driver(ContextOptions::sqlite("scripted".into()), Box::new(driver));
    (ctx, handle)
}
