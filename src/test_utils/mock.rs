use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::driver::{CancelHandle, ConnectString, Driver, DriverConnection, DriverCursor};
use crate::error::DriverError;
use crate::types::{BindParams, RowValues};

/// One call the session layer made into the mock driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Identity of the opened connection.
    Connect(String),
    Cursor,
    Prepare(String),
    /// Bind names, in order.
    Execute(Vec<String>),
    Fetch,
    CloseCursor,
    Commit,
    Rollback,
    EnableOutput,
    OutputLine,
    Close,
    Cancel,
}

#[derive(Debug, Default)]
struct Script {
    columns: Vec<String>,
    rows: Vec<Vec<RowValues>>,
    output: Vec<String>,
    fail_connect: Option<String>,
    fail_execute: Option<String>,
    fail_rollback: bool,
    fail_close: bool,
    hang_execute: bool,
}

/// Shared state behind every connection a [`MockDriver`] opens.
#[derive(Debug, Default)]
pub struct MockState {
    events: Mutex<Vec<DriverEvent>>,
    script: Mutex<Script>,
    cancel_requested: AtomicBool,
    cancelled: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockState {
    fn record(&self, event: DriverEvent) {
        lock(&self.events).push(event);
    }

    #[must_use]
    pub fn events(&self) -> Vec<DriverEvent> {
        lock(&self.events).clone()
    }

    pub fn clear_events(&self) {
        lock(&self.events).clear();
    }

    #[must_use]
    pub fn count(&self, event: &DriverEvent) -> usize {
        lock(&self.events).iter().filter(|e| *e == event).count()
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(&DriverEvent::Commit)
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(&DriverEvent::Rollback)
    }

    #[must_use]
    pub fn cancels(&self) -> usize {
        self.count(&DriverEvent::Cancel)
    }

    /// Rows every later query returns.
    pub fn set_rows(&self, columns: &[&str], rows: Vec<Vec<RowValues>>) {
        let mut script = lock(&self.script);
        script.columns = columns.iter().map(ToString::to_string).collect();
        script.rows = rows;
    }

    /// Lines the output buffer yields after each block.
    pub fn set_output(&self, lines: &[&str]) {
        lock(&self.script).output = lines.iter().map(ToString::to_string).collect();
    }

    pub fn set_fail_connect(&self, message: Option<&str>) {
        lock(&self.script).fail_connect = message.map(str::to_string);
    }

    pub fn set_fail_execute(&self, message: Option<&str>) {
        lock(&self.script).fail_execute = message.map(str::to_string);
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        lock(&self.script).fail_rollback = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        lock(&self.script).fail_close = fail;
    }

    /// Make `execute` block until the connection is cancelled.
    pub fn set_hang_execute(&self, hang: bool) {
        lock(&self.script).hang_execute = hang;
    }

    fn cancel(&self) {
        self.record(DriverEvent::Cancel);
        self.cancel_requested.store(true, Ordering::Release);
        self.cancelled.notify_waiters();
    }

    async fn wait_for_cancel(&self) {
        loop {
            let notified = self.cancelled.notified();
            if self.cancel_requested.swap(false, Ordering::AcqRel) {
                return;
            }
            notified.await;
        }
    }
}

/// Scripted driver for exercising the session layer without a database.
///
/// ```rust
/// use sql_session::prelude::*;
/// use sql_session::test_utils::MockDriver;
///
/// let driver = MockDriver::new().with_rows(&["id"], vec![vec![RowValues::Int(1)]]);
/// let state = driver.state();
/// let _session = Session::new(driver);
/// assert_eq!(state.commits(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn with_rows(self, columns: &[&str], rows: Vec<Vec<RowValues>>) -> Self {
        self.state.set_rows(columns, rows);
        self
    }

    #[must_use]
    pub fn with_output(self, lines: &[&str]) -> Self {
        self.state.set_output(lines);
        self
    }

    #[must_use]
    pub fn failing_execute(self, message: &str) -> Self {
        self.state.set_fail_execute(Some(message));
        self
    }

    #[must_use]
    pub fn hanging_execute(self) -> Self {
        self.state.set_hang_execute(true);
        self
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, target: &ConnectString) -> Result<Box<dyn DriverConnection>, DriverError> {
        if let Some(message) = lock(&self.state.script).fail_connect.clone() {
            return Err(DriverError::Database(message));
        }
        let identity = target.identity();
        self.state.record(DriverEvent::Connect(identity.clone()));
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            identity,
            closed: false,
            output: VecDeque::new(),
        }))
    }
}

struct MockCancel(Arc<MockState>);

impl CancelHandle for MockCancel {
    fn cancel(&self) {
        self.0.cancel();
    }
}

struct MockConnection {
    state: Arc<MockState>,
    identity: String,
    closed: bool,
    output: VecDeque<String>,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn cancel_handle(&self) -> Arc<dyn CancelHandle> {
        Arc::new(MockCancel(Arc::clone(&self.state)))
    }

    async fn cursor(&mut self) -> Result<Box<dyn DriverCursor>, DriverError> {
        self.ensure_open()?;
        self.state.record(DriverEvent::Cursor);
        Ok(Box::new(MockCursor {
            state: Arc::clone(&self.state),
            columns: Vec::new(),
            rows: VecDeque::new(),
        }))
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.state.record(DriverEvent::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.state.record(DriverEvent::Rollback);
        if lock(&self.state.script).fail_rollback {
            return Err(DriverError::Database("rollback refused".into()));
        }
        Ok(())
    }

    async fn enable_output(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.state.record(DriverEvent::EnableOutput);
        self.output = lock(&self.state.script).output.iter().cloned().collect();
        Ok(())
    }

    async fn output_line(&mut self) -> Result<Option<String>, DriverError> {
        self.ensure_open()?;
        self.state.record(DriverEvent::OutputLine);
        Ok(self.output.pop_front())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.state.record(DriverEvent::Close);
        if lock(&self.state.script).fail_close {
            return Err(DriverError::Database("close refused".into()));
        }
        self.closed = true;
        Ok(())
    }
}

struct MockCursor {
    state: Arc<MockState>,
    columns: Vec<String>,
    rows: VecDeque<Vec<RowValues>>,
}

#[async_trait]
impl DriverCursor for MockCursor {
    async fn prepare(&mut self, statement: &str) -> Result<(), DriverError> {
        self.state.record(DriverEvent::Prepare(statement.to_string()));
        Ok(())
    }

    async fn execute(&mut self, params: &BindParams) -> Result<(), DriverError> {
        self.state.record(DriverEvent::Execute(
            params.iter().map(|(name, _)| name.to_string()).collect(),
        ));
        let (hang, failure) = {
            let script = lock(&self.state.script);
            (script.hang_execute, script.fail_execute.clone())
        };
        if hang {
            self.state.wait_for_cancel().await;
            return Err(DriverError::Cancelled);
        }
        if let Some(message) = failure {
            return Err(DriverError::Database(message));
        }
        let script = lock(&self.state.script);
        self.columns.clone_from(&script.columns);
        self.rows = script.rows.iter().cloned().collect();
        Ok(())
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    async fn fetch_next(&mut self) -> Result<Option<Vec<RowValues>>, DriverError> {
        self.state.record(DriverEvent::Fetch);
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.state.record(DriverEvent::CloseCursor);
        Ok(())
    }
}
