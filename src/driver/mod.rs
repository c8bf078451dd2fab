// Driver seam - the primitives the session layer consumes but does not implement
//
// - connect: connection strings and DSN construction
//
// A driver hands out connections; a connection hands out cursors. Cursors own
// whatever they need to keep fetching, so a lazily consumed cursor never borrows
// its connection.

pub mod connect;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::types::{BindParams, RowValues};

pub use connect::{ConnectString, make_dsn};

/// Thread-safe, idempotent cancel primitive of one connection.
///
/// Called from the watchdog task while another task is blocked inside the driver.
pub trait CancelHandle: Send + Sync {
    fn cancel(&self);
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new session.
    ///
    /// # Errors
    /// Returns the driver's logon failure.
    async fn connect(&self, target: &ConnectString) -> Result<Box<dyn DriverConnection>, DriverError>;
}

#[async_trait]
pub trait DriverConnection: Send {
    /// `username@dsn`, used in logs.
    fn identity(&self) -> String;

    fn cancel_handle(&self) -> Arc<dyn CancelHandle>;

    async fn cursor(&mut self) -> Result<Box<dyn DriverCursor>, DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Enable the server-side output buffer.
    async fn enable_output(&mut self) -> Result<(), DriverError>;

    /// Next buffered output line, `None` once the buffer is exhausted.
    async fn output_line(&mut self) -> Result<Option<String>, DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DriverCursor: Send {
    async fn prepare(&mut self, statement: &str) -> Result<(), DriverError>;

    async fn execute(&mut self, params: &BindParams) -> Result<(), DriverError>;

    /// Column names of the executed statement; empty when it returns no rows.
    fn column_names(&self) -> &[String];

    async fn fetch_next(&mut self) -> Result<Option<Vec<RowValues>>, DriverError>;

    async fn fetch_all(&mut self) -> Result<Vec<Vec<RowValues>>, DriverError> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<(), DriverError>;
}
