use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;

use super::worker::{OutputBuffer, SqliteConnection};
use crate::driver::{ConnectString, Driver, DriverConnection};
use crate::error::DriverError;

/// SQL function that appends a line to the connection's output buffer.
pub const PUT_LINE_FUNCTION: &str = "dbms_output_put_line";

/// Options applied to every `SQLite` connection the driver opens.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub busy_timeout: Duration,
    /// Batch run right after opening, e.g. `PRAGMA foreign_keys = ON;`.
    pub init_sql: Option<String>,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            init_sql: None,
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone, Default)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn init_sql(mut self, init_sql: impl Into<String>) -> Self {
        self.opts.init_sql = Some(init_sql.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    #[must_use]
    pub fn build(self) -> SqliteDriver {
        SqliteDriver::new(self.finish())
    }
}

/// In-process driver: `dbname` is a database file path or `:memory:`.
///
/// Username and password only feed the connection identity shown in logs.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    opts: SqliteOptions,
}

impl SqliteDriver {
    #[must_use]
    pub fn new(opts: SqliteOptions) -> Self {
        Self { opts }
    }

    #[must_use]
    pub fn builder() -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new()
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self, target: &ConnectString) -> Result<Box<dyn DriverConnection>, DriverError> {
        let opts = self.opts.clone();
        let path = target.dbname.clone();
        let (conn, output) = tokio::task::spawn_blocking(move || open_connection(&path, &opts))
            .await
            .map_err(|err| DriverError::Worker(format!("SQLite open task failed: {err}")))??;
        let connection = SqliteConnection::spawn(conn, output, target.identity())?;
        Ok(Box::new(connection))
    }
}

fn open_connection(
    path: &str,
    opts: &SqliteOptions,
) -> Result<(Connection, Arc<OutputBuffer>), DriverError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(opts.busy_timeout)?;
    if let Some(init_sql) = &opts.init_sql {
        conn.execute_batch(init_sql)?;
    }

    let output = Arc::new(OutputBuffer::default());
    let sink = Arc::clone(&output);
    conn.create_scalar_function(PUT_LINE_FUNCTION, 1, FunctionFlags::SQLITE_UTF8, move |ctx| {
        let line = match ctx.get::<Value>(0)? {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Text(s) => s,
            Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
        };
        sink.put_line(line);
        Ok(rusqlite::types::Null)
    })?;
    Ok((conn, output))
}
