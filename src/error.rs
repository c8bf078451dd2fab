use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`Driver`](crate::driver::Driver) implementation.
///
/// The session layer never inspects these beyond wrapping them; the text is what
/// callers ultimately see (for example an application error raised inside a block).
#[derive(Debug, Error)]
pub enum DriverError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Database(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("cursor is no longer open")]
    CursorClosed,

    #[error("no statement references bind variable :{0}")]
    UnknownBind(String),

    #[error("connection is closed")]
    Closed,

    #[error("driver worker failure: {0}")]
    Worker(String),
}

/// One failed close attempt collected by `close_all`.
#[derive(Debug)]
pub struct CloseFailure {
    pub index: usize,
    pub error: DriverError,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {}: {}", self.index, self.error)
    }
}

#[derive(Debug, Error)]
pub enum SqlSessionError {
    #[error("There is no open connection to the database.")]
    NoActiveConnection,

    #[error("Non-existing index or alias '{0}'.")]
    UnknownConnection(String),

    #[error("Alias '{0}' is already registered.")]
    DuplicateAlias(String),

    #[error("Logon to database error: {0}")]
    Connect(#[source] DriverError),

    #[error("{0}")]
    Statement(#[source] DriverError),

    #[error("Timeout is ended and equal as {}.", .0.as_secs_f64())]
    DeadlineExceeded(Duration),

    #[error("Result stream is no longer usable: {0}")]
    StreamLifecycle(String),

    #[error("Failed to close {} connection(s): {}", .0.len(), join_failures(.0))]
    CloseFailed(Vec<CloseFailure>),

    #[error("Cannot read script {path}: {source}")]
    Script {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

fn join_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for SqlSessionError {
    fn from(err: serde_json::Error) -> Self {
        SqlSessionError::Config(err.to_string())
    }
}
