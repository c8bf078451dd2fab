// SQLite backend - an in-process driver for the session layer
//
// - config: driver options and connection setup, including the put-line output function
// - params: bind parameter conversion between session values and SQLite values
// - query: statement batching, transaction start and row extraction
// - worker: the per-connection thread that owns the rusqlite handle and open cursors

pub mod config;
pub mod params;
pub mod query;
pub mod worker;

// Re-export the public API
pub use config::{PUT_LINE_FUNCTION, SqliteDriver, SqliteOptions, SqliteOptionsBuilder};
pub use worker::SqliteConnection;
