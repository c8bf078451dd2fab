//! Session and execution layer over relational connections.
//!
//! A [`Session`] keeps several connections open at once, addressable by index or alias,
//! and runs parameterized statements on the current one. Every execution renders its
//! statement for the log, runs under a watchdog that cancels the driver call once the
//! deadline passes, commits blocks, and always rolls back before returning.
//!
//! Results come back as value tuples, column-name mappings, or a lazily consumed
//! [`RowStream`].
//!
//! ```rust,no_run
//! use sql_session::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlSessionError> {
//! let mut session = Session::new(SqliteDriver::default());
//! session.connect(":memory:", "app", None, None).await?;
//! let lines = session
//!     .execute_block_with_output(
//!         "SELECT dbms_output_put_line('hello ' || :who)",
//!         &BindParams::new().bind("who", "world"),
//!     )
//!     .await?;
//! assert_eq!(lines, vec!["hello world".to_string()]);
//! # Ok(()) }
//! ```

pub mod config;
pub mod connection;
pub mod deadline;
pub mod driver;
pub mod engine;
pub mod error;
pub mod prelude;
pub mod registry;
pub mod render;
pub mod results;
pub mod session;
pub mod types;
pub mod watchdog;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::SessionConfig;
pub use engine::{ExecutionSnapshot, RowStream};
pub use error::{DriverError, SqlSessionError};
pub use session::{ScopedConnection, Session, SessionBuilder};
pub use types::{BindParams, RowValues};
