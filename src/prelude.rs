//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::config::SessionConfig;
pub use crate::deadline::{BudgetScope, BudgetSource, FixedBudgets, NoBudgets, TimeBudget};
pub use crate::driver::{
    CancelHandle, ConnectString, Driver, DriverConnection, DriverCursor, make_dsn,
};
pub use crate::engine::{ExecutionSnapshot, RowStream};
pub use crate::error::{CloseFailure, DriverError, SqlSessionError};
pub use crate::registry::ConnectionKey;
pub use crate::render::render_statement;
pub use crate::results::{ColumnIndex, MappedRow, TupleRow};
pub use crate::session::{ScopedConnection, Session, SessionBuilder};
pub use crate::types::{BindParams, DriverKind, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{PUT_LINE_FUNCTION, SqliteDriver, SqliteOptions, SqliteOptionsBuilder};
