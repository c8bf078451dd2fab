use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::connection::ConnectionHandle;
use crate::deadline::{BudgetSource, NoBudgets};
use crate::driver::{ConnectString, Driver};
use crate::engine::{ActiveConnection, ExecutionEngine, ExecutionSnapshot, RowStream};
use crate::error::SqlSessionError;
use crate::registry::{ConnectionKey, ConnectionRegistry};
use crate::results::{MappedRow, TupleRow};
use crate::types::{BindParams, DriverKind};

/// Keyword-level surface: a registry of open connections plus the execution engine
/// that runs statements on whichever connection is current.
///
/// All operations take `&mut self`; a session is driven by one logical caller at a time.
///
/// ```rust,no_run
/// use sql_session::prelude::*;
///
/// # async fn demo() -> Result<(), SqlSessionError> {
/// let mut session = Session::new(SqliteDriver::default());
/// session.connect("app.db", "scott", Some("tiger"), Some("main")).await?;
/// session
///     .execute_block(
///         "INSERT INTO people (id, name) VALUES (:id, :name)",
///         &BindParams::new().bind("id", 1).bind("name", "alice"),
///     )
///     .await?;
/// let rows = session
///     .execute_query_mapped("SELECT id, name FROM people", &BindParams::new())
///     .await?;
/// # let _ = rows;
/// session.close_all().await?;
/// # Ok(()) }
/// ```
pub struct Session {
    driver: Arc<dyn Driver>,
    registry: ConnectionRegistry<ConnectionHandle>,
    engine: ExecutionEngine,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connections", &self.registry.len())
            .field("current", &self.registry.current_index())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session with the default 900 second ceiling and no ambient budgets.
    #[must_use]
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Self::builder(driver).build()
    }

    #[must_use]
    pub fn builder<D: Driver + 'static>(driver: D) -> SessionBuilder {
        SessionBuilder {
            driver: Arc::new(driver),
            config: SessionConfig::default(),
            budgets: Arc::new(NoBudgets),
        }
    }

    #[must_use]
    pub fn from_config<D: Driver + 'static>(driver: D, config: SessionConfig) -> Self {
        Self::builder(driver).config(config).build()
    }

    /// Session on the driver named by `config.driver`.
    ///
    /// # Errors
    /// `Config` when that driver is not compiled into this build.
    pub fn open(config: SessionConfig) -> Result<Self, SqlSessionError> {
        match config.driver {
            #[cfg(feature = "sqlite")]
            DriverKind::Sqlite => Ok(Self::from_config(
                crate::sqlite::SqliteDriver::default(),
                config,
            )),
            #[cfg(not(feature = "sqlite"))]
            kind => Err(SqlSessionError::Config(format!(
                "driver {kind:?} is not enabled in this build"
            ))),
        }
    }

    /// Build a DSN for [`connect`](Self::connect); an empty `service_name` selects `sid`.
    #[must_use]
    pub fn make_dsn(host: &str, port: u16, sid: &str, service_name: &str) -> String {
        crate::driver::make_dsn(host, port, sid, service_name)
    }

    /// Open a connection, register it and make it current.
    ///
    /// Returns the new connection's index.
    ///
    /// # Errors
    /// `DuplicateAlias` before anything is opened, or `Connect` wrapping the logon failure.
    pub async fn connect(
        &mut self,
        dbname: &str,
        username: &str,
        password: Option<&str>,
        alias: Option<&str>,
    ) -> Result<usize, SqlSessionError> {
        let target = ConnectString::new(dbname, username, password);
        self.connect_with(&target, alias).await
    }

    /// # Errors
    /// See [`connect`](Self::connect).
    pub async fn connect_with(
        &mut self,
        target: &ConnectString,
        alias: Option<&str>,
    ) -> Result<usize, SqlSessionError> {
        self.registry.ensure_alias_free(alias)?;
        tracing::debug!("Connecting using : {}", target.redacted());
        let connection = self
            .driver
            .connect(target)
            .await
            .map_err(SqlSessionError::Connect)?;
        let index = self
            .registry
            .register(ConnectionHandle::new(connection), alias)?;
        tracing::debug!(index, alias, "connection registered");
        Ok(index)
    }

    /// Close the current connection. Other connections keep their indices.
    ///
    /// # Errors
    /// `NoActiveConnection`, or `CloseFailed` when the driver refuses to close.
    pub async fn disconnect(&mut self) -> Result<(), SqlSessionError> {
        self.registry.close_current().await
    }

    /// Close every connection; the next one opened gets index 1.
    ///
    /// # Errors
    /// `CloseFailed` listing every connection that failed to close.
    pub async fn close_all(&mut self) -> Result<(), SqlSessionError> {
        self.registry.close_all().await
    }

    /// Make another connection current and return the index that was current before.
    ///
    /// String keys are looked up as aliases first, then parsed as indices.
    ///
    /// # Errors
    /// `UnknownConnection` when nothing matches.
    pub fn switch_connection(
        &mut self,
        key: impl Into<ConnectionKey>,
    ) -> Result<Option<usize>, SqlSessionError> {
        self.registry.switch(&key.into())
    }

    /// Switch to `key` for the lifetime of the returned guard.
    ///
    /// The previously current connection is restored when the guard drops.
    ///
    /// # Errors
    /// `UnknownConnection` when nothing matches; the current connection is unchanged.
    pub fn use_connection(
        &mut self,
        key: impl Into<ConnectionKey>,
    ) -> Result<ScopedConnection<'_>, SqlSessionError> {
        let previous = self.switch_connection(key)?;
        Ok(ScopedConnection {
            session: self,
            previous,
        })
    }

    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.registry.current_index()
    }

    /// `username@dsn` of the current connection.
    ///
    /// # Errors
    /// `NoActiveConnection`.
    pub fn connection_identity(&self) -> Result<&str, SqlSessionError> {
        self.registry.current().map(|(_, handle)| handle.identity())
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// What the most recent execution ran.
    #[must_use]
    pub fn last_execution(&self) -> Option<&ExecutionSnapshot> {
        self.engine.last_execution()
    }

    /// Execute a write, DDL statement or anonymous block and commit it.
    ///
    /// # Errors
    /// `NoActiveConnection`, `Statement` or `DeadlineExceeded`.
    pub async fn execute_block(
        &mut self,
        statement: &str,
        params: &BindParams,
    ) -> Result<(), SqlSessionError> {
        let (index, handle) = self.registry.current()?;
        self.engine
            .execute_block(ActiveConnection { index, handle }, statement, params)
            .await
    }

    /// Execute a block with the output buffer enabled and return its lines in order.
    ///
    /// # Errors
    /// `NoActiveConnection`, `Statement` or `DeadlineExceeded`.
    pub async fn execute_block_with_output(
        &mut self,
        statement: &str,
        params: &BindParams,
    ) -> Result<Vec<String>, SqlSessionError> {
        let (index, handle) = self.registry.current()?;
        self.engine
            .execute_block_with_output(ActiveConnection { index, handle }, statement, params)
            .await
    }

    /// Read a script file and execute it as one block.
    ///
    /// # Errors
    /// `Script` when the file cannot be read, otherwise as [`execute_block`](Self::execute_block).
    pub async fn run_script(
        &mut self,
        path: impl AsRef<Path>,
        params: &BindParams,
    ) -> Result<(), SqlSessionError> {
        let path = path.as_ref();
        let script = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SqlSessionError::Script {
                path: path.display().to_string(),
                source,
            })?;
        self.execute_block(&script, params).await
    }

    /// # Errors
    /// `NoActiveConnection`, `Statement` or `DeadlineExceeded`.
    pub async fn execute_query(
        &mut self,
        statement: &str,
        params: &BindParams,
    ) -> Result<Vec<TupleRow>, SqlSessionError> {
        let (index, handle) = self.registry.current()?;
        self.engine
            .execute_query(ActiveConnection { index, handle }, statement, params)
            .await
    }

    /// # Errors
    /// `NoActiveConnection`, `Statement` or `DeadlineExceeded`.
    pub async fn execute_query_mapped(
        &mut self,
        statement: &str,
        params: &BindParams,
    ) -> Result<Vec<MappedRow>, SqlSessionError> {
        let (index, handle) = self.registry.current()?;
        self.engine
            .execute_query_mapped(ActiveConnection { index, handle }, statement, params)
            .await
    }

    /// Execute a query and return its rows lazily.
    ///
    /// Drain or [`close`](RowStream::close) the stream before switching away from or
    /// closing its connection; afterwards it only yields `StreamLifecycle`.
    ///
    /// # Errors
    /// `NoActiveConnection`, `Statement` or `DeadlineExceeded`.
    pub async fn execute_query_streamed(
        &mut self,
        statement: &str,
        params: &BindParams,
    ) -> Result<RowStream, SqlSessionError> {
        let lease = self.registry.issue_lease()?;
        let (index, handle) = self.registry.current()?;
        self.engine
            .open_stream(ActiveConnection { index, handle }, statement, params, lease)
            .await
    }
}

pub struct SessionBuilder {
    driver: Arc<dyn Driver>,
    config: SessionConfig,
    budgets: Arc<dyn BudgetSource>,
}

impl SessionBuilder {
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Ambient time budgets consulted before every execution.
    #[must_use]
    pub fn budgets(mut self, budgets: Arc<dyn BudgetSource>) -> Self {
        self.budgets = budgets;
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        Session {
            driver: self.driver,
            registry: ConnectionRegistry::new(),
            engine: ExecutionEngine::new(
                self.config.default_timeout(),
                self.config.preview_rows,
                self.budgets,
            ),
        }
    }
}

/// A session temporarily switched to another connection; see [`Session::use_connection`].
pub struct ScopedConnection<'a> {
    session: &'a mut Session,
    previous: Option<usize>,
}

impl ScopedConnection<'_> {
    /// Index that becomes current again when the guard drops.
    #[must_use]
    pub fn previous_index(&self) -> Option<usize> {
        self.previous
    }
}

impl Deref for ScopedConnection<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for ScopedConnection<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for ScopedConnection<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.session.registry.restore(self.previous) {
            tracing::warn!(
                previous = self.previous,
                "could not restore previous connection: {err}"
            );
        }
    }
}
