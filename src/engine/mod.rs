// Execution engine - one guarded lifecycle per call
//
// render-for-log -> cursor -> prepare -> arm watchdog -> execute (+ eager fetch)
// -> disarm -> commit (blocks only) -> rollback, always.
//
// - stream: the lazily consumed result, which takes over the final rollback

pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionHandle;
use crate::deadline::{BudgetSource, DEFAULT_TIMEOUT, NoBudgets, resolve_deadline};
use crate::driver::{CancelHandle, DriverConnection, DriverCursor};
use crate::error::SqlSessionError;
use crate::registry::StreamLease;
use crate::render::{DEFAULT_PREVIEW_ROWS, render_statement, result_preview, wrap_into_details};
use crate::results::{ColumnIndex, MappedRow, TupleRow};
use crate::types::BindParams;
use crate::watchdog::{Watchdog, WatchdogOutcome};

pub use stream::RowStream;

/// What the most recent execution ran, recorded before anything is sent to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    /// Statement text as sent to the driver.
    pub statement: String,
    /// Statement with bind values substituted, as logged.
    pub rendered: String,
    pub params: BindParams,
    pub connection_index: usize,
    pub deadline: Option<Duration>,
}

/// The connection an execution runs on.
#[derive(Debug, Clone, Copy)]
pub struct ActiveConnection<'a> {
    pub index: usize,
    pub handle: &'a ConnectionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Block,
    BlockWithOutput,
    Tuples,
    Mappings,
    Stream,
}

impl Plan {
    fn commits(self) -> bool {
        matches!(self, Plan::Block | Plan::BlockWithOutput)
    }
}

enum Materialized {
    Done,
    Output(Vec<String>),
    Tuples(Vec<TupleRow>),
    Mappings(Vec<MappedRow>),
    Open(Box<dyn DriverCursor>, Arc<ColumnIndex>),
}

pub struct ExecutionEngine {
    default_timeout: Option<Duration>,
    preview_rows: i64,
    budgets: Arc<dyn BudgetSource>,
    last: Option<ExecutionSnapshot>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(Some(DEFAULT_TIMEOUT), DEFAULT_PREVIEW_ROWS, Arc::new(NoBudgets))
    }
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(
        default_timeout: Option<Duration>,
        preview_rows: i64,
        budgets: Arc<dyn BudgetSource>,
    ) -> Self {
        Self {
            default_timeout,
            preview_rows,
            budgets,
            last: None,
        }
    }

    #[must_use]
    pub fn last_execution(&self) -> Option<&ExecutionSnapshot> {
        self.last.as_ref()
    }

    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    #[must_use]
    pub fn preview_rows(&self) -> i64 {
        self.preview_rows
    }

    /// Execute a write, DDL statement or anonymous block and commit it.
    ///
    /// # Errors
    /// `Statement` for driver failures, `DeadlineExceeded` when the watchdog fired.
    pub async fn execute_block(
        &mut self,
        active: ActiveConnection<'_>,
        statement: &str,
        params: &BindParams,
    ) -> Result<(), SqlSessionError> {
        self.run(active, statement, params, Plan::Block)
            .await
            .map(|_| ())
    }

    /// Execute a block with the output buffer enabled and return the lines it produced.
    ///
    /// # Errors
    /// `Statement` for driver failures, `DeadlineExceeded` when the watchdog fired.
    pub async fn execute_block_with_output(
        &mut self,
        active: ActiveConnection<'_>,
        statement: &str,
        params: &BindParams,
    ) -> Result<Vec<String>, SqlSessionError> {
        match self.run(active, statement, params, Plan::BlockWithOutput).await? {
            Materialized::Output(lines) => Ok(lines),
            _ => Ok(Vec::new()),
        }
    }

    /// Fetch every row as a value tuple.
    ///
    /// # Errors
    /// `Statement` for driver failures, `DeadlineExceeded` when the watchdog fired.
    pub async fn execute_query(
        &mut self,
        active: ActiveConnection<'_>,
        statement: &str,
        params: &BindParams,
    ) -> Result<Vec<TupleRow>, SqlSessionError> {
        match self.run(active, statement, params, Plan::Tuples).await? {
            Materialized::Tuples(rows) => {
                tracing::info!("{}", result_preview(&rows, self.preview_rows));
                Ok(rows)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Fetch every row as a column-name mapping.
    ///
    /// # Errors
    /// `Statement` for driver failures, `DeadlineExceeded` when the watchdog fired.
    pub async fn execute_query_mapped(
        &mut self,
        active: ActiveConnection<'_>,
        statement: &str,
        params: &BindParams,
    ) -> Result<Vec<MappedRow>, SqlSessionError> {
        match self.run(active, statement, params, Plan::Mappings).await? {
            Materialized::Mappings(rows) => {
                tracing::info!("{}", result_preview(&rows, self.preview_rows));
                Ok(rows)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Execute a query and hand back its rows lazily.
    ///
    /// The returned stream owns the cursor and the final rollback; it must be drained
    /// or closed before its connection is switched away from or closed.
    ///
    /// # Errors
    /// `Statement` for driver failures, `DeadlineExceeded` when the watchdog fired.
    pub async fn open_stream(
        &mut self,
        active: ActiveConnection<'_>,
        statement: &str,
        params: &BindParams,
        lease: StreamLease,
    ) -> Result<RowStream, SqlSessionError> {
        match self.run(active, statement, params, Plan::Stream).await {
            Ok(Materialized::Open(cursor, columns)) => Ok(RowStream::new(
                cursor,
                columns,
                active.handle.clone(),
                lease,
            )),
            Ok(_) => {
                lease.release();
                Err(SqlSessionError::StreamLifecycle(
                    "statement did not open a cursor".into(),
                ))
            }
            Err(err) => {
                lease.release();
                Err(err)
            }
        }
    }

    async fn run(
        &mut self,
        active: ActiveConnection<'_>,
        statement: &str,
        params: &BindParams,
        plan: Plan,
    ) -> Result<Materialized, SqlSessionError> {
        let deadline = resolve_deadline(&self.budgets.budgets(), self.default_timeout);
        let rendered = render_statement(statement, params);
        tracing::info!(
            index = active.index,
            "{}",
            wrap_into_details(
                &rendered,
                &format!("Executed PL/SQL statement on {}", active.handle.identity())
            )
        );
        self.last = Some(ExecutionSnapshot {
            statement: statement.to_string(),
            rendered,
            params: params.clone(),
            connection_index: active.index,
            deadline,
        });

        let mut conn = active.handle.lock().await;
        let outcome: Result<Materialized, SqlSessionError> = async {
            let materialized = guarded(
                conn.as_mut(),
                active.handle.canceller(),
                statement,
                params,
                plan,
                deadline,
            )
            .await?;
            if plan.commits() {
                conn.commit().await.map_err(SqlSessionError::Statement)?;
            }
            if plan == Plan::BlockWithOutput {
                return drain_output(conn.as_mut()).await.map(Materialized::Output);
            }
            Ok(materialized)
        }
        .await;

        if matches!(outcome, Ok(Materialized::Open(..))) {
            return outcome;
        }
        finish(conn.as_mut(), outcome).await
    }
}

/// Prepare, then execute (and for eager plans fetch) under the watchdog.
async fn guarded(
    conn: &mut dyn DriverConnection,
    canceller: Arc<dyn CancelHandle>,
    statement: &str,
    params: &BindParams,
    plan: Plan,
    deadline: Option<Duration>,
) -> Result<Materialized, SqlSessionError> {
    let mut cursor = conn.cursor().await.map_err(SqlSessionError::Statement)?;
    if plan == Plan::BlockWithOutput {
        conn.enable_output()
            .await
            .map_err(SqlSessionError::Statement)?;
    }
    cursor
        .prepare(statement)
        .await
        .map_err(SqlSessionError::Statement)?;

    let watchdog = Watchdog::arm(deadline, canceller);
    let result = execute_plan(cursor, params, plan).await;
    match watchdog.disarm() {
        WatchdogOutcome::Fired(interval) => {
            tracing::debug!(
                "SQL execution timeout {} seconds exceeded.",
                interval.as_secs_f64()
            );
            Err(SqlSessionError::DeadlineExceeded(interval))
        }
        WatchdogOutcome::Idle | WatchdogOutcome::Disarmed => result,
    }
}

async fn execute_plan(
    mut cursor: Box<dyn DriverCursor>,
    params: &BindParams,
    plan: Plan,
) -> Result<Materialized, SqlSessionError> {
    cursor
        .execute(params)
        .await
        .map_err(SqlSessionError::Statement)?;

    let materialized = match plan {
        Plan::Block | Plan::BlockWithOutput => {
            // a block ending in a row statement still runs for every row
            if !cursor.column_names().is_empty() {
                cursor
                    .fetch_all()
                    .await
                    .map_err(SqlSessionError::Statement)?;
            }
            Materialized::Done
        }
        Plan::Tuples => {
            let rows = cursor
                .fetch_all()
                .await
                .map_err(SqlSessionError::Statement)?;
            Materialized::Tuples(rows)
        }
        Plan::Mappings => {
            let columns = column_index(cursor.as_ref());
            let rows = cursor
                .fetch_all()
                .await
                .map_err(SqlSessionError::Statement)?
                .into_iter()
                .map(|values| MappedRow::new(Arc::clone(&columns), values))
                .collect();
            Materialized::Mappings(rows)
        }
        Plan::Stream => {
            let columns = column_index(cursor.as_ref());
            return Ok(Materialized::Open(cursor, columns));
        }
    };
    cursor.close().await.map_err(SqlSessionError::Statement)?;
    Ok(materialized)
}

fn column_index(cursor: &dyn DriverCursor) -> Arc<ColumnIndex> {
    Arc::new(ColumnIndex::new(cursor.column_names().to_vec()))
}

async fn drain_output(conn: &mut dyn DriverConnection) -> Result<Vec<String>, SqlSessionError> {
    let mut lines = Vec::new();
    while let Some(line) = conn
        .output_line()
        .await
        .map_err(SqlSessionError::Statement)?
    {
        lines.push(line);
    }
    Ok(lines)
}

/// The unconditional final rollback. A rollback failure while another error is
/// propagating is only logged.
async fn finish<T>(
    conn: &mut dyn DriverConnection,
    outcome: Result<T, SqlSessionError>,
) -> Result<T, SqlSessionError> {
    let rollback = conn.rollback().await;
    match (outcome, rollback) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(SqlSessionError::Statement(err)),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(rollback_err)) => {
            tracing::warn!("rollback after failed execution also failed: {rollback_err}");
            Err(err)
        }
    }
}
