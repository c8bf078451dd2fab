use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use rusqlite::{Connection, InterruptHandle};
use tokio::sync::oneshot;

use super::params::NamedParams;
use super::query::{next_row, open_statement};
use crate::driver::{CancelHandle, DriverConnection, DriverCursor};
use crate::error::DriverError;
use crate::types::{BindParams, RowValues};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Lines written through the put-line SQL function, kept while the buffer is enabled.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    enabled: AtomicBool,
    lines: Mutex<VecDeque<String>>,
}

impl OutputBuffer {
    pub(crate) fn put_line(&self, line: String) {
        if self.enabled.load(Ordering::Acquire) {
            self.lock().push_back(line);
        }
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn get_line(&self) -> Option<String> {
        self.lock().pop_front()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct SqliteCancel(InterruptHandle);

impl CancelHandle for SqliteCancel {
    fn cancel(&self) {
        self.0.interrupt();
    }
}

/// `SQLite` connection backed by a dedicated worker thread.
pub struct SqliteConnection {
    worker: Arc<SqliteWorker>,
    identity: String,
    canceller: Arc<SqliteCancel>,
    next_cursor: AtomicU64,
}

impl SqliteConnection {
    /// Move `conn` onto its own worker thread.
    ///
    /// # Errors
    /// Returns [`DriverError::Worker`] if the thread cannot be spawned.
    pub(crate) fn spawn(
        conn: Connection,
        output: Arc<OutputBuffer>,
        identity: String,
    ) -> Result<Self, DriverError> {
        let canceller = Arc::new(SqliteCancel(conn.get_interrupt_handle()));
        let worker = SqliteWorker::spawn(conn, output)?;
        Ok(Self {
            worker: Arc::new(worker),
            identity,
            canceller,
            next_cursor: AtomicU64::new(1),
        })
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("identity", &self.identity)
            .field("worker_id", &self.worker.id)
            .finish()
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn cancel_handle(&self) -> Arc<dyn CancelHandle> {
        self.canceller.clone()
    }

    async fn cursor(&mut self) -> Result<Box<dyn DriverCursor>, DriverError> {
        let id = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SqliteCursor {
            worker: Arc::clone(&self.worker),
            id,
            statement: None,
            columns: Vec::new(),
            state: CursorState::Idle,
        }))
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.worker
            .request(|respond_to| Command::Commit { respond_to })
            .await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.worker
            .request(|respond_to| Command::Rollback { respond_to })
            .await
    }

    async fn enable_output(&mut self) -> Result<(), DriverError> {
        self.worker
            .request(|respond_to| Command::EnableOutput { respond_to })
            .await
    }

    async fn output_line(&mut self) -> Result<Option<String>, DriverError> {
        self.worker
            .request(|respond_to| Command::OutputLine { respond_to })
            .await
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.worker
            .request(|respond_to| Command::Close { respond_to })
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Idle,
    /// Rows remain on the worker.
    Open,
    Exhausted,
}

/// Cursor whose statement lives on the connection's worker thread.
///
/// `SQLite` compiles the statement when it is executed, so `prepare` only records it.
struct SqliteCursor {
    worker: Arc<SqliteWorker>,
    id: u64,
    statement: Option<String>,
    columns: Vec<String>,
    state: CursorState,
}

#[async_trait]
impl DriverCursor for SqliteCursor {
    async fn prepare(&mut self, statement: &str) -> Result<(), DriverError> {
        self.statement = Some(statement.to_string());
        Ok(())
    }

    async fn execute(&mut self, params: &BindParams) -> Result<(), DriverError> {
        let statement = self
            .statement
            .clone()
            .ok_or_else(|| DriverError::Database("execute called before prepare".into()))?;
        let params = NamedParams::convert(params);
        let cursor_id = self.id;
        self.columns = self
            .worker
            .request(|respond_to| Command::Execute {
                cursor_id,
                statement,
                params,
                respond_to,
            })
            .await?;
        self.state = if self.columns.is_empty() {
            CursorState::Exhausted
        } else {
            CursorState::Open
        };
        Ok(())
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    async fn fetch_next(&mut self) -> Result<Option<Vec<RowValues>>, DriverError> {
        match self.state {
            CursorState::Idle => Err(DriverError::Database("fetch called before execute".into())),
            CursorState::Exhausted => Ok(None),
            CursorState::Open => {
                let cursor_id = self.id;
                let row = self
                    .worker
                    .request(|respond_to| Command::Fetch {
                        cursor_id,
                        respond_to,
                    })
                    .await;
                if !matches!(row, Ok(Some(_))) {
                    self.state = CursorState::Exhausted;
                }
                row
            }
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.state != CursorState::Open {
            return Ok(());
        }
        self.state = CursorState::Exhausted;
        let cursor_id = self.id;
        self.worker
            .request(|respond_to| Command::CloseCursor {
                cursor_id,
                respond_to,
            })
            .await
    }
}

struct SqliteWorker {
    sender: Sender<Command>,
    id: u64,
}

impl SqliteWorker {
    fn spawn(conn: Connection, output: Arc<OutputBuffer>) -> Result<Self, DriverError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("sqlite-worker-{id}"))
            .spawn(move || run_sqlite_worker(conn, &output, &receiver))
            .map_err(|err| {
                DriverError::Worker(format!("failed to spawn SQLite worker thread: {err}"))
            })?;
        Ok(Self { sender, id })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, DriverError>>) -> Command,
    ) -> Result<T, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .map_err(|_| DriverError::Closed)?;
        rx.await.map_err(|_| DriverError::Closed)?
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

type Reply<T> = oneshot::Sender<Result<T, DriverError>>;

enum Command {
    Execute {
        cursor_id: u64,
        statement: String,
        params: NamedParams,
        respond_to: Reply<Vec<String>>,
    },
    Fetch {
        cursor_id: u64,
        respond_to: Reply<Option<Vec<RowValues>>>,
    },
    CloseCursor {
        cursor_id: u64,
        respond_to: Reply<()>,
    },
    Commit {
        respond_to: Reply<()>,
    },
    Rollback {
        respond_to: Reply<()>,
    },
    EnableOutput {
        respond_to: Reply<()>,
    },
    OutputLine {
        respond_to: Reply<Option<String>>,
    },
    Close {
        respond_to: Reply<()>,
    },
    Shutdown,
}

fn run_sqlite_worker(conn: Connection, output: &OutputBuffer, receiver: &Receiver<Command>) {
    let mut pending: Option<Command> = None;
    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };
        match command {
            Command::Execute {
                cursor_id,
                statement,
                params,
                respond_to,
            } => {
                pending = serve_cursor(&conn, receiver, cursor_id, &statement, &params, respond_to);
            }
            Command::Fetch { respond_to, .. } => {
                let _ = respond_to.send(Err(DriverError::CursorClosed));
            }
            Command::CloseCursor { respond_to, .. } => {
                let _ = respond_to.send(Ok(()));
            }
            Command::Commit { respond_to } => {
                let _ = respond_to.send(end_transaction(&conn, "COMMIT"));
            }
            Command::Rollback { respond_to } => {
                let _ = respond_to.send(end_transaction(&conn, "ROLLBACK"));
            }
            Command::EnableOutput { respond_to } => {
                output.enable();
                let _ = respond_to.send(Ok(()));
            }
            Command::OutputLine { respond_to } => {
                let _ = respond_to.send(Ok(output.get_line()));
            }
            Command::Close { respond_to } => {
                let outcome = conn.close().map_err(|(_, err)| DriverError::from(err));
                let _ = respond_to.send(outcome);
                return;
            }
            Command::Shutdown => break,
        }
    }
}

fn end_transaction(conn: &Connection, verb: &str) -> Result<(), DriverError> {
    if !conn.is_autocommit() {
        conn.execute_batch(verb)?;
    }
    Ok(())
}

/// Execute `statement` and, when its last statement returns rows, keep that cursor
/// open on this thread answering fetches until it is drained or closed.
///
/// Any other command abandons the cursor and is handed back for the main loop.
fn serve_cursor(
    conn: &Connection,
    receiver: &Receiver<Command>,
    cursor_id: u64,
    statement: &str,
    params: &NamedParams,
    respond_to: Reply<Vec<String>>,
) -> Option<Command> {
    let mut stmt = match open_statement(conn, statement, params) {
        Ok(Some(stmt)) => stmt,
        Ok(None) => {
            let _ = respond_to.send(Ok(Vec::new()));
            return None;
        }
        Err(err) => {
            let _ = respond_to.send(Err(err));
            return None;
        }
    };

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let width = columns.len();
    let mut rows = stmt.raw_query();
    // step once so execution errors surface from execute, not from the first fetch
    let mut buffered = match next_row(&mut rows, width) {
        Ok(first) => Some(first),
        Err(err) => {
            let _ = respond_to.send(Err(err));
            return None;
        }
    };
    if respond_to.send(Ok(columns)).is_err() {
        return None;
    }

    loop {
        let command = receiver.recv().ok()?;
        match command {
            Command::Fetch {
                cursor_id: id,
                respond_to,
            } if id == cursor_id => {
                let outcome = match buffered.take() {
                    Some(row) => Ok(row),
                    None => next_row(&mut rows, width),
                };
                let exhausted = !matches!(outcome, Ok(Some(_)));
                let _ = respond_to.send(outcome);
                if exhausted {
                    return None;
                }
            }
            Command::Fetch { respond_to, .. } => {
                let _ = respond_to.send(Err(DriverError::CursorClosed));
            }
            Command::CloseCursor {
                cursor_id: id,
                respond_to,
            } => {
                let _ = respond_to.send(Ok(()));
                if id == cursor_id {
                    return None;
                }
            }
            other => return Some(other),
        }
    }
}
