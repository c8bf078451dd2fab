use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::driver::DriverCursor;
use crate::error::{DriverError, SqlSessionError};
use crate::registry::StreamLease;
use crate::results::{ColumnIndex, MappedRow};

/// Forward-only, single-pass sequence of mapped rows backed by an open cursor.
///
/// The cursor and the connection's transaction stay open until the stream is drained
/// or [`close`](RowStream::close)d; either one performs the rollback the execution
/// deferred. Switching away from or closing the owning connection first revokes the
/// stream, and the next pull fails with [`SqlSessionError::StreamLifecycle`].
///
/// ```rust,no_run
/// # use sql_session::prelude::*;
/// # async fn demo(session: &mut Session) -> Result<(), SqlSessionError> {
/// let mut rows = session
///     .execute_query_streamed("SELECT id, name FROM people", &BindParams::new())
///     .await?;
/// while let Some(row) = rows.next().await {
///     let row = row?;
///     println!("{:?}", row.get("name"));
/// }
/// # Ok(()) }
/// ```
pub struct RowStream {
    cursor: Option<Box<dyn DriverCursor>>,
    columns: Arc<ColumnIndex>,
    connection: ConnectionHandle,
    lease: StreamLease,
}

impl RowStream {
    pub(crate) fn new(
        cursor: Box<dyn DriverCursor>,
        columns: Arc<ColumnIndex>,
        connection: ConnectionHandle,
        lease: StreamLease,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            columns,
            connection,
            lease,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    /// Index of the connection the stream reads from.
    #[must_use]
    pub fn connection_index(&self) -> usize {
        self.lease.index()
    }

    /// True once drained, closed or revoked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    /// Pull the next row. `None` once the stream is finished.
    pub async fn next(&mut self) -> Option<Result<MappedRow, SqlSessionError>> {
        if self.lease.is_revoked() {
            return self.abandon().map(Err);
        }
        let cursor = self.cursor.as_mut()?;
        match cursor.fetch_next().await {
            Ok(Some(values)) => Some(Ok(MappedRow::new(Arc::clone(&self.columns), values))),
            Ok(None) => self.finish().await.err().map(Err),
            Err(DriverError::CursorClosed) => self.abandon().map(Err),
            Err(err) => {
                if let Err(cleanup) = self.finish().await {
                    tracing::warn!("cleanup after failed fetch also failed: {cleanup}");
                }
                Some(Err(SqlSessionError::Statement(err)))
            }
        }
    }

    /// Drain the remaining rows.
    ///
    /// # Errors
    /// The first fetch failure, or `StreamLifecycle` when the stream was revoked.
    pub async fn collect_rows(mut self) -> Result<Vec<MappedRow>, SqlSessionError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Close the cursor early and run the deferred rollback.
    ///
    /// # Errors
    /// Driver failures closing the cursor or rolling back.
    pub async fn close(mut self) -> Result<(), SqlSessionError> {
        if self.lease.is_revoked() {
            self.abandon();
            return Ok(());
        }
        self.finish().await
    }

    async fn finish(&mut self) -> Result<(), SqlSessionError> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(());
        };
        self.lease.release();
        let closed = cursor.close().await;
        drop(cursor);
        let rolled_back = self.connection.lock().await.rollback().await;
        closed
            .and(rolled_back)
            .map_err(SqlSessionError::Statement)
    }

    /// Drop the cursor without touching the connection.
    fn abandon(&mut self) -> Option<SqlSessionError> {
        self.cursor.take()?;
        Some(SqlSessionError::StreamLifecycle(format!(
            "connection {} was switched away from or closed before the stream was drained",
            self.lease.index()
        )))
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if self.cursor.is_some() && !self.lease.is_revoked() {
            tracing::warn!(
                index = self.lease.index(),
                "result stream dropped before it was drained or closed; its rollback is skipped"
            );
        }
        self.lease.release();
    }
}
