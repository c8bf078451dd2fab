use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::types::Value;
use rusqlite::{Batch, Connection, Rows, Statement};

use super::params::NamedParams;
use crate::error::DriverError;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `DriverError` if the value cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DriverError> {
    let value: Value = row.get(idx)?;
    match value {
        Value::Null => Ok(RowValues::Null),
        Value::Integer(i) => Ok(RowValues::Int(i)),
        Value::Real(f) => Ok(RowValues::Float(f)),
        Value::Text(s) => Ok(RowValues::Text(s)),
        Value::Blob(b) => Ok(RowValues::Blob(b)),
    }
}

/// Step the cursor once and decode the row, `None` when exhausted.
///
/// # Errors
/// Step failures, including interruption by the cancel primitive.
pub fn next_row(rows: &mut Rows<'_>, width: usize) -> Result<Option<Vec<RowValues>>, DriverError> {
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut values = Vec::with_capacity(width);
    for i in 0..width {
        values.push(sqlite_extract_value_sync(row, i)?);
    }
    Ok(Some(values))
}

/// Open a transaction if none is active, run the statements in order, and
/// return the last one bound and ready to step when it returns rows.
///
/// Each statement without result columns runs before the next one is prepared,
/// so later statements see tables and views created earlier in the same text.
/// `None` when nothing is left to step.
///
/// # Errors
/// Prepare, bind or execution failures, or `UnknownBind` for a parameter no
/// statement references.
pub fn open_statement<'c>(
    conn: &'c Connection,
    sql: &str,
    params: &NamedParams,
) -> Result<Option<Statement<'c>>, DriverError> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN")?;
    }

    let mut used = vec![false; params.0.len()];
    let mut batch = Batch::new(conn, sql);
    let mut next = batch.next()?;
    let mut last: Option<Statement<'c>> = None;
    while let Some(mut stmt) = next.take() {
        params.bind_into(&mut stmt, &mut used)?;
        if stmt.column_count() == 0 {
            stmt.raw_execute()?;
            next = batch.next()?;
            continue;
        }
        // row statements leave the schema alone, so the lookahead prepare is safe
        next = batch.next()?;
        if next.is_some() {
            run_to_completion(&mut stmt)?;
        } else {
            last = Some(stmt);
        }
    }

    if let Some(name) = params.first_unused(&used) {
        return Err(DriverError::UnknownBind(name));
    }
    Ok(last)
}

/// Step a row statement to the end, discarding its rows.
///
/// # Errors
/// Execution failures.
pub fn run_to_completion(stmt: &mut Statement<'_>) -> Result<(), DriverError> {
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    Ok(())
}
