use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::DriverError;
use crate::types::{BindParams, RowValues};

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Bind parameters as `(":name", value)` pairs, ready to ship to the worker thread.
#[derive(Debug, Clone, Default)]
pub struct NamedParams(pub Vec<(String, Value)>);

impl NamedParams {
    #[must_use]
    pub fn convert(params: &BindParams) -> Self {
        NamedParams(
            params
                .iter()
                .map(|(name, value)| (format!(":{name}"), row_value_to_sqlite_value(value)))
                .collect(),
        )
    }

    /// Bind every parameter `stmt` references and mark it in `used`.
    ///
    /// # Errors
    /// Propagates `SQLite` binding failures.
    pub fn bind_into(&self, stmt: &mut Statement<'_>, used: &mut [bool]) -> Result<(), DriverError> {
        for ((marker, value), used) in self.0.iter().zip(used.iter_mut()) {
            if let Some(idx) = stmt.parameter_index(marker)? {
                stmt.raw_bind_parameter(idx, value)?;
                *used = true;
            }
        }
        Ok(())
    }

    /// First parameter no statement referenced, without its `:` prefix.
    #[must_use]
    pub fn first_unused(&self, used: &[bool]) -> Option<String> {
        self.0
            .iter()
            .zip(used)
            .find(|(_, used)| !**used)
            .map(|((marker, _), _)| marker.trim_start_matches(':').to_string())
    }
}
