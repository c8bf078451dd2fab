use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::types::RowValues;

/// Column names of one execution, captured once from cursor metadata and shared by
/// every row it produces.
#[derive(Debug, PartialEq, Eq)]
pub struct ColumnIndex {
    names: Vec<String>,
    // Internal cache for faster column lookups (to avoid repeated string comparisons)
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // first occurrence wins for duplicated column names
            positions.entry(name.clone()).or_insert(i);
        }
        Self { names, positions }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn position(&self, column_name: &str) -> Option<usize> {
        self.positions.get(column_name).copied()
    }
}

/// A result row addressable by column name.
///
/// Built by the mapping materializers; equal rows have the same column names and
/// values in the same order.
#[derive(Clone, PartialEq)]
pub struct MappedRow {
    columns: Arc<ColumnIndex>,
    values: Vec<RowValues>,
}

impl MappedRow {
    #[must_use]
    pub fn new(columns: Arc<ColumnIndex>, values: Vec<RowValues>) -> Self {
        Self { columns, values }
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.columns
            .position(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    #[must_use]
    pub fn values(&self) -> &[RowValues] {
        &self.values
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    #[must_use]
    pub fn into_values(self) -> Vec<RowValues> {
        self.values
    }
}

impl fmt::Debug for MappedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index() {
        let columns = Arc::new(ColumnIndex::new(vec!["ID".into(), "NAME".into()]));
        let row = MappedRow::new(
            Arc::clone(&columns),
            vec![RowValues::Int(1), RowValues::Text("alice".into())],
        );
        assert_eq!(row.get("NAME").and_then(RowValues::as_text), Some("alice"));
        assert_eq!(row.get("name"), None);
        assert_eq!(row.get_by_index(0), Some(&RowValues::Int(1)));
        assert_eq!(format!("{row:?}"), r#"{"ID": Int(1), "NAME": Text("alice")}"#);
    }
}
