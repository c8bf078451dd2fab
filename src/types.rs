use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::Deserialize;

/// Values that can be stored in a database row or bound as statement parameters.
///
/// The same enum flows in both directions so callers never touch driver types:
/// ```rust
/// use sql_session::prelude::*;
///
/// let params = BindParams::new()
///     .bind("id", 1)
///     .bind("name", "alice")
///     .bind("deleted_at", RowValues::Null);
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(value: Vec<u8>) -> Self {
        RowValues::Blob(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// Named bind parameters for a statement, keyed by the name used after `:` in the text.
///
/// Names are case-sensitive and unique; binding the same name twice keeps the last value.
/// Iteration is in ascending name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindParams(BTreeMap<String, RowValues>);

impl BindParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RowValues>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RowValues> {
        self.0.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &RowValues)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<RowValues>> FromIterator<(K, V)> for BindParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = BindParams::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// The drivers this crate ships; selects the backend of [`Session::open`](crate::Session::open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-process `SQLite` driver
    #[default]
    Sqlite,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    /// Case-insensitive, accepting the same names as the command-line value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_params_are_case_sensitive_and_last_write_wins() {
        let params = BindParams::new()
            .bind("id", 1)
            .bind("ID", "upper")
            .bind("id", 2);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some(&RowValues::Int(2)));
        assert_eq!(params.get("ID"), Some(&RowValues::Text("upper".into())));
    }

    #[test]
    fn driver_kind_parses_like_its_command_line_value() {
        assert_eq!("SQLite".parse::<DriverKind>(), Ok(DriverKind::Sqlite));
        assert!("oracle".parse::<DriverKind>().is_err());
    }

    #[test]
    fn option_converts_to_null() {
        let missing: Option<i64> = None;
        assert!(RowValues::from(missing).is_null());
        assert_eq!(RowValues::from(Some(5)), RowValues::Int(5));
    }
}
