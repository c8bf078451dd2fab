//! Display-only rendering of statements and results for the log.
//!
//! Nothing here is ever sent to a driver: binds always travel as typed values.

use std::fmt::{Debug, Write};

use crate::types::{BindParams, RowValues};

/// Default number of result rows shown in a preview.
pub const DEFAULT_PREVIEW_ROWS: i64 = 10;

/// Substitute every `:name` marker in `statement` with a literal form of its value.
///
/// Names are substituted in descending order so a longer name sharing a prefix
/// (`:id2`) is replaced before the shorter one (`:id`) could corrupt it.
/// Strings are quoted but not escaped.
///
/// ```rust
/// use sql_session::prelude::*;
///
/// let params = BindParams::new().bind("x", 1).bind("x2", "s");
/// assert_eq!(render_statement("a = :x and b = :x2", &params), "a = 1 and b = 's'");
/// ```
#[must_use]
pub fn render_statement(statement: &str, params: &BindParams) -> String {
    let mut rendered = statement.to_string();
    for (name, value) in params.iter().rev() {
        let marker = format!(":{name}");
        rendered = rendered.replace(&marker, &literal(value));
    }
    rendered
}

fn literal(value: &RowValues) -> String {
    match value {
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) => format!("{f:?}"),
        RowValues::Null => "NULL".to_string(),
        RowValues::Bool(true) => "TRUE".to_string(),
        RowValues::Bool(false) => "FALSE".to_string(),
        RowValues::Text(s) => format!("'{s}'"),
        RowValues::Timestamp(dt) => format!("'{}'", dt.format("%F %T%.f")),
        RowValues::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 2);
            hex.push('\'');
            for b in bytes {
                let _ = write!(hex, "{b:02x}");
            }
            hex.push('\'');
            hex
        }
    }
}

/// Wrap `body` into a collapsible HTML `<details>` block for report-style logs.
#[must_use]
pub fn wrap_into_details(body: &str, summary: &str) -> String {
    format!(
        "<details><summary>{}</summary><p>{}</p></details>",
        escape_html(summary),
        escape_html(body)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// The rows a preview shows: the first `limit` rows, or all of them when `limit <= 0`.
#[must_use]
pub fn preview_slice<T>(rows: &[T], limit: i64) -> &[T] {
    match usize::try_from(limit) {
        Ok(limit) if limit > 0 && rows.len() > limit => &rows[..limit],
        _ => rows,
    }
}

/// Format a truncated result preview wrapped for the log.
#[must_use]
pub fn result_preview<T: Debug>(rows: &[T], limit: i64) -> String {
    wrap_into_details(&format!("{:?}", preview_slice(rows, limit)), "SQL Query Result")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_names_are_substituted_first() {
        let params = BindParams::new().bind("x", 1).bind("x2", "s");
        assert_eq!(
            render_statement("a = :x and b = :x2", &params),
            "a = 1 and b = 's'"
        );
    }

    #[test]
    fn null_renders_unquoted() {
        let params = BindParams::new().bind("v", RowValues::Null);
        assert_eq!(render_statement("x = :v", &params), "x = NULL");
    }

    #[test]
    fn every_occurrence_is_replaced_and_quotes_are_not_escaped() {
        let params = BindParams::new().bind("name", "o'brien").bind("n", 2.5);
        assert_eq!(
            render_statement(":name || :name, :n", &params),
            "'o'brien' || 'o'brien', 2.5"
        );
    }

    #[test]
    fn whole_floats_keep_their_decimal_point() {
        let params = BindParams::new().bind("f", 2.0).bind("g", 0.1);
        assert_eq!(render_statement(":f, :g", &params), "2.0, 0.1");
    }

    #[test]
    fn preview_truncates_only_for_positive_limits() {
        let rows: Vec<i32> = (0..25).collect();
        assert_eq!(preview_slice(&rows, 10).len(), 10);
        assert_eq!(preview_slice(&rows, 0).len(), 25);
        assert_eq!(preview_slice(&rows, -3).len(), 25);
        assert_eq!(preview_slice(&rows, 40).len(), 25);
    }

    #[test]
    fn details_escape_markup() {
        assert_eq!(
            wrap_into_details("a < b", "on u@db"),
            "<details><summary>on u@db</summary><p>a &lt; b</p></details>"
        );
    }
}
