pub mod row;

pub use row::{ColumnIndex, MappedRow};

use crate::types::RowValues;

/// A row fetched in eager-tuple mode: values in column order.
pub type TupleRow = Vec<RowValues>;
