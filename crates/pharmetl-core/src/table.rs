// crates/pharmetl-core/src/table.rs

use chrono::{NaiveDate, NaiveDateTime};

/// A single typed cell from a source file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// The unified type of one column, inferred over every cell in the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Bool,
    Date,
    Timestamp,
    Text,
}

impl ColumnType {
    /// Widen two cell-level types into a column type. Integer mixes with
    /// float as float, date mixes with timestamp as timestamp; anything else
    /// mixed degrades to text.
    pub(crate) fn unify(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            (Date, Timestamp) | (Timestamp, Date) => Timestamp,
            _ => Text,
        }
    }
}

/// An in-memory table read from one source file: a header naming the
/// columns, an inferred type per column, and one row per source record.
/// Column order and names are identical across every row.
#[derive(Debug, Clone)]
pub struct ExtractedTable {
    columns: Vec<String>,
    column_types: Vec<ColumnType>,
    rows: Vec<Vec<Value>>,
}

impl ExtractedTable {
    pub(crate) fn new(
        columns: Vec<String>,
        column_types: Vec<ColumnType>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        debug_assert_eq!(columns.len(), column_types.len());
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        Self {
            columns,
            column_types,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A copy of this table keeping only the rows the predicate accepts.
    pub(crate) fn filter_rows<F>(&self, mut keep: F) -> ExtractedTable
    where
        F: FnMut(&[Value]) -> bool,
    {
        ExtractedTable {
            columns: self.columns.clone(),
            column_types: self.column_types.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| keep(row.as_slice()))
                .cloned()
                .collect(),
        }
    }
}
