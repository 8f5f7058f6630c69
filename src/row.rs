//! Row sources.
//!
//! A [`RowSource`] is one logical row as seen by expression evaluation,
//! whatever stores it: a base-table row, a row of filtered join candidates,
//! an already projected row, or the NULL placeholder an outer join emits for
//! a side that did not match.

use crate::error::{Error, Result};
use crate::expr::ColumnRef;
use crate::value::Value;

/// Stable identifier of a stored row within its table.
pub type RowId = u64;

/// Row id reported by rows that do not exist in storage.
pub const NULL_ROW_ID: RowId = RowId::MAX;

/// Table name reported by [`ProjectedRow`]. Column references rewritten to
/// point at projection output carry this qualifier.
pub const PROJECTION_TABLE: &str = "$projection";

pub trait RowSource {
    /// Reference name (alias or table name) of the table this row belongs to.
    fn table_name(&self) -> &str;

    fn row_id(&self) -> RowId;

    fn column_value(&self, column: &ColumnRef) -> Result<Value>;

    fn column_value_by_index(&self, index: usize) -> Result<Value>;
}

/// Placeholder for the non-matching side of an outer join.
#[derive(Debug, Clone, Copy)]
pub struct NullRow<'a> {
    table: &'a str,
}

impl<'a> NullRow<'a> {
    pub fn new(table: &'a str) -> Self {
        Self { table }
    }
}

impl RowSource for NullRow<'_> {
    fn table_name(&self) -> &str {
        self.table
    }

    fn row_id(&self) -> RowId {
        NULL_ROW_ID
    }

    fn column_value(&self, _column: &ColumnRef) -> Result<Value> {
        Ok(Value::Null)
    }

    fn column_value_by_index(&self, _index: usize) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// A row of projection output, addressed by projection position.
#[derive(Debug, Clone, Copy)]
pub struct ProjectedRow<'a> {
    position: usize,
    values: &'a [Value],
}

impl<'a> ProjectedRow<'a> {
    pub fn new(position: usize, values: &'a [Value]) -> Self {
        Self { position, values }
    }
}

impl RowSource for ProjectedRow<'_> {
    fn table_name(&self) -> &str {
        PROJECTION_TABLE
    }

    fn row_id(&self) -> RowId {
        self.position as RowId
    }

    fn column_value(&self, column: &ColumnRef) -> Result<Value> {
        let index = column.index.ok_or_else(|| {
            Error::internal(format!("projection reference {} has no position", column))
        })?;
        self.column_value_by_index(index)
    }

    fn column_value_by_index(&self, index: usize) -> Result<Value> {
        self.values.get(index).cloned().ok_or_else(|| {
            Error::internal(format!(
                "projection position {} out of range ({} columns)",
                index,
                self.values.len()
            ))
        })
    }
}

/// A slot of a joined tuple: either a real row or a NULL placeholder.
#[derive(Debug, Clone, Copy)]
pub enum SlotRow<'a, R> {
    Row(R),
    Null(NullRow<'a>),
}

impl<R: RowSource> RowSource for SlotRow<'_, R> {
    fn table_name(&self) -> &str {
        match self {
            SlotRow::Row(row) => row.table_name(),
            SlotRow::Null(row) => row.table_name(),
        }
    }

    fn row_id(&self) -> RowId {
        match self {
            SlotRow::Row(row) => row.row_id(),
            SlotRow::Null(row) => row.row_id(),
        }
    }

    fn column_value(&self, column: &ColumnRef) -> Result<Value> {
        match self {
            SlotRow::Row(row) => row.column_value(column),
            SlotRow::Null(row) => row.column_value(column),
        }
    }

    fn column_value_by_index(&self, index: usize) -> Result<Value> {
        match self {
            SlotRow::Row(row) => row.column_value_by_index(index),
            SlotRow::Null(row) => row.column_value_by_index(index),
        }
    }
}

/// Borrows a slice of concrete rows as trait objects for evaluation.
pub fn as_sources<'a, R: RowSource + 'a>(rows: &'a [R]) -> Vec<&'a dyn RowSource> {
    rows.iter().map(|row| row as &dyn RowSource).collect()
}
