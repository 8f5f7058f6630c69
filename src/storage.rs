//! Table catalog and in-memory row store.
//!
//! [`Catalog`] is the contract the engine uses to reach stored rows. The
//! bundled [`StorageEngine`] keeps every table's rows in an arena keyed by
//! stable [`RowId`]; row sources borrow from it and never own row data.

use crate::error::{Error, Result};
use crate::expr::{ColumnRef, EvalMode, Evaluated, Expr};
use crate::join::FilteredRow;
use crate::query::TableRef;
use crate::row::{RowId, RowSource};
use crate::value::{DataType, Value};
use std::collections::{btree_map, BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Storage-side collaborator of the query engine.
pub trait Catalog {
    /// Resolves a FROM-list entry to its table definition.
    fn table(&self, table: &TableRef) -> Result<TableMeta>;

    /// Rows of `table` that survive `predicate` (evaluated in partial mode),
    /// each carrying only the requested `columns`, in that order.
    fn filter_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnRef],
        predicate: Option<&Expr>,
    ) -> Result<Vec<FilteredRow>>;

    /// The full stored row behind `row_id`.
    fn base_row<'a>(&'a self, table: &'a TableRef, row_id: RowId) -> Result<BaseRow<'a>>;
}

/// A stored row, reported under the reference name it was fetched with.
#[derive(Debug, Clone, Copy)]
pub struct BaseRow<'a> {
    table: &'a str,
    row_id: RowId,
    values: &'a [Value],
}

impl<'a> BaseRow<'a> {
    pub fn new(table: &'a str, row_id: RowId, values: &'a [Value]) -> Self {
        Self {
            table,
            row_id,
            values,
        }
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

impl RowSource for BaseRow<'_> {
    fn table_name(&self) -> &str {
        self.table
    }

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn column_value(&self, column: &ColumnRef) -> Result<Value> {
        let index = column.index.ok_or_else(|| {
            Error::internal(format!("column {} has no resolved position", column))
        })?;
        self.column_value_by_index(index)
    }

    fn column_value_by_index(&self, index: usize) -> Result<Value> {
        self.values.get(index).cloned().ok_or_else(|| {
            Error::internal(format!(
                "column position {} out of range for {} ({} columns)",
                index,
                self.table,
                self.values.len()
            ))
        })
    }
}

#[derive(Debug)]
struct TableData {
    meta: TableMeta,
    rows: BTreeMap<RowId, Vec<Value>>,
    next_row_id: RowId,
}

/// In-memory table store.
#[derive(Debug, Default)]
pub struct StorageEngine {
    tables: HashMap<String, TableData>,
}

/// Iterator over a table's rows in row-id order.
pub struct TableScan<'a> {
    table: &'a str,
    rows: btree_map::Iter<'a, RowId, Vec<Value>>,
}

impl<'a> Iterator for TableScan<'a> {
    type Item = BaseRow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows
            .next()
            .map(|(row_id, values)| BaseRow::new(self.table, *row_id, values))
    }
}

impl StorageEngine {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, table: TableMeta) -> Result<()> {
        let key = table.name.to_lowercase();
        if self.tables.contains_key(&key) {
            return Err(Error::Invalid(format!(
                "table already exists: {}",
                table.name
            )));
        }
        if table.columns.is_empty() {
            return Err(Error::Invalid(format!(
                "table must have at least one column: {}",
                table.name
            )));
        }
        let mut names = HashSet::new();
        for column in &table.columns {
            if !names.insert(column.name.to_lowercase()) {
                return Err(Error::Invalid(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
        }
        self.tables.insert(
            key,
            TableData {
                meta: table,
                rows: BTreeMap::new(),
                next_row_id: 1,
            },
        );
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.tables
            .remove(&name.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn get_table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.get(&name.to_lowercase()).map(|data| &data.meta)
    }

    pub fn list_tables(&self) -> Vec<TableMeta> {
        let mut tables: Vec<TableMeta> = self.tables.values().map(|data| data.meta.clone()).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Stores a row, converting each value to its column's declared type.
    pub fn insert_row(&mut self, table_name: &str, row: &[Value]) -> Result<RowId> {
        let data = self.table_data_mut(table_name)?;
        if row.len() != data.meta.columns.len() {
            return Err(Error::Invalid(format!(
                "table {} has {} columns but {} values were supplied",
                data.meta.name,
                data.meta.columns.len(),
                row.len()
            )));
        }
        let mut stored = Vec::with_capacity(row.len());
        for (value, column) in row.iter().zip(&data.meta.columns) {
            let value = value
                .convert(column.data_type)
                .map_err(|err| err.with_context(format!("{}.{}", data.meta.name, column.name)))?;
            stored.push(value);
        }
        let row_id = data.next_row_id;
        data.next_row_id += 1;
        data.rows.insert(row_id, stored);
        Ok(row_id)
    }

    pub fn delete_row(&mut self, table_name: &str, row_id: RowId) -> Result<()> {
        let data = self.table_data_mut(table_name)?;
        data.rows
            .remove(&row_id)
            .map(|_| ())
            .ok_or_else(|| Error::Invalid(format!("no row {} in {}", row_id, table_name)))
    }

    pub fn row_count(&self, table_name: &str) -> Result<usize> {
        Ok(self.table_data(table_name)?.rows.len())
    }

    pub fn table_scan<'a>(&'a self, table: &'a TableRef) -> Result<TableScan<'a>> {
        let data = self.table_data(&table.name)?;
        Ok(TableScan {
            table: table.reference_name(),
            rows: data.rows.iter(),
        })
    }

    fn table_data(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn table_data_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }
}

impl Catalog for StorageEngine {
    fn table(&self, table: &TableRef) -> Result<TableMeta> {
        Ok(self.table_data(&table.name)?.meta.clone())
    }

    fn filter_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnRef],
        predicate: Option<&Expr>,
    ) -> Result<Vec<FilteredRow>> {
        let mut filtered = Vec::new();
        for row in self.table_scan(table)? {
            if let Some(predicate) = predicate {
                let keep = match predicate.evaluate(EvalMode::Partial, &[&row])? {
                    Evaluated::Value(value) => value.is_true()?,
                    Evaluated::Unavailable => true,
                };
                if !keep {
                    continue;
                }
            }
            let values = columns
                .iter()
                .map(|column| row.column_value(column))
                .collect::<Result<Vec<_>>>()?;
            filtered.push(FilteredRow {
                row_id: row.row_id(),
                values,
            });
        }
        Ok(filtered)
    }

    fn base_row<'a>(&'a self, table: &'a TableRef, row_id: RowId) -> Result<BaseRow<'a>> {
        let data = self.table_data(&table.name)?;
        let values = data.rows.get(&row_id).ok_or_else(|| {
            Error::internal(format!("row {} vanished from {}", row_id, table.name))
        })?;
        Ok(BaseRow::new(table.reference_name(), row_id, values))
    }
}
