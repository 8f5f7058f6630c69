//! Query orchestration.
//!
//! [`QueryEngine::execute`] runs one SELECT end to end: it validates the
//! descriptor, locks the tables it reads, pre-filters each table, joins,
//! projects, groups, orders and removes duplicates.

use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::expr::{ColumnRef, EvalMode, Expr, ExprKind};
use crate::group::{apply_having, group_rows, rewrite_having, strip_hidden};
use crate::join::{JoinExecutor, JoinOutput, JoinTable};
use crate::lock::{SessionId, TableLockGuard, TableLocks};
use crate::projection::ExprList;
use crate::query::{BoundTable, JoinInfo, JoinKind, OrderByExpr, Query, TableRef};
use crate::row::{as_sources, NullRow, SlotRow};
use crate::storage::{BaseRow, Catalog};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn to_strings(&self) -> Vec<Vec<String>> {
        format_query_rows(self.rows.clone())
    }
}

/// Sort key resolved to a projection position.
#[derive(Debug, Clone, Copy)]
struct SortKey {
    position: usize,
    asc: bool,
}

pub struct QueryEngine<C, L> {
    catalog: C,
    locks: L,
    config: EngineConfig,
}

impl<C: Catalog, L: TableLocks> QueryEngine<C, L> {
    pub fn new(catalog: C, locks: L, config: EngineConfig) -> Self {
        Self {
            catalog,
            locks,
            config,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut C {
        &mut self.catalog
    }

    pub fn locks(&self) -> &L {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `query` under the deadline the configuration arms.
    pub fn execute(&self, session: SessionId, query: Query) -> Result<QueryResult> {
        let deadline = Deadline::from_config(&self.config);
        self.execute_with_deadline(session, query, &deadline)
    }

    pub fn execute_with_deadline(
        &self,
        session: SessionId,
        query: Query,
        deadline: &Deadline,
    ) -> Result<QueryResult> {
        let grouped = query.is_grouped();
        let Query {
            tables,
            mut projection,
            distinct,
            selection,
            group_by,
            having,
            order_by,
            mut joins,
        } = query;

        check_structure(&tables, &projection, &joins)?;

        let _guard = TableLockGuard::acquire(
            &self.locks,
            session,
            tables.iter().map(|table| table.name.clone()),
        )?;
        debug!(session, tables = tables.len(), "tables locked");

        let bound = tables
            .iter()
            .map(|table| {
                let meta = self
                    .catalog
                    .table(table)
                    .map_err(|err| err.with_context(format!("table {}", table)))?;
                Ok(BoundTable {
                    table: table.clone(),
                    meta,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Column resolution.
        projection.validate_columns(&bound)?;
        let selection = match selection {
            Some(mut predicate) => {
                predicate.validate_columns(&bound)?;
                reject_aggregate(&predicate, "WHERE")?;
                Some(predicate.reduce()?)
            }
            None => None,
        };
        for join in joins.iter_mut() {
            if let Some(on) = join.on.as_mut() {
                on.validate_columns(&bound)?;
                reject_aggregate(on, "ON")?;
            }
        }
        let mut group_by = group_by;
        for expr in group_by.iter_mut() {
            expr.validate_columns(&bound)?;
            if expr.is_aggregate() {
                return Err(Error::InvalidAggregate(format!("{} in GROUP BY", expr)));
            }
        }
        let having = match having {
            Some(mut predicate) => {
                predicate.validate_columns(&bound)?;
                Some(predicate)
            }
            None => None,
        };

        if grouped {
            for expr in projection.visible() {
                check_grouped_member(expr, &group_by)?;
            }
        }

        // Hidden members for values needed after projection.
        let keys: Vec<usize> = group_by
            .iter()
            .map(|expr| match projection.find_expr(expr) {
                Some(position) => position,
                None => projection.add_hidden(expr.clone()),
            })
            .collect();
        let having = having
            .map(|predicate| rewrite_having(&predicate, &mut projection))
            .transpose()?;
        let sort_keys = resolve_order_by(order_by, &mut projection, &bound, &group_by, grouped)?;
        deadline.check()?;

        // Per-table filtering.
        let mut join_tables = Vec::with_capacity(bound.len());
        for table in &bound {
            let columns = filter_columns(table, selection.as_ref(), &joins);
            let predicate = if null_supplying(&table.table, &joins) {
                None
            } else {
                selection.as_ref()
            };
            let rows = self
                .catalog
                .filter_rows(&table.table, &columns, predicate)
                .map_err(|err| err.with_context(format!("table {}", table.table)))?;
            debug!(
                table = table.reference_name(),
                rows = rows.len(),
                "table filtered"
            );
            join_tables.push(JoinTable::new(table.table.clone(), columns, rows));
            deadline.check()?;
        }

        // Join.
        let executor = JoinExecutor::new(&join_tables, deadline, self.config.cancel_check_interval);
        let mut output = executor.execute(joins)?;
        if join_tables.len() > 1 {
            if let Some(predicate) = selection.as_ref() {
                executor.retain(&mut output, predicate)?;
            }
        }
        debug!(tuples = output.tuples.len(), "join finished");
        deadline.check()?;

        // Projection.
        let mut rows = self.project(&projection, &join_tables, &output, deadline)?;

        if grouped {
            rows = group_rows(&projection, &keys, rows, deadline)?;
            if let Some(predicate) = having.as_ref() {
                rows = apply_having(rows, predicate)?;
            }
        }

        if !sort_keys.is_empty() {
            rows.sort_by(|a, b| compare_rows(&sort_keys, a, b));
        }
        strip_hidden(&mut rows, &mut projection);
        if distinct {
            rows = dedup_rows(rows)?;
        }
        deadline.check()?;
        debug!(rows = rows.len(), "query finished");

        Ok(QueryResult {
            columns: projection.column_names(),
            rows,
        })
    }

    fn project(
        &self,
        projection: &ExprList,
        join_tables: &[JoinTable],
        output: &JoinOutput,
        deadline: &Deadline,
    ) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::with_capacity(output.tuples.len());
        for (count, tuple) in output.tuples.iter().enumerate() {
            if (count + 1) % self.config.cancel_check_interval.max(1) == 0 {
                deadline.check()?;
            }
            let mut sources: Vec<SlotRow<'_, BaseRow<'_>>> = Vec::with_capacity(tuple.len());
            for (table, slot) in output.order.iter().zip(tuple) {
                let table = &join_tables[*table];
                match slot {
                    Some(index) => {
                        let row_id = table
                            .rows
                            .get(*index)
                            .map(|row| row.row_id)
                            .ok_or_else(|| Error::internal("join tuple points past its table"))?;
                        let row = self
                            .catalog
                            .base_row(&table.table, row_id)
                            .map_err(|err| err.with_context(format!("table {}", table.table)))?;
                        sources.push(SlotRow::Row(row));
                    }
                    None => sources.push(SlotRow::Null(NullRow::new(table.reference_name()))),
                }
            }
            rows.push(projection.evaluate(EvalMode::Partial, &as_sources(&sources))?);
        }
        Ok(rows)
    }
}

fn check_structure(
    tables: &[TableRef],
    projection: &ExprList,
    joins: &[JoinInfo],
) -> Result<()> {
    if projection.is_empty() {
        return Err(Error::internal("query has an empty projection"));
    }
    if tables.is_empty() {
        return Err(Error::internal("query has no tables"));
    }
    for (index, table) in tables.iter().enumerate() {
        if tables[..index].iter().any(|seen| seen.matches(table)) {
            return Err(Error::DuplicateTable(table.reference_name().to_string()));
        }
    }
    for join in joins {
        for side in [&join.left, &join.right] {
            if !tables.iter().any(|table| table.matches(side)) {
                return Err(Error::TableNotFound(side.reference_name().to_string()));
            }
        }
    }
    Ok(())
}

fn reject_aggregate(expr: &Expr, clause: &str) -> Result<()> {
    if expr.is_aggregate() {
        Err(Error::InvalidAggregate(format!("{} in {}", expr, clause)))
    } else {
        Ok(())
    }
}

/// Under grouping an output member is either a top-level aggregate over a
/// plain argument, a GROUP BY expression, or column-free.
fn check_grouped_member(expr: &Expr, group_by: &[Expr]) -> Result<()> {
    if expr.is_aggregate() {
        let top_level = expr.function_id().map_or(false, |func| func.is_aggregate());
        let nested = match expr.kind() {
            ExprKind::Function { arg: Some(arg), .. } => arg.is_aggregate(),
            _ => false,
        };
        if top_level && !nested {
            Ok(())
        } else {
            Err(Error::InvalidAggregate(expr.to_string()))
        }
    } else if group_by.iter().any(|key| key.matches(expr)) || expr.column_refs(&[]).is_empty() {
        Ok(())
    } else {
        Err(Error::NonAggregateColumn(expr.name()))
    }
}

fn resolve_order_by(
    order_by: Vec<OrderByExpr>,
    projection: &mut ExprList,
    bound: &[BoundTable],
    group_by: &[Expr],
    grouped: bool,
) -> Result<Vec<SortKey>> {
    let mut keys = Vec::with_capacity(order_by.len());
    for OrderByExpr { mut expr, asc } in order_by {
        let by_name = match expr.column_ref().filter(|column| column.table.is_none()) {
            Some(column) => projection.find_name(&column.name)?,
            None => None,
        };
        if let Some(position) = by_name {
            keys.push(SortKey { position, asc });
            continue;
        }
        expr.validate_columns(bound)?;
        let position = match projection.find_expr(&expr) {
            Some(position) => position,
            None => {
                if grouped {
                    check_grouped_member(&expr, group_by)?;
                } else {
                    reject_aggregate(&expr, "ORDER BY")?;
                }
                projection.add_hidden(expr)
            }
        };
        keys.push(SortKey { position, asc });
    }
    Ok(keys)
}

/// Columns a table must carry through the join: those WHERE reads and
/// those any join clause touching the table reads. Falls back to the first
/// column so every row still carries something.
fn filter_columns(
    table: &BoundTable,
    selection: Option<&Expr>,
    joins: &[JoinInfo],
) -> Vec<ColumnRef> {
    let reference = table.reference_name();
    let mut columns: Vec<ColumnRef> = Vec::new();
    let mut add = |found: Vec<ColumnRef>| {
        for column in found {
            if !columns.iter().any(|seen| seen.same_column(&column)) {
                columns.push(column);
            }
        }
    };
    if let Some(selection) = selection {
        add(selection.column_refs(&[reference]));
    }
    for join in joins {
        if let Some(on) = &join.on {
            add(on.column_refs(&[reference]));
        }
    }
    if columns.is_empty() {
        if let Some(first) = table.meta.columns.first() {
            let mut column = ColumnRef::qualified(reference, first.name.clone());
            column.data_type = Some(first.data_type);
            column.index = Some(0);
            columns.push(column);
        }
    }
    columns
}

/// True when an outer join may pad `table` with NULLs. WHERE is then only
/// checked after the join, since pruning such a table early would turn
/// matched rows into padded ones.
fn null_supplying(table: &TableRef, joins: &[JoinInfo]) -> bool {
    joins.iter().any(|join| match join.kind {
        JoinKind::Left => join.right.matches(table),
        JoinKind::Right => join.left.matches(table),
        JoinKind::Full => join.left.matches(table) || join.right.matches(table),
        JoinKind::Cross | JoinKind::Inner => false,
    })
}

fn compare_rows(keys: &[SortKey], a: &[Value], b: &[Value]) -> Ordering {
    for key in keys {
        let ordering = a[key.position].sort_cmp(&b[key.position]);
        if ordering != Ordering::Equal {
            return if key.asc { ordering } else { ordering.reverse() };
        }
    }
    Ordering::Equal
}

/// Keeps the first occurrence of every distinct row.
fn dedup_rows(rows: Vec<Vec<Value>>) -> Result<Vec<Vec<Value>>> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let mut key = Vec::new();
        for value in &row {
            value.encode(&mut key)?;
        }
        if seen.insert(key) {
            kept.push(row);
        }
    }
    Ok(kept)
}

pub fn format_query_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| row.into_iter().map(|v| v.to_string()).collect())
        .collect()
}
