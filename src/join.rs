//! Multi-table join execution.
//!
//! Each table arrives already filtered down to its candidate rows. The
//! executor walks the join graph greedily: it starts from the smallest table
//! and on every step consumes the first declared join clause that connects
//! a joined table to one that is not joined yet. Rows are referenced by
//! position into their table's candidate list; a joined tuple holds one
//! slot per joined table, `None` standing for an outer-join placeholder.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::expr::{BinaryOperator, ColumnRef, EvalMode, Evaluated, Expr, ExprKind};
use crate::query::{JoinInfo, JoinKind, TableRef};
use crate::row::{as_sources, NullRow, RowId, RowSource, SlotRow};
use crate::value::{DataType, Value};
use std::cmp::Ordering;
use tracing::{debug, trace};

/// A candidate row that survived single-table filtering. `values` follows
/// the owning [`JoinTable`]'s column list, not the base table layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRow {
    pub row_id: RowId,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct JoinTable {
    pub table: TableRef,
    /// Columns carried by every row, numbered from 0 in this order.
    pub columns: Vec<ColumnRef>,
    pub rows: Vec<FilteredRow>,
}

impl JoinTable {
    pub fn new(table: TableRef, columns: Vec<ColumnRef>, rows: Vec<FilteredRow>) -> Self {
        Self {
            table,
            columns,
            rows,
        }
    }

    pub fn reference_name(&self) -> &str {
        self.table.reference_name()
    }

    pub fn column_position(&self, column: &ColumnRef) -> Result<usize> {
        self.columns
            .iter()
            .position(|candidate| candidate.same_column(column))
            .ok_or_else(|| {
                Error::internal(format!(
                    "column {} is not carried by the filtered rows of {}",
                    column,
                    self.reference_name()
                ))
            })
    }

    pub fn row(&self, index: usize) -> Result<JoinRow<'_>> {
        let row = self.rows.get(index).ok_or_else(|| {
            Error::internal(format!(
                "row position {} out of range for {}",
                index,
                self.reference_name()
            ))
        })?;
        Ok(JoinRow { table: self, row })
    }
}

/// A candidate row seen through its table's filtered column list.
#[derive(Debug, Clone, Copy)]
pub struct JoinRow<'a> {
    table: &'a JoinTable,
    row: &'a FilteredRow,
}

impl RowSource for JoinRow<'_> {
    fn table_name(&self) -> &str {
        self.table.reference_name()
    }

    fn row_id(&self) -> RowId {
        self.row.row_id
    }

    fn column_value(&self, column: &ColumnRef) -> Result<Value> {
        let position = self.table.column_position(column)?;
        self.column_value_by_index(position)
    }

    fn column_value_by_index(&self, index: usize) -> Result<Value> {
        self.row.values.get(index).cloned().ok_or_else(|| {
            Error::internal(format!(
                "filtered column {} out of range for {}",
                index,
                self.table.reference_name()
            ))
        })
    }
}

/// One slot per joined table, in [`JoinOutput::order`].
pub type JoinTuple = Vec<Option<usize>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutput {
    /// Positions into the executor's table list, in the order they joined.
    pub order: Vec<usize>,
    pub tuples: Vec<JoinTuple>,
}

/// Resolved equality key of an inner or outer join step.
struct JoinKey {
    /// Slot of the already-joined table within the tuple.
    slot: usize,
    existing_table: usize,
    existing_column: usize,
    new_column: usize,
}

pub struct JoinExecutor<'a> {
    tables: &'a [JoinTable],
    deadline: &'a Deadline,
    check_interval: usize,
}

impl<'a> JoinExecutor<'a> {
    pub fn new(tables: &'a [JoinTable], deadline: &'a Deadline, check_interval: usize) -> Self {
        Self {
            tables,
            deadline,
            check_interval: check_interval.max(1),
        }
    }

    pub fn execute(&self, joins: Vec<JoinInfo>) -> Result<JoinOutput> {
        let start = self
            .tables
            .iter()
            .enumerate()
            .min_by_key(|(_, table)| table.rows.len())
            .map(|(index, _)| index)
            .ok_or_else(|| Error::internal("join executor received no tables"))?;
        trace!(
            table = self.tables[start].reference_name(),
            rows = self.tables[start].rows.len(),
            "join bootstrap"
        );

        let mut output = JoinOutput {
            order: vec![start],
            tuples: (0..self.tables[start].rows.len())
                .map(|index| vec![Some(index)])
                .collect(),
        };
        let mut pool: Vec<(usize, usize, JoinInfo)> = Vec::with_capacity(joins.len());
        for join in joins {
            let left = self.table_index(&join.left)?;
            let right = self.table_index(&join.right)?;
            pool.push((left, right, join));
        }

        while output.order.len() < self.tables.len() {
            self.deadline.check()?;
            let position = pool
                .iter()
                .position(|(left, right, _)| {
                    output.order.contains(left) != output.order.contains(right)
                })
                .ok_or_else(|| {
                    let unjoined: Vec<&str> = (0..self.tables.len())
                        .filter(|index| !output.order.contains(index))
                        .map(|index| self.tables[index].reference_name())
                        .collect();
                    Error::internal(format!(
                        "join graph is disconnected; no join clause reaches {}",
                        unjoined.join(", ")
                    ))
                })?;
            let (left, right, join) = pool.remove(position);
            let (new_table, join) = if output.order.contains(&left) {
                (right, join)
            } else {
                (left, join.swapped())
            };
            let before = output.tuples.len();
            output.tuples = match join.kind {
                JoinKind::Cross => {
                    self.cross_join(&output.order, output.tuples, new_table, join.on.as_ref())?
                }
                kind => {
                    let on = join
                        .on
                        .as_ref()
                        .ok_or_else(|| Error::MissingJoinCondition(kind.name().to_string()))?;
                    let key = self.join_key(&output.order, new_table, on)?;
                    let width = output.order.len();
                    self.match_join(kind, output.tuples, width, new_table, &key)?
                }
            };
            output.order.push(new_table);
            debug!(
                kind = join.kind.name(),
                left = %join.left,
                right = %join.right,
                input = before,
                output = output.tuples.len(),
                "join step"
            );
        }

        for (_, _, join) in pool {
            output.tuples = self.apply_leftover(&output.order, output.tuples, join)?;
        }
        Ok(output)
    }

    /// Drops the tuples on which `predicate` is not true.
    pub fn retain(&self, output: &mut JoinOutput, predicate: &Expr) -> Result<()> {
        let mut kept = Vec::with_capacity(output.tuples.len());
        for tuple in output.tuples.drain(..) {
            if self.passes(predicate, &output.order, &tuple)? {
                kept.push(tuple);
            }
        }
        output.tuples = kept;
        Ok(())
    }

    fn table_index(&self, table: &TableRef) -> Result<usize> {
        self.tables
            .iter()
            .position(|candidate| candidate.table.matches(table))
            .ok_or_else(|| {
                Error::internal(format!("join clause names unknown table {}", table))
            })
    }

    /// Row sources for one tuple, ready for expression evaluation.
    pub fn tuple_rows(
        &self,
        order: &[usize],
        tuple: &[Option<usize>],
    ) -> Result<Vec<SlotRow<'a, JoinRow<'a>>>> {
        order
            .iter()
            .zip(tuple)
            .map(|(table, slot)| {
                let tables = self.tables;
                let table = &tables[*table];
                match slot {
                    Some(index) => Ok(SlotRow::Row(table.row(*index)?)),
                    None => Ok(SlotRow::Null(NullRow::new(table.reference_name()))),
                }
            })
            .collect()
    }

    fn passes(&self, predicate: &Expr, order: &[usize], tuple: &[Option<usize>]) -> Result<bool> {
        let rows = self.tuple_rows(order, tuple)?;
        match predicate.evaluate(EvalMode::Full, &as_sources(&rows))? {
            Evaluated::Value(value) => value.is_true(),
            Evaluated::Unavailable => Err(Error::internal(format!(
                "join predicate {} unavailable in full evaluation",
                predicate
            ))),
        }
    }

    fn cross_join(
        &self,
        order: &[usize],
        tuples: Vec<JoinTuple>,
        new_table: usize,
        on: Option<&Expr>,
    ) -> Result<Vec<JoinTuple>> {
        self.deadline.check()?;
        let new_rows = self.tables[new_table].rows.len();
        let mut widened_order = order.to_vec();
        widened_order.push(new_table);
        let mut joined = Vec::with_capacity(tuples.len().saturating_mul(new_rows));
        let mut pairs = 0usize;
        for tuple in &tuples {
            for index in 0..new_rows {
                pairs += 1;
                if pairs % self.check_interval == 0 {
                    self.deadline.check()?;
                }
                let mut widened = Vec::with_capacity(tuple.len() + 1);
                widened.extend_from_slice(tuple);
                widened.push(Some(index));
                if let Some(on) = on {
                    if !self.passes(on, &widened_order, &widened)? {
                        continue;
                    }
                }
                joined.push(widened);
            }
        }
        Ok(joined)
    }

    /// Resolves `left.col = right.col` with one side on the new table and the
    /// other on a joined table.
    fn join_key(&self, order: &[usize], new_table: usize, on: &Expr) -> Result<JoinKey> {
        let unsupported = || Error::UnsupportedJoinCondition(on.to_string());
        let (left, right) = match on.kind() {
            ExprKind::BinaryOp {
                op: BinaryOperator::Eq,
                left,
                right,
            } => match (left.column_ref(), right.column_ref()) {
                (Some(left), Some(right)) => (left, right),
                _ => return Err(unsupported()),
            },
            _ => return Err(unsupported()),
        };
        let table = &self.tables[new_table];
        let (new_column, existing_column) = if left.belongs_to(table.reference_name()) {
            (left, right)
        } else if right.belongs_to(table.reference_name()) {
            (right, left)
        } else {
            return Err(unsupported());
        };
        let slot = order
            .iter()
            .position(|index| existing_column.belongs_to(self.tables[*index].reference_name()))
            .ok_or_else(unsupported)?;
        check_key_types(new_column, existing_column)?;
        Ok(JoinKey {
            slot,
            existing_table: order[slot],
            existing_column: self.tables[order[slot]].column_position(existing_column)?,
            new_column: table.column_position(new_column)?,
        })
    }

    /// Sort-based equality matching, shared by inner and outer joins. The
    /// kind must already be canonicalized so the joined side is on the left.
    fn match_join(
        &self,
        kind: JoinKind,
        tuples: Vec<JoinTuple>,
        width: usize,
        new_table: usize,
        key: &JoinKey,
    ) -> Result<Vec<JoinTuple>> {
        let keep_unmatched_left = matches!(kind, JoinKind::Left | JoinKind::Full);
        let keep_unmatched_right = matches!(kind, JoinKind::Right | JoinKind::Full);
        let table = &self.tables[new_table];

        let mut sorted: Vec<(&Value, usize)> = Vec::with_capacity(table.rows.len());
        for (index, row) in table.rows.iter().enumerate() {
            let value = row.values.get(key.new_column).ok_or_else(|| {
                Error::internal(format!("join key missing from {}", table.reference_name()))
            })?;
            if !value.is_null() {
                sorted.push((value, index));
            }
        }
        sorted.sort_by(|a, b| a.0.sort_cmp(b.0));

        let mut matched = vec![false; table.rows.len()];
        let mut joined = Vec::with_capacity(tuples.len());
        for (count, tuple) in tuples.into_iter().enumerate() {
            if (count + 1) % self.check_interval == 0 {
                self.deadline.check()?;
            }
            let probe = self.existing_key(&tuple, key)?;
            let mut any = false;
            if let Some(probe) = probe.filter(|value| !value.is_null()) {
                let start = sorted
                    .partition_point(|(value, _)| value.sort_cmp(&probe) == Ordering::Less);
                for (value, index) in &sorted[start..] {
                    if probe.compare(value)? != Some(Ordering::Equal) {
                        break;
                    }
                    any = true;
                    matched[*index] = true;
                    let mut widened = Vec::with_capacity(tuple.len() + 1);
                    widened.extend_from_slice(&tuple);
                    widened.push(Some(*index));
                    joined.push(widened);
                }
            }
            if !any && keep_unmatched_left {
                let mut widened = tuple;
                widened.push(None);
                joined.push(widened);
            }
        }
        if keep_unmatched_right {
            for (index, _) in matched.iter().enumerate().filter(|(_, hit)| !**hit) {
                let mut widened = vec![None; width];
                widened.push(Some(index));
                joined.push(widened);
            }
        }
        Ok(joined)
    }

    fn existing_key(&self, tuple: &[Option<usize>], key: &JoinKey) -> Result<Option<Value>> {
        let Some(slot) = tuple.get(key.slot) else {
            return Err(Error::internal("join tuple shorter than its key slot"));
        };
        let Some(index) = slot else {
            return Ok(None);
        };
        let row = self.tables[key.existing_table].row(*index)?;
        Ok(Some(row.column_value_by_index(key.existing_column)?))
    }

    /// A clause whose tables were both joined by earlier steps.
    fn apply_leftover(
        &self,
        order: &[usize],
        tuples: Vec<JoinTuple>,
        join: JoinInfo,
    ) -> Result<Vec<JoinTuple>> {
        if join.kind.is_outer() {
            return Err(Error::UnsupportedJoinCondition(format!(
                "{} join between {} and {} closes a cycle in the join graph",
                join.kind.name(),
                join.left,
                join.right
            )));
        }
        let Some(on) = join.on.as_ref() else {
            return match join.kind {
                JoinKind::Cross => Ok(tuples),
                kind => Err(Error::MissingJoinCondition(kind.name().to_string())),
            };
        };
        let mut kept = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            if self.passes(on, order, &tuple)? {
                kept.push(tuple);
            }
        }
        Ok(kept)
    }
}

/// Equality keys must have comparable declared types: both numeric, or the
/// same type.
fn check_key_types(left: &ColumnRef, right: &ColumnRef) -> Result<()> {
    let numeric = |data_type: DataType| matches!(data_type, DataType::Integer | DataType::Real);
    match (left.data_type, right.data_type) {
        (Some(l), Some(r)) if l != r && !(numeric(l) && numeric(r)) => {
            Err(Error::TypeMismatch(format!(
                "cannot compare {} with {} in join condition {} = {}",
                l.name(),
                r.name(),
                left,
                right
            )))
        }
        _ => Ok(()),
    }
}
