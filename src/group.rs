//! Sort-based grouping and aggregation.
//!
//! Input rows are projection output: one value per projection member,
//! hidden members included. Aggregate members hold the argument value for
//! that row and get folded per group; every other member keeps the first
//! row's value.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::expr::{BinaryOperator, ColumnRef, EvalMode, Evaluated, Expr, ExprKind, Function};
use crate::projection::ExprList;
use crate::row::ProjectedRow;
use crate::value::{DataType, Value};
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone)]
struct Accumulator {
    func: Option<Function>,
    value: Value,
    non_null: u64,
}

impl Accumulator {
    fn new(func: Option<Function>) -> Self {
        Self {
            func,
            value: Value::Null,
            non_null: 0,
        }
    }

    fn fold(&mut self, value: &Value, first_row: bool) -> Result<()> {
        let Some(func) = self.func else {
            if first_row {
                self.value = value.clone();
            }
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        self.non_null += 1;
        match func {
            Function::Count => {}
            Function::Sum | Function::Avg => {
                if !matches!(value, Value::Integer(_) | Value::Real(_)) {
                    return Err(Error::TypeMismatch(format!(
                        "{} over {} value {}",
                        func,
                        value.kind_name(),
                        value
                    )));
                }
                // AVG accumulates as REAL.
                let value = if func == Function::Avg {
                    value.convert(DataType::Real)?
                } else {
                    value.clone()
                };
                self.value = if self.value.is_null() {
                    value
                } else {
                    self.value.operation(&BinaryOperator::Add, &value)?
                };
            }
            Function::Min | Function::Max => {
                let wanted = if func == Function::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if self.value.is_null() || value.compare(&self.value)? == Some(wanted) {
                    self.value = value.clone();
                }
            }
            other => {
                return Err(Error::internal(format!(
                    "{} is not an aggregate",
                    other
                )))
            }
        }
        Ok(())
    }

    fn finish(self, rows: u64) -> Result<Value> {
        match self.func {
            Some(Function::Count) => Ok(Value::Integer(count_value(rows)?)),
            Some(Function::Avg) => {
                self.value
                    .operation(&BinaryOperator::Divide, &Value::Real(self.non_null as f64))
            }
            _ => Ok(self.value),
        }
    }
}

fn count_value(rows: u64) -> Result<i64> {
    i64::try_from(rows).map_err(|_| Error::Overflow(format!("COUNT of {} rows", rows)))
}

/// Groups `rows` by the projection positions in `keys` and folds every
/// aggregate member. With no keys the whole input is one group.
pub fn group_rows(
    projection: &ExprList,
    keys: &[usize],
    mut rows: Vec<Vec<Value>>,
    deadline: &Deadline,
) -> Result<Vec<Vec<Value>>> {
    let width = projection.len();
    let aggregates: Vec<Option<Function>> =
        (0..width).map(|i| projection.aggregate_at(i)).collect();

    if rows.is_empty() {
        if !keys.is_empty() {
            return Ok(Vec::new());
        }
        let row = aggregates
            .iter()
            .map(|func| match func {
                Some(Function::Count) => Value::Integer(0),
                _ => Value::Null,
            })
            .collect();
        return Ok(vec![row]);
    }

    if let Some(bad) = rows.iter().find(|row| row.len() != width) {
        return Err(Error::internal(format!(
            "grouping received a row of {} values for {} projection members",
            bad.len(),
            width
        )));
    }
    if keys.iter().any(|key| *key >= width) {
        return Err(Error::internal("group key outside the projection"));
    }

    if !keys.is_empty() {
        rows.sort_by(|a, b| compare_keys(keys, a, b));
    }
    deadline.check()?;

    let mut groups = Vec::new();
    let fresh = || -> Vec<Accumulator> {
        aggregates.iter().map(|func| Accumulator::new(*func)).collect()
    };
    let mut accumulators = fresh();
    let mut in_group: u64 = 0;
    let total = rows.len();
    for (index, row) in rows.iter().enumerate() {
        for (acc, value) in accumulators.iter_mut().zip(row) {
            acc.fold(value, in_group == 0)?;
        }
        in_group += 1;
        let boundary = match rows.get(index + 1) {
            Some(next) => !same_group(keys, row, next),
            None => true,
        };
        if boundary {
            let finished = std::mem::replace(&mut accumulators, fresh());
            let values = finished
                .into_iter()
                .map(|acc| acc.finish(in_group))
                .collect::<Result<Vec<_>>>()?;
            groups.push(values);
            in_group = 0;
            deadline.check()?;
        }
    }
    debug!(rows = total, groups = groups.len(), "grouping finished");
    Ok(groups)
}

fn compare_keys(keys: &[usize], a: &[Value], b: &[Value]) -> Ordering {
    keys.iter()
        .map(|key| a[*key].sort_cmp(&b[*key]))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn same_group(keys: &[usize], a: &[Value], b: &[Value]) -> bool {
    keys.iter().all(|key| a[*key].group_eq(&b[*key]))
}

/// Rewrites a post-grouping predicate so it only reads projection output.
///
/// Aggregate calls become references to a projection member computing the
/// same aggregate, appended as a hidden member when none exists. Any other
/// subtree that matches a projection member (a GROUP BY key) is replaced by
/// a reference to it. A column left over after that is not grouped.
pub fn rewrite_having(having: &Expr, projection: &mut ExprList) -> Result<Expr> {
    if let Some(position) = projection.find_expr(having) {
        return Ok(projection_ref(position, having));
    }
    let rewritten = match having.kind() {
        ExprKind::Value(_) => having.clone(),
        ExprKind::Column(column) => {
            return Err(Error::NonAggregateColumn(column.to_string()));
        }
        ExprKind::Function { func, arg } if func.is_aggregate() => {
            if arg.as_ref().map_or(false, |arg| arg.is_aggregate()) {
                return Err(Error::InvalidAggregate(format!(
                    "nested aggregate in {}",
                    having
                )));
            }
            let position = projection.add_hidden(having.clone());
            return Ok(projection_ref(position, having));
        }
        ExprKind::Function { func, arg } => {
            let arg = arg
                .as_ref()
                .map(|arg| rewrite_having(arg, projection))
                .transpose()?;
            Expr::function(*func, arg)
        }
        ExprKind::BinaryOp { op, left, right } => Expr::binary(
            *op,
            rewrite_having(left, projection)?,
            rewrite_having(right, projection)?,
        ),
        ExprKind::Negate(child) => Expr::negate(rewrite_having(child, projection)?),
    };
    Ok(match having.alias() {
        Some(alias) => rewritten.with_alias(alias),
        None => rewritten,
    })
}

fn projection_ref(position: usize, expr: &Expr) -> Expr {
    Expr::new(ExprKind::Column(ColumnRef::projection(position, expr.name())))
}

/// Keeps the grouped rows on which the rewritten predicate is true.
pub fn apply_having(rows: Vec<Vec<Value>>, predicate: &Expr) -> Result<Vec<Vec<Value>>> {
    let mut kept = Vec::with_capacity(rows.len());
    for (position, row) in rows.into_iter().enumerate() {
        let source = ProjectedRow::new(position, &row);
        let keep = match predicate.evaluate(EvalMode::Full, &[&source])? {
            Evaluated::Value(value) => value.is_true()?,
            Evaluated::Unavailable => {
                return Err(Error::internal(format!(
                    "HAVING predicate {} reads outside the projection",
                    predicate
                )))
            }
        };
        if keep {
            kept.push(row);
        }
    }
    Ok(kept)
}

/// Cuts every row back to the visible projection width and drops the
/// hidden members from the projection.
pub fn strip_hidden(rows: &mut [Vec<Value>], projection: &mut ExprList) {
    let width = projection.visible_len();
    for row in rows.iter_mut() {
        row.truncate(width);
    }
    projection.truncate_hidden();
}
