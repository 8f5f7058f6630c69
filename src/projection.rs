//! Projection lists.

use crate::error::{Error, Result};
use crate::expr::{EvalMode, Evaluated, Expr, Function};
use crate::query::BoundTable;
use crate::row::RowSource;
use crate::value::Value;

/// Ordered output expressions of a SELECT.
///
/// Hidden entries sit after every visible entry and are stripped from the
/// final output. The engine appends them to carry values that HAVING,
/// GROUP BY or ORDER BY need but the SELECT list does not show.
#[derive(Debug, Clone, Default)]
pub struct ExprList {
    exprs: Vec<Expr>,
    hidden: Vec<Expr>,
}

impl ExprList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, expr: Expr) {
        self.exprs.push(expr);
    }

    /// Appends an invisible entry and returns its position.
    pub fn add_hidden(&mut self, expr: Expr) -> usize {
        self.hidden.push(expr);
        self.len() - 1
    }

    /// Number of entries, hidden ones included.
    pub fn len(&self) -> usize {
        self.exprs.len() + self.hidden.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn visible_len(&self) -> usize {
        self.exprs.len()
    }

    pub fn hidden_len(&self) -> usize {
        self.hidden.len()
    }

    pub fn get(&self, index: usize) -> Option<&Expr> {
        if index < self.exprs.len() {
            self.exprs.get(index)
        } else {
            self.hidden.get(index - self.exprs.len())
        }
    }

    /// Every entry, visible first.
    pub fn iter(&self) -> impl Iterator<Item = &Expr> {
        self.exprs.iter().chain(self.hidden.iter())
    }

    pub fn visible(&self) -> &[Expr] {
        &self.exprs
    }

    pub fn is_aggregate(&self) -> bool {
        self.iter().any(Expr::is_aggregate)
    }

    /// Aggregate function computed at `index`, if that entry is one.
    pub fn aggregate_at(&self, index: usize) -> Option<Function> {
        self.get(index)
            .and_then(Expr::function_id)
            .filter(Function::is_aggregate)
    }

    /// Case-insensitive lookup of a visible entry by output name. Two
    /// different entries sharing the name make it ambiguous.
    pub fn find_name(&self, name: &str) -> Result<Option<usize>> {
        let mut found: Option<usize> = None;
        for (position, expr) in self.exprs.iter().enumerate() {
            if !expr.name().eq_ignore_ascii_case(name) {
                continue;
            }
            match found {
                None => found = Some(position),
                Some(first) if self.exprs[first].matches(expr) => {}
                Some(_) => return Err(Error::AmbiguousColumn(name.to_string())),
            }
        }
        Ok(found)
    }

    /// Position of an entry structurally equal to `expr`.
    pub fn find_expr(&self, expr: &Expr) -> Option<usize> {
        self.iter().position(|candidate| candidate.matches(expr))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.exprs.iter().map(Expr::name).collect()
    }

    pub fn truncate_hidden(&mut self) {
        self.hidden.clear();
    }

    pub fn validate_columns(&mut self, tables: &[BoundTable]) -> Result<()> {
        for expr in self.exprs.iter_mut().chain(self.hidden.iter_mut()) {
            expr.validate_columns(tables)?;
        }
        Ok(())
    }

    /// Evaluates every entry against one row tuple. Any entry that fails or
    /// cannot be resolved aborts the whole row.
    pub fn evaluate(&self, mode: EvalMode, rows: &[&dyn RowSource]) -> Result<Vec<Value>> {
        let mut output = Vec::with_capacity(self.len());
        for expr in self.iter() {
            match expr.evaluate(mode, rows)? {
                Evaluated::Value(value) => output.push(value),
                Evaluated::Unavailable => {
                    return Err(Error::ColumnNotFound(format!(
                        "{} (table not present in row)",
                        expr
                    )))
                }
            }
        }
        if output.len() != self.len() {
            return Err(Error::internal(format!(
                "projection produced {} values for {} columns",
                output.len(),
                self.len()
            )));
        }
        Ok(output)
    }
}

impl FromIterator<Expr> for ExprList {
    fn from_iter<I: IntoIterator<Item = Expr>>(iter: I) -> Self {
        Self {
            exprs: iter.into_iter().collect(),
            hidden: Vec::new(),
        }
    }
}
