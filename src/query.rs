//! Query descriptors handed to the engine by the binder.

use crate::expr::Expr;
use crate::projection::ExprList;
use crate::storage::TableMeta;
use std::fmt;

/// Table in the FROM list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// The alias if present, otherwise the table name. Row sources report
    /// this name and column qualifiers are matched against it.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn matches(&self, other: &TableRef) -> bool {
        self.reference_name()
            .eq_ignore_ascii_case(other.reference_name())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.name, alias),
            None => f.write_str(&self.name),
        }
    }
}

/// A FROM-list table together with its authoritative definition.
#[derive(Debug, Clone)]
pub struct BoundTable {
    pub table: TableRef,
    pub meta: TableMeta,
}

impl BoundTable {
    pub fn reference_name(&self) -> &str {
        self.table.reference_name()
    }

    pub fn matches_qualifier(&self, qualifier: &str) -> bool {
        self.reference_name().eq_ignore_ascii_case(qualifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Cross,
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub fn is_outer(&self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Right | JoinKind::Full)
    }

    /// The same join seen from the other side.
    pub fn flipped(self) -> Self {
        match self {
            JoinKind::Left => JoinKind::Right,
            JoinKind::Right => JoinKind::Left,
            other => other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JoinKind::Cross => "CROSS",
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
        }
    }
}

/// A declared join between two FROM-list tables.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinInfo {
    pub left: TableRef,
    pub right: TableRef,
    pub kind: JoinKind,
    pub on: Option<Expr>,
}

impl JoinInfo {
    pub fn new(left: TableRef, right: TableRef, kind: JoinKind, on: Option<Expr>) -> Self {
        Self {
            left,
            right,
            kind,
            on,
        }
    }

    pub fn cross(left: TableRef, right: TableRef) -> Self {
        Self::new(left, right, JoinKind::Cross, None)
    }

    /// Swaps the sides, flipping LEFT and RIGHT so the meaning is unchanged.
    pub fn swapped(self) -> Self {
        Self {
            left: self.right,
            right: self.left,
            kind: self.kind.flipped(),
            on: self.on,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub asc: bool,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, asc: true }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, asc: false }
    }
}

/// A fully built SELECT, consumed by [`crate::engine::QueryEngine::execute`].
#[derive(Debug, Clone)]
pub struct Query {
    pub tables: Vec<TableRef>,
    pub projection: ExprList,
    pub distinct: bool,
    /// WHERE clause.
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub joins: Vec<JoinInfo>,
}

impl Query {
    pub fn new(tables: Vec<TableRef>, projection: ExprList) -> Self {
        Self {
            tables,
            projection,
            distinct: false,
            selection: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn with_selection(mut self, selection: Expr) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_join(mut self, join: JoinInfo) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<Expr>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_having(mut self, having: Expr) -> Self {
        self.having = Some(having);
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderByExpr>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Grouping runs when GROUP BY or HAVING is present or any projection
    /// member is an aggregate.
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || self.having.is_some() || self.projection.is_aggregate()
    }
}
