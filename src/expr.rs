//! Expression trees.
//!
//! An [`Expr`] is a closed sum of five node kinds wrapped together with an
//! optional output alias. Trees are built by the binder, validated once
//! against the query's table list, and then evaluated against tuples of
//! [`RowSource`]s.
//!
//! Evaluation has two modes. [`EvalMode::Full`] requires every referenced
//! table to be present. [`EvalMode::Partial`] is used while pre-filtering a
//! single table: columns of absent tables evaluate to
//! [`Evaluated::Unavailable`], which is not NULL and never mixes with NULL
//! propagation.

use crate::error::{Error, Result};
use crate::query::BoundTable;
use crate::row::{RowSource, PROJECTION_TABLE};
use crate::value::{decode_str, encode_str, read_array, DataType, Value};
use std::fmt;

const TAG_VALUE: u8 = 1;
const TAG_COLUMN: u8 = 2;
const TAG_BINARY: u8 = 3;
const TAG_NEGATE: u8 = 4;
const TAG_FUNCTION: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Is,
    IsNot,
}

impl BinaryOperator {
    const ALL: [BinaryOperator; 16] = [
        BinaryOperator::Add,
        BinaryOperator::Subtract,
        BinaryOperator::Multiply,
        BinaryOperator::Divide,
        BinaryOperator::Modulo,
        BinaryOperator::Concat,
        BinaryOperator::Eq,
        BinaryOperator::NotEq,
        BinaryOperator::Lt,
        BinaryOperator::LtEq,
        BinaryOperator::Gt,
        BinaryOperator::GtEq,
        BinaryOperator::And,
        BinaryOperator::Or,
        BinaryOperator::Is,
        BinaryOperator::IsNot,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Concat => "||",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Is => "IS",
            BinaryOperator::IsNot => "IS NOT",
        }
    }

    fn tag(self) -> u8 {
        Self::ALL
            .iter()
            .position(|op| *op == self)
            .map(|idx| idx as u8)
            .unwrap_or(u8::MAX)
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| Error::internal(format!("unknown operator tag {}", tag)))
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Built-in functions. Aggregates are markers: evaluating one only passes
/// its argument through, the grouping engine does the folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    ToInteger,
    ToReal,
    ToText,
    ToBoolean,
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::Count => "COUNT",
            Function::Sum => "SUM",
            Function::Avg => "AVG",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::ToInteger => "INT",
            Function::ToReal => "FLOAT",
            Function::ToText => "STRING",
            Function::ToBoolean => "BOOL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name.to_ascii_uppercase().as_str() {
            "COUNT" => Function::Count,
            "SUM" => Function::Sum,
            "AVG" => Function::Avg,
            "MIN" => Function::Min,
            "MAX" => Function::Max,
            "INT" | "INTEGER" => Function::ToInteger,
            "FLOAT" | "REAL" => Function::ToReal,
            "STRING" | "TEXT" => Function::ToText,
            "BOOL" | "BOOLEAN" => Function::ToBoolean,
            _ => return None,
        };
        Some(func)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Function::Count | Function::Sum | Function::Avg | Function::Min | Function::Max
        )
    }

    pub fn conversion_target(&self) -> Option<DataType> {
        match self {
            Function::ToInteger => Some(DataType::Integer),
            Function::ToReal => Some(DataType::Real),
            Function::ToText => Some(DataType::Text),
            Function::ToBoolean => Some(DataType::Boolean),
            _ => None,
        }
    }

    fn check_arity(&self, has_arg: bool) -> Result<()> {
        if has_arg || *self == Function::Count {
            Ok(())
        } else {
            Err(Error::Syntax(format!("{} requires an argument", self.name())))
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference to a column, resolved by [`Expr::validate_columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub name: String,
    /// Reference name of the owning table.
    pub table: Option<String>,
    pub data_type: Option<DataType>,
    /// Position within the owning table's column list.
    pub index: Option<usize>,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            data_type: None,
            index: None,
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::new(name)
        }
    }

    /// Reference to a position of projection output.
    pub(crate) fn projection(index: usize, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Some(PROJECTION_TABLE.to_string()),
            data_type: None,
            index: Some(index),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.table.is_some() && self.index.is_some()
    }

    pub fn belongs_to(&self, table: &str) -> bool {
        self.table
            .as_deref()
            .map_or(false, |own| own.eq_ignore_ascii_case(table))
    }

    /// Identity comparison: same name and same table qualifier.
    pub fn same_column(&self, other: &ColumnRef) -> bool {
        let same_table = match (&self.table, &other.table) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        same_table && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) if table != PROJECTION_TABLE => write!(f, "{}.{}", table, self.name),
            _ => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Full,
    Partial,
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Value(Value),
    /// A referenced table is not part of the row tuple yet.
    Unavailable,
}

impl Evaluated {
    pub fn is_available(&self) -> bool {
        matches!(self, Evaluated::Value(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Evaluated::Value(value) => Some(value),
            Evaluated::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Value(Value),
    Column(ColumnRef),
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
    Function {
        func: Function,
        arg: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    kind: ExprKind,
    alias: Option<String>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, alias: None }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::new(ExprKind::Value(value.into()))
    }

    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Column(ColumnRef::qualified(table, name)))
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Column(ColumnRef::new(name)))
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn negate(child: Expr) -> Self {
        Self::new(ExprKind::Negate(Box::new(child)))
    }

    pub fn function(func: Function, arg: Option<Expr>) -> Self {
        Self::new(ExprKind::Function {
            func,
            arg: arg.map(Box::new),
        })
    }

    /// `COUNT()` with no argument.
    pub fn count() -> Self {
        Self::function(Function::Count, None)
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.set_alias(alias);
        self
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.alias = Some(alias.into());
    }

    /// Output name: the alias, the bare column name, or the rendered text.
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.kind {
            ExprKind::Column(column) => column.name.clone(),
            _ => self.to_string(),
        }
    }

    pub fn left(&self) -> Option<&Expr> {
        match &self.kind {
            ExprKind::BinaryOp { left, .. } => Some(left),
            _ => None,
        }
    }

    pub fn right(&self) -> Option<&Expr> {
        match &self.kind {
            ExprKind::BinaryOp { right, .. } => Some(right),
            _ => None,
        }
    }

    pub fn set_left(&mut self, expr: Expr) -> Result<()> {
        if let ExprKind::BinaryOp { left, .. } = &mut self.kind {
            **left = expr;
            return Ok(());
        }
        Err(Error::internal(format!("{} has no left operand", self)))
    }

    pub fn set_right(&mut self, expr: Expr) -> Result<()> {
        if let ExprKind::BinaryOp { right, .. } = &mut self.kind {
            **right = expr;
            return Ok(());
        }
        Err(Error::internal(format!("{} has no right operand", self)))
    }

    pub fn column_ref(&self) -> Option<&ColumnRef> {
        match &self.kind {
            ExprKind::Column(column) => Some(column),
            _ => None,
        }
    }

    /// The function of a function node.
    pub fn function_id(&self) -> Option<Function> {
        match &self.kind {
            ExprKind::Function { func, .. } => Some(*func),
            _ => None,
        }
    }

    /// Column references in the tree, restricted to the given tables (all
    /// tables when `tables` is empty). Each column is reported once.
    pub fn column_refs(&self, tables: &[&str]) -> Vec<ColumnRef> {
        let mut found: Vec<ColumnRef> = Vec::new();
        self.collect_column_refs(tables, &mut found);
        found
    }

    fn collect_column_refs(&self, tables: &[&str], found: &mut Vec<ColumnRef>) {
        match &self.kind {
            ExprKind::Value(_) => {}
            ExprKind::Column(column) => {
                let wanted =
                    tables.is_empty() || tables.iter().any(|table| column.belongs_to(table));
                if wanted && !found.iter().any(|seen| seen.same_column(column)) {
                    found.push(column.clone());
                }
            }
            ExprKind::BinaryOp { left, right, .. } => {
                left.collect_column_refs(tables, found);
                right.collect_column_refs(tables, found);
            }
            ExprKind::Negate(child) => child.collect_column_refs(tables, found),
            ExprKind::Function { arg, .. } => {
                if let Some(arg) = arg {
                    arg.collect_column_refs(tables, found);
                }
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        match &self.kind {
            ExprKind::Value(_) | ExprKind::Column(_) => false,
            ExprKind::BinaryOp { left, right, .. } => left.is_aggregate() || right.is_aggregate(),
            ExprKind::Negate(child) => child.is_aggregate(),
            ExprKind::Function { func, arg } => {
                func.is_aggregate() || arg.as_ref().map_or(false, |arg| arg.is_aggregate())
            }
        }
    }

    /// Structural equality that ignores aliases and compares columns by
    /// identity.
    pub fn matches(&self, other: &Expr) -> bool {
        match (&self.kind, &other.kind) {
            (ExprKind::Value(a), ExprKind::Value(b)) => a == b,
            (ExprKind::Column(a), ExprKind::Column(b)) => a.same_column(b),
            (
                ExprKind::BinaryOp {
                    op: op_a,
                    left: left_a,
                    right: right_a,
                },
                ExprKind::BinaryOp {
                    op: op_b,
                    left: left_b,
                    right: right_b,
                },
            ) => op_a == op_b && left_a.matches(left_b) && right_a.matches(right_b),
            (ExprKind::Negate(a), ExprKind::Negate(b)) => a.matches(b),
            (
                ExprKind::Function { func: fa, arg: aa },
                ExprKind::Function { func: fb, arg: ab },
            ) => {
                fa == fb
                    && match (aa, ab) {
                        (Some(a), Some(b)) => a.matches(b),
                        (None, None) => true,
                        _ => false,
                    }
            }
            _ => false,
        }
    }

    pub fn evaluate(&self, mode: EvalMode, rows: &[&dyn RowSource]) -> Result<Evaluated> {
        match &self.kind {
            ExprKind::Value(value) => Ok(Evaluated::Value(value.clone())),
            ExprKind::Column(column) => evaluate_column(column, mode, rows),
            ExprKind::BinaryOp { op, left, right } => {
                let left_val = left.evaluate(mode, rows)?;
                let right_val = right.evaluate(mode, rows)?;
                match (left_val, right_val) {
                    (Evaluated::Value(l), Evaluated::Value(r)) => {
                        Ok(Evaluated::Value(l.operation(op, &r)?))
                    }
                    (Evaluated::Value(known), Evaluated::Unavailable)
                    | (Evaluated::Unavailable, Evaluated::Value(known))
                        if matches!(op, BinaryOperator::And | BinaryOperator::Or) =>
                    {
                        partial_logical(op, known)
                    }
                    _ => Ok(Evaluated::Unavailable),
                }
            }
            ExprKind::Negate(child) => match child.evaluate(mode, rows)? {
                Evaluated::Value(value) => Ok(Evaluated::Value(value.negate()?)),
                Evaluated::Unavailable => Ok(Evaluated::Unavailable),
            },
            ExprKind::Function { func, arg } => {
                func.check_arity(arg.is_some())?;
                let Some(arg) = arg else {
                    // Bare COUNT() outside grouping.
                    return Ok(Evaluated::Value(Value::Null));
                };
                match (arg.evaluate(mode, rows)?, func.conversion_target()) {
                    (Evaluated::Value(value), Some(target)) => {
                        Ok(Evaluated::Value(value.convert(target)?))
                    }
                    (evaluated, _) => Ok(evaluated),
                }
            }
        }
    }

    /// Folds literal-only subtrees into value nodes.
    pub fn reduce(&self) -> Result<Expr> {
        let kind = match &self.kind {
            ExprKind::Value(_) | ExprKind::Column(_) => return Ok(self.clone()),
            ExprKind::BinaryOp { op, left, right } => {
                let left = left.reduce()?;
                let right = right.reduce()?;
                match (&left.kind, &right.kind) {
                    (ExprKind::Value(l), ExprKind::Value(r)) => ExprKind::Value(l.operation(op, r)?),
                    _ => ExprKind::BinaryOp {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                }
            }
            ExprKind::Negate(child) => {
                let child = child.reduce()?;
                match &child.kind {
                    ExprKind::Value(value) => ExprKind::Value(value.negate()?),
                    _ => ExprKind::Negate(Box::new(child)),
                }
            }
            ExprKind::Function { func, arg } => {
                let arg = arg.as_ref().map(|arg| arg.reduce()).transpose()?;
                match (func.conversion_target(), arg.as_ref().map(|arg| &arg.kind)) {
                    (Some(target), Some(ExprKind::Value(value))) => {
                        ExprKind::Value(value.convert(target)?)
                    }
                    _ => ExprKind::Function {
                        func: *func,
                        arg: arg.map(Box::new),
                    },
                }
            }
        };
        Ok(Expr {
            kind,
            alias: self.alias.clone(),
        })
    }

    /// Resolves every column reference against `tables`.
    pub fn validate_columns(&mut self, tables: &[BoundTable]) -> Result<()> {
        match &mut self.kind {
            ExprKind::Value(_) => Ok(()),
            ExprKind::Column(column) => resolve_column(column, tables),
            ExprKind::BinaryOp { left, right, .. } => {
                left.validate_columns(tables)?;
                right.validate_columns(tables)
            }
            ExprKind::Negate(child) => child.validate_columns(tables),
            ExprKind::Function { func, arg } => {
                func.check_arity(arg.is_some())?;
                match arg {
                    Some(arg) => arg.validate_columns(tables),
                    None => Ok(()),
                }
            }
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match &self.kind {
            ExprKind::Value(value) => {
                buf.push(TAG_VALUE);
                value.encode(buf)?;
            }
            ExprKind::Column(column) => {
                buf.push(TAG_COLUMN);
                encode_column_ref(column, buf)?;
            }
            ExprKind::BinaryOp { op, left, right } => {
                buf.push(TAG_BINARY);
                buf.push(op.tag());
                left.encode(buf)?;
                right.encode(buf)?;
            }
            ExprKind::Negate(child) => {
                buf.push(TAG_NEGATE);
                child.encode(buf)?;
            }
            ExprKind::Function { func, .. } => {
                return Err(Error::internal(format!(
                    "{} expressions cannot be serialized",
                    func
                )))
            }
        }
        encode_optional_str(self.alias.as_deref(), buf)
    }

    /// Decodes an expression starting at `pos`, returning it with the
    /// position just past it.
    pub fn decode(record: &[u8], pos: usize) -> Result<(Expr, usize)> {
        let tag = *record
            .get(pos)
            .ok_or_else(|| Error::internal("truncated expression"))?;
        match tag {
            TAG_VALUE => decode_value_expr(record, pos),
            TAG_COLUMN => decode_column_expr(record, pos),
            TAG_BINARY => decode_binary_expr(record, pos),
            TAG_NEGATE => decode_negate_expr(record, pos),
            TAG_FUNCTION => Err(Error::internal(
                "function expressions cannot be deserialized",
            )),
            _ => Err(Error::internal(format!("unknown expression tag {}", tag))),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Value(Value::Text(text)) => write!(f, "'{}'", text.replace('\'', "''")),
            ExprKind::Value(value) => write!(f, "{}", value),
            ExprKind::Column(column) => write!(f, "{}", column),
            ExprKind::BinaryOp { op, left, right } => {
                write_operand(f, left)?;
                write!(f, " {} ", op)?;
                write_operand(f, right)
            }
            ExprKind::Negate(child) => {
                f.write_str("-")?;
                write_operand(f, child)
            }
            ExprKind::Function { func, arg } => match arg {
                Some(arg) => write!(f, "{}({})", func, arg),
                None => write!(f, "{}()", func),
            },
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    if matches!(expr.kind, ExprKind::BinaryOp { .. }) {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn evaluate_column(column: &ColumnRef, mode: EvalMode, rows: &[&dyn RowSource]) -> Result<Evaluated> {
    let Some(table) = column.table.as_deref().filter(|_| column.is_resolved()) else {
        return Err(Error::internal(format!(
            "column {} evaluated before validation",
            column
        )));
    };
    match rows
        .iter()
        .find(|row| row.table_name().eq_ignore_ascii_case(table))
    {
        Some(row) => Ok(Evaluated::Value(row.column_value(column)?)),
        None => match mode {
            EvalMode::Partial => Ok(Evaluated::Unavailable),
            EvalMode::Full => Err(Error::ColumnNotFound(column.to_string())),
        },
    }
}

/// AND/OR with one side unavailable: only an absorbing operand decides.
fn partial_logical(op: &BinaryOperator, known: Value) -> Result<Evaluated> {
    let absorbs = matches!(
        (op, known.as_bool()?),
        (BinaryOperator::And, Some(false)) | (BinaryOperator::Or, Some(true))
    );
    if absorbs {
        Ok(Evaluated::Value(known))
    } else {
        Ok(Evaluated::Unavailable)
    }
}

fn resolve_column(column: &mut ColumnRef, tables: &[BoundTable]) -> Result<()> {
    let mut found = None;
    for table in tables {
        if let Some(qualifier) = &column.table {
            if !table.matches_qualifier(qualifier) {
                continue;
            }
        }
        if let Some(index) = table.meta.column_index(&column.name) {
            if found.is_some() {
                return Err(Error::AmbiguousColumn(column.to_string()));
            }
            found = Some((table, index));
        }
    }
    let (table, index) = found.ok_or_else(|| Error::ColumnNotFound(column.to_string()))?;
    let definition = &table.meta.columns[index];
    column.table = Some(table.reference_name().to_string());
    column.name = definition.name.clone();
    column.data_type = Some(definition.data_type);
    column.index = Some(index);
    Ok(())
}

fn encode_optional_str(value: Option<&str>, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Some(s) => {
            buf.push(1);
            encode_str(s, buf)
        }
        None => {
            buf.push(0);
            Ok(())
        }
    }
}

fn decode_optional_str(record: &[u8], pos: usize) -> Result<(Option<String>, usize)> {
    match record.get(pos) {
        Some(0) => Ok((None, pos + 1)),
        Some(1) => {
            let (s, cursor) = decode_str(record, pos + 1)?;
            Ok((Some(s), cursor))
        }
        _ => Err(Error::internal("invalid optional string marker")),
    }
}

fn encode_column_ref(column: &ColumnRef, buf: &mut Vec<u8>) -> Result<()> {
    encode_str(&column.name, buf)?;
    encode_optional_str(column.table.as_deref(), buf)?;
    buf.push(column.data_type.map_or(0, |data_type| data_type.tag()));
    match column.index {
        Some(index) => {
            let index = u32::try_from(index)
                .map_err(|_| Error::internal("column index too large to encode"))?;
            buf.push(1);
            buf.extend_from_slice(&index.to_le_bytes());
        }
        None => buf.push(0),
    }
    Ok(())
}

fn decode_column_ref(record: &[u8], pos: usize) -> Result<(ColumnRef, usize)> {
    let (name, cursor) = decode_str(record, pos)?;
    let (table, cursor) = decode_optional_str(record, cursor)?;
    let type_tag = *record
        .get(cursor)
        .ok_or_else(|| Error::internal("truncated column reference"))?;
    let data_type = match type_tag {
        0 => None,
        tag => Some(DataType::from_tag(tag)?),
    };
    let cursor = cursor + 1;
    let (index, cursor) = match record.get(cursor) {
        Some(0) => (None, cursor + 1),
        Some(1) => {
            let bytes = read_array::<4>(record, cursor + 1)?;
            (Some(u32::from_le_bytes(bytes) as usize), cursor + 5)
        }
        _ => return Err(Error::internal("invalid column index marker")),
    };
    Ok((
        ColumnRef {
            name,
            table,
            data_type,
            index,
        },
        cursor,
    ))
}

fn expect_tag(record: &[u8], pos: usize, expected: u8) -> Result<usize> {
    match record.get(pos) {
        Some(tag) if *tag == expected => Ok(pos + 1),
        Some(tag) => Err(Error::internal(format!(
            "expression tag mismatch: expected {}, found {}",
            expected, tag
        ))),
        None => Err(Error::internal("truncated expression")),
    }
}

fn finish_decode(kind: ExprKind, record: &[u8], cursor: usize) -> Result<(Expr, usize)> {
    let (alias, cursor) = decode_optional_str(record, cursor)?;
    Ok((Expr { kind, alias }, cursor))
}

fn decode_value_expr(record: &[u8], pos: usize) -> Result<(Expr, usize)> {
    let cursor = expect_tag(record, pos, TAG_VALUE)?;
    let (value, cursor) = Value::decode(record, cursor)?;
    finish_decode(ExprKind::Value(value), record, cursor)
}

fn decode_column_expr(record: &[u8], pos: usize) -> Result<(Expr, usize)> {
    let cursor = expect_tag(record, pos, TAG_COLUMN)?;
    let (column, cursor) = decode_column_ref(record, cursor)?;
    finish_decode(ExprKind::Column(column), record, cursor)
}

fn decode_binary_expr(record: &[u8], pos: usize) -> Result<(Expr, usize)> {
    let cursor = expect_tag(record, pos, TAG_BINARY)?;
    let op_tag = *record
        .get(cursor)
        .ok_or_else(|| Error::internal("truncated binary expression"))?;
    let op = BinaryOperator::from_tag(op_tag)?;
    let (left, cursor) = Expr::decode(record, cursor + 1)?;
    let (right, cursor) = Expr::decode(record, cursor)?;
    let kind = ExprKind::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    };
    finish_decode(kind, record, cursor)
}

fn decode_negate_expr(record: &[u8], pos: usize) -> Result<(Expr, usize)> {
    let cursor = expect_tag(record, pos, TAG_NEGATE)?;
    let (child, cursor) = Expr::decode(record, cursor)?;
    finish_decode(ExprKind::Negate(Box::new(child)), record, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(expr: &Expr) -> Expr {
        let mut buf = Vec::new();
        expr.encode(&mut buf).unwrap();
        let (decoded, end) = Expr::decode(&buf, 0).unwrap();
        assert_eq!(end, buf.len());
        decoded
    }

    #[test]
    fn nested_tree_round_trips_with_aliases() {
        let mut column = ColumnRef::qualified("city", "population");
        column.data_type = Some(DataType::Integer);
        column.index = Some(2);
        let expr = Expr::binary(
            BinaryOperator::And,
            Expr::binary(
                BinaryOperator::Gt,
                Expr::new(ExprKind::Column(column)),
                Expr::negate(Expr::value(10)),
            ),
            Expr::binary(
                BinaryOperator::NotEq,
                Expr::unqualified("short"),
                Expr::value("USA"),
            ),
        )
        .with_alias("big_foreign");
        assert_eq!(round_trip(&expr), expr);
    }

    #[test]
    fn function_nodes_refuse_to_serialize() {
        let mut buf = Vec::new();
        let err = Expr::count().encode(&mut buf).unwrap_err();
        assert!(err.is_internal());

        let err = Expr::decode(&[TAG_FUNCTION, 0], 0).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn tag_mismatch_is_internal() {
        let mut buf = Vec::new();
        Expr::value(1).encode(&mut buf).unwrap();
        let err = decode_negate_expr(&buf, 0).unwrap_err();
        assert!(err.is_internal());
        let err = Expr::decode(&[42], 0).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn reduce_matches_full_evaluation_for_literals() {
        let expr = Expr::binary(
            BinaryOperator::Or,
            Expr::binary(
                BinaryOperator::Lt,
                Expr::binary(BinaryOperator::Multiply, Expr::value(6), Expr::value(7)),
                Expr::function(Function::ToInteger, Some(Expr::value("40"))),
            ),
            Expr::negate(Expr::value(true)),
        );
        let reduced = expr.reduce().unwrap();
        let evaluated = expr.evaluate(EvalMode::Full, &[]).unwrap();
        match (reduced.kind(), evaluated) {
            (ExprKind::Value(folded), Evaluated::Value(value)) => assert_eq!(*folded, value),
            other => panic!("unexpected reduction {:?}", other),
        }
    }

    #[test]
    fn reduce_propagates_folding_errors() {
        let expr = Expr::binary(
            BinaryOperator::Add,
            Expr::unqualified("a"),
            Expr::negate(Expr::value("text")),
        );
        assert!(matches!(expr.reduce(), Err(Error::Syntax(_))));
    }

    #[test]
    fn reduce_keeps_aggregates() {
        let expr = Expr::function(Function::Sum, Some(Expr::value(1)));
        assert_eq!(expr.reduce().unwrap(), expr);
    }

    #[test]
    fn display_and_names() {
        let expr = Expr::binary(
            BinaryOperator::Add,
            Expr::column("t", "a"),
            Expr::binary(BinaryOperator::Multiply, Expr::value(2), Expr::unqualified("b")),
        );
        assert_eq!(expr.to_string(), "t.a + (2 * b)");
        assert_eq!(Expr::column("t", "a").name(), "a");
        assert_eq!(Expr::count().name(), "COUNT()");
        assert_eq!(expr.with_alias("total").name(), "total");
    }

    #[test]
    fn navigation_replaces_operands() {
        let mut expr = Expr::binary(BinaryOperator::Add, Expr::value(1), Expr::value(2));
        expr.set_right(Expr::value(40)).unwrap();
        expr.set_left(Expr::value(2)).unwrap();
        assert_eq!(expr.left(), Some(&Expr::value(2)));
        assert_eq!(expr.right(), Some(&Expr::value(40)));
        assert!(Expr::value(1).set_left(Expr::value(2)).is_err());
    }
}
