//! Scalar values.
//!
//! [`Value`] is the immutable tagged scalar every other layer passes around.
//! Comparison follows SQL rules (NULL never equals or orders against anything)
//! except for [`Value::sort_cmp`] and [`Value::group_eq`], which give NULL a
//! fixed place so rows can be sorted and grouped.

use crate::error::{Error, Result};
use crate::expr::BinaryOperator;
use std::cmp::Ordering;
use std::fmt;

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BOOLEAN: u8 = 4;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            DataType::Integer => TAG_INTEGER,
            DataType::Real => TAG_REAL,
            DataType::Text => TAG_TEXT,
            DataType::Boolean => TAG_BOOLEAN,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            TAG_INTEGER => Ok(DataType::Integer),
            TAG_REAL => Ok(DataType::Real),
            TAG_TEXT => Ok(DataType::Text),
            TAG_BOOLEAN => Ok(DataType::Boolean),
            _ => Err(Error::internal(format!("unknown data type tag {}", tag))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of a non-NULL value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Real(_) => Some(DataType::Real),
            Value::Text(_) => Some(DataType::Text),
            Value::Boolean(_) => Some(DataType::Boolean),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.data_type() {
            Some(data_type) => data_type.name(),
            None => "NULL",
        }
    }

    /// Truth value for predicates: `None` for NULL, an error for anything
    /// that is not a boolean.
    pub fn as_bool(&self) -> Result<Option<bool>> {
        match self {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            other => Err(Error::TypeMismatch(format!(
                "expected BOOLEAN, found {} {}",
                other.kind_name(),
                other
            ))),
        }
    }

    /// True only for `Boolean(true)`; NULL and false both reject a row.
    pub fn is_true(&self) -> Result<bool> {
        Ok(self.as_bool()? == Some(true))
    }

    /// SQL comparison. `Ok(None)` when either side is NULL.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(None),
            (Value::Integer(l), Value::Integer(r)) => Ok(Some(l.cmp(r))),
            (Value::Integer(l), Value::Real(r)) => Ok((*l as f64).partial_cmp(r)),
            (Value::Real(l), Value::Integer(r)) => Ok(l.partial_cmp(&(*r as f64))),
            (Value::Real(l), Value::Real(r)) => Ok(l.partial_cmp(r)),
            (Value::Text(l), Value::Text(r)) => Ok(Some(l.cmp(r))),
            (Value::Boolean(l), Value::Boolean(r)) => Ok(Some(l.cmp(r))),
            _ => Err(Error::TypeMismatch(format!(
                "cannot compare {} with {}",
                self.kind_name(),
                other.kind_name()
            ))),
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        matches!(self.compare(other), Ok(Some(Ordering::Equal)))
    }

    pub fn less_than(&self, other: &Value) -> bool {
        matches!(self.compare(other), Ok(Some(Ordering::Less)))
    }

    pub fn greater_than(&self, other: &Value) -> bool {
        matches!(self.compare(other), Ok(Some(Ordering::Greater)))
    }

    /// Equality used for group boundaries and DISTINCT: NULL equals NULL.
    pub fn group_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            _ => self.equal(other),
        }
    }

    /// Total order for sorting. NULL sorts after every value; values of
    /// incomparable kinds are ordered by kind.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            _ => match self.compare(other) {
                Ok(Some(ordering)) => ordering,
                _ => self.kind_rank().cmp(&other.kind_rank()),
            },
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Null => 3,
        }
    }

    /// Applies a binary operator with `self` as the left operand.
    pub fn operation(&self, op: &BinaryOperator, other: &Value) -> Result<Value> {
        match op {
            BinaryOperator::Add
            | BinaryOperator::Subtract
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
            | BinaryOperator::Modulo => self.arithmetic(op, other),
            BinaryOperator::Concat => Ok(concat_values(self, other)),
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq => {
                let Some(ordering) = self.compare(other)? else {
                    return Ok(Value::Null);
                };
                let result = match op {
                    BinaryOperator::Eq => ordering == Ordering::Equal,
                    BinaryOperator::NotEq => ordering != Ordering::Equal,
                    BinaryOperator::Lt => ordering == Ordering::Less,
                    BinaryOperator::LtEq => ordering != Ordering::Greater,
                    BinaryOperator::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(Value::Boolean(result))
            }
            BinaryOperator::And => apply_logical_and(self.as_bool()?, other.as_bool()?),
            BinaryOperator::Or => apply_logical_or(self.as_bool()?, other.as_bool()?),
            BinaryOperator::Is => Ok(Value::Boolean(self.group_eq(other))),
            BinaryOperator::IsNot => Ok(Value::Boolean(!self.group_eq(other))),
        }
    }

    fn arithmetic(&self, op: &BinaryOperator, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Integer(l), Value::Integer(r)) => integer_op(op, *l, *r),
            (Value::Integer(l), Value::Real(r)) => real_op(op, *l as f64, *r),
            (Value::Real(l), Value::Integer(r)) => real_op(op, *l, *r as f64),
            (Value::Real(l), Value::Real(r)) => real_op(op, *l, *r),
            _ => Err(Error::TypeMismatch(format!(
                "cannot apply {} to {} and {}",
                op,
                self.kind_name(),
                other.kind_name()
            ))),
        }
    }

    /// Arithmetic negation for numbers, logical negation for booleans.
    pub fn negate(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Integer(v) => v
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| Error::Overflow(format!("-({})", v))),
            Value::Real(v) => Ok(Value::Real(-v)),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            Value::Text(text) => Err(Error::Syntax(format!(
                "cannot negate TEXT value '{}'",
                text
            ))),
        }
    }

    /// Explicit conversion. NULL converts to NULL for every target type.
    pub fn convert(&self, to: DataType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let failed = || Error::Conversion(format!("{} {} to {}", self.kind_name(), self, to));
        match to {
            DataType::Integer => match self {
                Value::Integer(v) => Ok(Value::Integer(*v)),
                Value::Real(v) => real_to_integer(*v).ok_or_else(failed),
                Value::Boolean(b) => Ok(Value::Integer(*b as i64)),
                Value::Text(text) => {
                    let trimmed = text.trim();
                    if let Ok(v) = trimmed.parse::<i64>() {
                        return Ok(Value::Integer(v));
                    }
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(real_to_integer)
                        .ok_or_else(failed)
                }
                Value::Null => Ok(Value::Null),
            },
            DataType::Real => match self {
                Value::Integer(v) => Ok(Value::Real(*v as f64)),
                Value::Real(v) => Ok(Value::Real(*v)),
                Value::Boolean(b) => Ok(Value::Real(if *b { 1.0 } else { 0.0 })),
                Value::Text(text) => text
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| failed()),
                Value::Null => Ok(Value::Null),
            },
            DataType::Text => Ok(Value::Text(self.to_string())),
            DataType::Boolean => match self {
                Value::Boolean(b) => Ok(Value::Boolean(*b)),
                Value::Integer(v) => Ok(Value::Boolean(*v != 0)),
                Value::Real(v) => Ok(Value::Boolean(*v != 0.0)),
                Value::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Boolean(true)),
                    "false" | "0" => Ok(Value::Boolean(false)),
                    _ => Err(failed()),
                },
                Value::Null => Ok(Value::Null),
            },
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Value::Null => buf.push(TAG_NULL),
            Value::Integer(v) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Real(v) => {
                buf.push(TAG_REAL);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(TAG_TEXT);
                encode_str(s, buf)?;
            }
            Value::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(*b as u8);
            }
        }
        Ok(())
    }

    /// Decodes a value starting at `pos`, returning it with the position just
    /// past it.
    pub fn decode(record: &[u8], pos: usize) -> Result<(Value, usize)> {
        let tag = *record
            .get(pos)
            .ok_or_else(|| Error::internal("truncated value"))?;
        let cursor = pos + 1;
        match tag {
            TAG_NULL => Ok((Value::Null, cursor)),
            TAG_INTEGER => {
                let bytes = read_array::<8>(record, cursor)?;
                Ok((Value::Integer(i64::from_le_bytes(bytes)), cursor + 8))
            }
            TAG_REAL => {
                let bytes = read_array::<8>(record, cursor)?;
                Ok((Value::Real(f64::from_le_bytes(bytes)), cursor + 8))
            }
            TAG_TEXT => {
                let (text, cursor) = decode_str(record, cursor)?;
                Ok((Value::Text(text), cursor))
            }
            TAG_BOOLEAN => {
                let byte = *record
                    .get(cursor)
                    .ok_or_else(|| Error::internal("truncated boolean"))?;
                Ok((Value::Boolean(byte != 0), cursor + 1))
            }
            _ => Err(Error::internal(format!("unknown value tag {}", tag))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(true) => f.write_str("TRUE"),
            Value::Boolean(false) => f.write_str("FALSE"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

fn integer_op(op: &BinaryOperator, left: i64, right: i64) -> Result<Value> {
    let overflow = || Error::Overflow(format!("{} {} {}", left, op, right));
    let result = match op {
        BinaryOperator::Add => left.checked_add(right),
        BinaryOperator::Subtract => left.checked_sub(right),
        BinaryOperator::Multiply => left.checked_mul(right),
        BinaryOperator::Divide => {
            if right == 0 {
                return Err(Error::DivisionByZero);
            }
            left.checked_div(right)
        }
        BinaryOperator::Modulo => {
            if right == 0 {
                return Err(Error::DivisionByZero);
            }
            left.checked_rem(right)
        }
        _ => return Err(Error::internal(format!("{} is not arithmetic", op))),
    };
    result.map(Value::Integer).ok_or_else(overflow)
}

fn real_op(op: &BinaryOperator, left: f64, right: f64) -> Result<Value> {
    let result = match op {
        BinaryOperator::Add => left + right,
        BinaryOperator::Subtract => left - right,
        BinaryOperator::Multiply => left * right,
        BinaryOperator::Divide => {
            if right == 0.0 {
                return Err(Error::DivisionByZero);
            }
            left / right
        }
        BinaryOperator::Modulo => {
            if right == 0.0 {
                return Err(Error::DivisionByZero);
            }
            left % right
        }
        _ => return Err(Error::internal(format!("{} is not arithmetic", op))),
    };
    Ok(Value::Real(result))
}

fn real_to_integer(v: f64) -> Option<Value> {
    if v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(Value::Integer(v.trunc() as i64))
    } else {
        None
    }
}

fn concat_values(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        _ => Value::Text(format!("{}{}", left, right)),
    }
}

fn apply_logical_and(left: Option<bool>, right: Option<bool>) -> Result<Value> {
    Ok(match (left, right) {
        (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
        (Some(true), Some(true)) => Value::Boolean(true),
        _ => Value::Null,
    })
}

fn apply_logical_or(left: Option<bool>, right: Option<bool>) -> Result<Value> {
    Ok(match (left, right) {
        (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
        (Some(false), Some(false)) => Value::Boolean(false),
        _ => Value::Null,
    })
}

pub(crate) fn encode_str(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u32::MAX as usize {
        return Err(Error::internal("text too large"));
    }
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

pub(crate) fn decode_str(record: &[u8], pos: usize) -> Result<(String, usize)> {
    let len = u32::from_le_bytes(read_array::<4>(record, pos)?) as usize;
    let start = pos + 4;
    let end = start + len;
    if end > record.len() {
        return Err(Error::internal("invalid text length"));
    }
    let text = String::from_utf8(record[start..end].to_vec())
        .map_err(|_| Error::internal("text is not valid UTF-8"))?;
    Ok((text, end))
}

pub(crate) fn read_array<const N: usize>(record: &[u8], pos: usize) -> Result<[u8; N]> {
    let end = pos + N;
    if end > record.len() {
        return Err(Error::internal("truncated record"));
    }
    let mut buf = [0u8; N];
    buf.copy_from_slice(&record[pos..end]);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_arithmetic_promotes_to_real() {
        let result = Value::Integer(3)
            .operation(&BinaryOperator::Add, &Value::Real(0.5))
            .unwrap();
        assert_eq!(result, Value::Real(3.5));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let err = Value::Integer(1)
            .operation(&BinaryOperator::Divide, &Value::Integer(0))
            .unwrap_err();
        assert_eq!(err, Error::DivisionByZero);
    }

    #[test]
    fn null_operand_short_circuits_before_zero_check() {
        let result = Value::Null
            .operation(&BinaryOperator::Divide, &Value::Integer(0))
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn null_never_compares() {
        assert!(!Value::Null.equal(&Value::Null));
        assert!(!Value::Null.less_than(&Value::Integer(1)));
        assert!(!Value::Integer(1).greater_than(&Value::Null));
        let cmp = Value::Null
            .operation(&BinaryOperator::Eq, &Value::Integer(1))
            .unwrap();
        assert_eq!(cmp, Value::Null);
    }

    #[test]
    fn sort_places_null_last() {
        let mut values = vec![
            Value::Null,
            Value::Integer(2),
            Value::Real(1.5),
            Value::Null,
            Value::Integer(-4),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Integer(-4),
                Value::Real(1.5),
                Value::Integer(2),
                Value::Null,
                Value::Null
            ]
        );
        assert!(Value::Null.group_eq(&Value::Null));
    }

    #[test]
    fn comparing_text_with_integer_is_a_type_mismatch() {
        let err = Value::from("a")
            .operation(&BinaryOperator::Lt, &Value::Integer(1))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn negation_depends_on_kind() {
        assert_eq!(Value::Integer(5).negate().unwrap(), Value::Integer(-5));
        assert_eq!(Value::Boolean(true).negate().unwrap(), Value::Boolean(false));
        assert!(matches!(Value::from("x").negate(), Err(Error::Syntax(_))));
        assert!(matches!(
            Value::Integer(i64::MIN).negate(),
            Err(Error::Overflow(_))
        ));
    }

    #[test]
    fn conversions() {
        assert_eq!(
            Value::from(" 42 ").convert(DataType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::Real(2.9).convert(DataType::Integer).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            Value::from("TRUE").convert(DataType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::Integer(7).convert(DataType::Text).unwrap(),
            Value::from("7")
        );
        assert!(matches!(
            Value::from("seven").convert(DataType::Real),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn real_to_integer_rejects_values_past_i64_range() {
        let two_pow_63 = 9.223372036854776e18;
        assert!(matches!(
            Value::Real(two_pow_63).convert(DataType::Integer),
            Err(Error::Conversion(_))
        ));
        assert!(matches!(
            Value::Text("9223372036854775808.0".into()).convert(DataType::Integer),
            Err(Error::Conversion(_))
        ));
        assert_eq!(
            Value::Real(-two_pow_63).convert(DataType::Integer).unwrap(),
            Value::Integer(i64::MIN)
        );
        assert_eq!(
            Value::Real(9.0e18).convert(DataType::Integer).unwrap(),
            Value::Integer(9_000_000_000_000_000_000)
        );
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = Value::decode(&[9], 0).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn encoded_text_round_trips() {
        let mut buf = Vec::new();
        Value::from("héllo").encode(&mut buf).unwrap();
        Value::Real(-0.25).encode(&mut buf).unwrap();
        let (first, pos) = Value::decode(&buf, 0).unwrap();
        let (second, end) = Value::decode(&buf, pos).unwrap();
        assert_eq!(first, Value::from("héllo"));
        assert_eq!(second, Value::Real(-0.25));
        assert_eq!(end, buf.len());
    }
}
