//! Condition syntax tree and evaluation
//!
//! Comparison follows expression-language conventions: ints, floats and
//! bools compare numerically, strings lexically, and equality between
//! unrelated kinds is simply false. Ordering against `null` is false;
//! ordering between any other unrelated kinds is an evaluation error.

use crate::error::ConditionError;
use crate::ColumnValues;
use sampletable_common::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub(crate) fn eval<'r, R: ColumnValues + ?Sized>(
        &'r self,
        row: &'r R,
    ) -> Result<Cow<'r, Value>, ConditionError> {
        match self {
            Self::Column(name) => Ok(row
                .column_value(name)
                .map_or(Cow::Owned(Value::Null), Cow::Borrowed)),
            Self::Literal(value) => Ok(Cow::Borrowed(value)),
            Self::Neg(inner) => negate(inner.eval(row)?.as_ref()).map(Cow::Owned),
            Self::Not(inner) => Ok(Cow::Owned(Value::Bool(!inner.eval(row)?.is_truthy()))),
            Self::And(parts) => {
                for part in parts {
                    if !part.eval(row)?.is_truthy() {
                        return Ok(Cow::Owned(Value::Bool(false)));
                    }
                }
                Ok(Cow::Owned(Value::Bool(true)))
            }
            Self::Or(parts) => {
                for part in parts {
                    if part.eval(row)?.is_truthy() {
                        return Ok(Cow::Owned(Value::Bool(true)));
                    }
                }
                Ok(Cow::Owned(Value::Bool(false)))
            }
            Self::Compare { op, left, right } => {
                let left = left.eval(row)?;
                let right = right.eval(row)?;
                compare(*op, &left, &right).map(|b| Cow::Owned(Value::Bool(b)))
            }
        }
    }
}

/// Numeric view including bools, as comparisons treat `true` as 1
#[allow(clippy::cast_precision_loss)]
const fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn negate(value: &Value) -> Result<Value, ConditionError> {
    match value {
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| ConditionError::Evaluation {
            op: "-",
            detail: format!("{i} overflows"),
        }),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Bool(b) => Ok(Value::Int(-i64::from(*b))),
        Value::Null => Ok(Value::Null),
        other => Err(ConditionError::Evaluation {
            op: "-",
            detail: format!("cannot negate {}", other.kind()),
        }),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        _ => numeric(left)?.partial_cmp(&numeric(right)?),
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    match (numeric(left), numeric(right)) {
        (Some(_), Some(_)) => ordering(left, right) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    match op {
        CompareOp::Eq => return Ok(equal(left, right)),
        CompareOp::Ne => return Ok(!equal(left, right)),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Ok(false);
    }
    let both_numeric = numeric(left).is_some() && numeric(right).is_some();
    let same_kind = std::mem::discriminant(left) == std::mem::discriminant(right);
    let comparable = both_numeric
        || (same_kind && matches!(left, Value::Str(_) | Value::Bytes(_)));
    if !comparable {
        return Err(ConditionError::Evaluation {
            op: op.symbol(),
            detail: format!("{} and {} are not ordered", left.kind(), right.kind()),
        });
    }
    // NaN compares false for every ordering
    let Some(ord) = ordering(left, right) else {
        return Ok(false);
    };
    Ok(match op {
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
    })
}
