//! Scalar values and the coercion rules every operator goes through.

use crate::error::{TabularError, TabularResult};
use crate::parser::BinaryOp;
use ordered_float::OrderedFloat;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Value {
    #[default]
    Blank,
    Number(OrderedFloat<f64>),
    Text(Arc<str>),
    Boolean(bool),
}

impl Value {
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.0),
            _ => None,
        }
    }

    /// Numeric coercion: booleans map to 1/0, blank to 0, text is a type error.
    pub fn to_number(&self) -> TabularResult<f64> {
        match self {
            Value::Number(n) => Ok(n.0),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Blank => Ok(0.0),
            Value::Text(_) => Err(TabularError::Type(format!(
                "cannot convert {self} to a number"
            ))),
        }
    }

    /// Text coercion used by `&`.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Value::Text(s) => Cow::Borrowed(s.as_ref()),
            Value::Number(n) => Cow::Owned(n.0.to_string()),
            Value::Blank => Cow::Borrowed(""),
            Value::Boolean(b) => Cow::Borrowed(if *b { "TRUE" } else { "FALSE" }),
        }
    }

    pub fn truthy(&self) -> TabularResult<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(n.0 != 0.0),
            Value::Blank => Ok(false),
            Value::Text(_) => Err(TabularError::Type(format!(
                "cannot convert {self} to a boolean"
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Blank => f.write_str("BLANK"),
            Value::Number(n) => write!(f, "{}", n.0),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(OrderedFloat(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(OrderedFloat(value as f64))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::Text(value)
    }
}

/// Apply an arithmetic, concatenation, or comparison operator.
///
/// `/` is plain floating-point division; `DIVIDE` handles zero denominators separately.
/// `&&` and `||` short-circuit in the evaluator and never reach this function.
pub(crate) fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> TabularResult<Value> {
    match op {
        BinaryOp::Add => Ok(Value::from(left.to_number()? + right.to_number()?)),
        BinaryOp::Subtract => Ok(Value::from(left.to_number()? - right.to_number()?)),
        BinaryOp::Multiply => Ok(Value::from(left.to_number()? * right.to_number()?)),
        BinaryOp::Divide => Ok(Value::from(left.to_number()? / right.to_number()?)),
        BinaryOp::Concat => {
            let mut out = left.to_text().into_owned();
            out.push_str(&right.to_text());
            Ok(Value::from(out))
        }
        BinaryOp::Equals
        | BinaryOp::NotEquals
        | BinaryOp::Less
        | BinaryOp::LessEquals
        | BinaryOp::Greater
        | BinaryOp::GreaterEquals => compare_values(op, left, right).map(Value::Boolean),
        BinaryOp::And | BinaryOp::Or => Err(TabularError::Eval(format!(
            "{op:?} must be evaluated with short-circuiting"
        ))),
    }
}

pub(crate) fn compare_values(op: BinaryOp, left: &Value, right: &Value) -> TabularResult<bool> {
    let cmp = match (left, right) {
        (Value::Text(l), Value::Text(r)) => l.as_ref().cmp(r.as_ref()),
        (Value::Text(l), Value::Blank) => l.as_ref().cmp(""),
        (Value::Blank, Value::Text(r)) => "".cmp(r.as_ref()),
        (Value::Text(_), _) | (_, Value::Text(_)) => {
            return Err(TabularError::Type(format!(
                "cannot compare {left} and {right}"
            )))
        }
        _ => {
            // NaN sorts above every number and equals itself.
            let l = OrderedFloat(left.to_number()?);
            let r = OrderedFloat(right.to_number()?);
            l.cmp(&r)
        }
    };

    Ok(match op {
        BinaryOp::Equals => cmp == Ordering::Equal,
        BinaryOp::NotEquals => cmp != Ordering::Equal,
        BinaryOp::Less => cmp == Ordering::Less,
        BinaryOp::LessEquals => cmp != Ordering::Greater,
        BinaryOp::Greater => cmp == Ordering::Greater,
        BinaryOp::GreaterEquals => cmp != Ordering::Less,
        other => {
            return Err(TabularError::Eval(format!(
                "{other:?} is not a comparison operator"
            )))
        }
    })
}

/// Total order used to sort pivot group keys: blank, booleans, numbers, then text.
pub(crate) fn cmp_for_sort(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Blank => 0,
            Value::Boolean(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
        }
    }
    match (a, b) {
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.as_ref().cmp(b.as_ref()),
        _ => rank(a).cmp(&rank(b)),
    }
}
