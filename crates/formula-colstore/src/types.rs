#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Logical column type.
///
/// `Currency` and `Percentage` store scaled integers: a value `v` with `scale = 2` represents
/// `v / 100`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColumnType {
    #[default]
    Number,
    String,
    Boolean,
    DateTime,
    Currency { scale: u8 },
    Percentage { scale: u8 },
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, ColumnType::String | ColumnType::Boolean)
    }

    /// Divisor that maps the stored integer back to its decimal value.
    pub fn scale_divisor(self) -> f64 {
        match self {
            ColumnType::Currency { scale } | ColumnType::Percentage { scale } => {
                10f64.powi(i32::from(scale))
            }
            _ => 1.0,
        }
    }
}

/// A single cell value as stored by the column store.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Boolean(bool),
    String(Arc<str>),
    /// Serial date-time (host-defined epoch).
    DateTime(i64),
    /// Scaled integer; see [`ColumnType::Currency`].
    Currency(i64),
    /// Scaled integer; see [`ColumnType::Percentage`].
    Percentage(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::DateTime(v) | Value::Currency(v) | Value::Percentage(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::String(value)
    }
}
