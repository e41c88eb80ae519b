#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::query::{QueryError, TableScan};
use crate::stats::{compute_stats, int_value, ColumnStats};
use crate::types::{ColumnType, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Physical storage for one column. Null slots hold a placeholder and are masked by validity.
#[derive(Clone, Debug)]
pub(crate) enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(BitVec),
    Dict {
        indices: Vec<u32>,
        dictionary: Arc<Vec<Arc<str>>>,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Column {
    pub(crate) schema: ColumnSchema,
    pub(crate) data: ColumnData,
    pub(crate) validity: BitVec,
    pub(crate) stats: ColumnStats,
}

impl Column {
    pub(crate) fn get(&self, row: usize) -> Value {
        if !self.validity.get(row) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Float(values) => Value::Number(values[row]),
            ColumnData::Int(values) => int_value(self.schema.column_type, values[row]),
            ColumnData::Bool(bits) => Value::Boolean(bits.get(row)),
            ColumnData::Dict {
                indices,
                dictionary,
            } => Value::String(Arc::clone(&dictionary[indices[row] as usize])),
        }
    }
}

/// An immutable, finalized columnar table.
#[derive(Clone, Debug)]
pub struct ColumnarTable {
    pub(crate) schema: Vec<ColumnSchema>,
    pub(crate) columns: Vec<Column>,
    pub(crate) rows: usize,
}

impl ColumnarTable {
    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|c| c.name == name)
    }

    pub fn column_type(&self, col: usize) -> Option<ColumnType> {
        self.schema.get(col).map(|c| c.column_type)
    }

    /// Distinct strings of a dictionary-encoded column, in first-seen order.
    pub fn dictionary(&self, col: usize) -> Option<Arc<Vec<Arc<str>>>> {
        match &self.columns.get(col)?.data {
            ColumnData::Dict { dictionary, .. } => Some(Arc::clone(dictionary)),
            _ => None,
        }
    }

    /// Returns `Value::Null` for out-of-range coordinates.
    pub fn get_cell(&self, row: usize, col: usize) -> Value {
        if row >= self.rows {
            return Value::Null;
        }
        self.columns
            .get(col)
            .map_or(Value::Null, |column| column.get(row))
    }

    pub fn scan(&self) -> TableScan<'_> {
        TableScan::new(self)
    }
}

enum ColumnBuilder {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(BitVec),
    Dict {
        indices: Vec<u32>,
        dictionary: Vec<Arc<str>>,
        lookup: HashMap<Arc<str>, u32>,
    },
}

impl ColumnBuilder {
    fn for_type(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Number => ColumnBuilder::Float(Vec::new()),
            ColumnType::String => ColumnBuilder::Dict {
                indices: Vec::new(),
                dictionary: Vec::new(),
                lookup: HashMap::new(),
            },
            ColumnType::Boolean => ColumnBuilder::Bool(BitVec::new()),
            ColumnType::DateTime | ColumnType::Currency { .. } | ColumnType::Percentage { .. } => {
                ColumnBuilder::Int(Vec::new())
            }
        }
    }

    fn push_null(&mut self) {
        match self {
            ColumnBuilder::Float(values) => values.push(0.0),
            ColumnBuilder::Int(values) => values.push(0),
            ColumnBuilder::Bool(bits) => bits.push(false),
            ColumnBuilder::Dict { indices, .. } => indices.push(0),
        }
    }

    /// Returns `false` when `value` does not fit the column type.
    fn push(&mut self, column_type: ColumnType, value: &Value) -> bool {
        match (self, value) {
            (ColumnBuilder::Float(values), Value::Number(n)) => values.push(*n),
            (ColumnBuilder::Bool(bits), Value::Boolean(b)) => bits.push(*b),
            (ColumnBuilder::Int(values), Value::DateTime(v))
                if column_type == ColumnType::DateTime =>
            {
                values.push(*v)
            }
            (ColumnBuilder::Int(values), Value::Currency(v))
                if matches!(column_type, ColumnType::Currency { .. }) =>
            {
                values.push(*v)
            }
            (ColumnBuilder::Int(values), Value::Percentage(v))
                if matches!(column_type, ColumnType::Percentage { .. }) =>
            {
                values.push(*v)
            }
            (
                ColumnBuilder::Dict {
                    indices,
                    dictionary,
                    lookup,
                },
                Value::String(s),
            ) => {
                let code = match lookup.get(s) {
                    Some(&code) => code,
                    None => {
                        let code = dictionary.len() as u32;
                        dictionary.push(Arc::clone(s));
                        lookup.insert(Arc::clone(s), code);
                        code
                    }
                };
                indices.push(code);
            }
            _ => return false,
        }
        true
    }

    fn finish(self) -> ColumnData {
        match self {
            ColumnBuilder::Float(values) => ColumnData::Float(values),
            ColumnBuilder::Int(values) => ColumnData::Int(values),
            ColumnBuilder::Bool(bits) => ColumnData::Bool(bits),
            ColumnBuilder::Dict {
                indices,
                dictionary,
                ..
            } => ColumnData::Dict {
                indices,
                dictionary: Arc::new(dictionary),
            },
        }
    }
}

/// Row-at-a-time builder for [`ColumnarTable`].
pub struct ColumnarTableBuilder {
    schema: Vec<ColumnSchema>,
    builders: Vec<ColumnBuilder>,
    validity: Vec<BitVec>,
    rows: usize,
}

impl ColumnarTableBuilder {
    pub fn new(schema: Vec<ColumnSchema>) -> Self {
        let builders = schema
            .iter()
            .map(|c| ColumnBuilder::for_type(c.column_type))
            .collect();
        let validity = schema.iter().map(|_| BitVec::new()).collect();
        Self {
            schema,
            builders,
            validity,
            rows: 0,
        }
    }

    /// Append one row. The row is validated in full before anything is written, so a rejected
    /// row leaves the builder unchanged.
    pub fn append_row(&mut self, row: &[Value]) -> Result<(), QueryError> {
        if row.len() != self.schema.len() {
            return Err(QueryError::RowLength {
                expected: self.schema.len(),
                actual: row.len(),
            });
        }
        for (col, (schema, value)) in self.schema.iter().zip(row).enumerate() {
            if !value_fits(schema.column_type, value) {
                return Err(QueryError::TypeMismatch {
                    column: col,
                    column_type: schema.column_type,
                    value: value.to_string(),
                });
            }
        }

        for ((builder, validity), (schema, value)) in self
            .builders
            .iter_mut()
            .zip(self.validity.iter_mut())
            .zip(self.schema.iter().zip(row))
        {
            if value.is_null() {
                builder.push_null();
                validity.push(false);
            } else {
                builder.push(schema.column_type, value);
                validity.push(true);
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn finalize(self) -> ColumnarTable {
        let columns = self
            .schema
            .iter()
            .cloned()
            .zip(self.builders)
            .zip(self.validity)
            .map(|((schema, builder), validity)| {
                let data = builder.finish();
                let stats = compute_stats(schema.column_type, &data, &validity);
                Column {
                    schema,
                    data,
                    validity,
                    stats,
                }
            })
            .collect();

        ColumnarTable {
            schema: self.schema,
            columns,
            rows: self.rows,
        }
    }
}

fn value_fits(column_type: ColumnType, value: &Value) -> bool {
    matches!(
        (column_type, value),
        (_, Value::Null)
            | (ColumnType::Number, Value::Number(_))
            | (ColumnType::String, Value::String(_))
            | (ColumnType::Boolean, Value::Boolean(_))
            | (ColumnType::DateTime, Value::DateTime(_))
            | (ColumnType::Currency { .. }, Value::Currency(_))
            | (ColumnType::Percentage { .. }, Value::Percentage(_))
    )
}
