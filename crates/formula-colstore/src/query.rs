#![forbid(unsafe_code)]

use crate::stats::{float_key, ColumnStats};
use crate::table::{Column, ColumnData, ColumnarTable};
use crate::types::{ColumnType, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("row has {actual} values, schema expects {expected}")]
    RowLength { expected: usize, actual: usize },

    #[error("value {value} does not fit column {column} of type {column_type:?}")]
    TypeMismatch {
        column: usize,
        column_type: ColumnType,
        value: String,
    },

    #[error("column index {0} out of range")]
    ColumnOutOfRange(usize),

    #[error("row index {0} out of range")]
    RowOutOfRange(usize),

    #[error("aggregation {op:?} is not supported for column type {column_type:?}")]
    UnsupportedAggregation { op: AggOp, column_type: ColumnType },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggOp {
    CountRows,
    CountNonNull,
    /// Sum in storage units (scaled integers are not rescaled).
    SumF64,
    AvgF64,
    Min,
    Max,
    /// Distinct non-null values.
    DistinctCount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggSpec {
    pub op: AggOp,
    pub column: Option<usize>,
    pub name: Option<String>,
}

impl AggSpec {
    fn on(op: AggOp, column: usize) -> Self {
        Self {
            op,
            column: Some(column),
            name: None,
        }
    }

    pub fn count_rows() -> Self {
        Self {
            op: AggOp::CountRows,
            column: None,
            name: None,
        }
    }

    pub fn count_non_null(column: usize) -> Self {
        Self::on(AggOp::CountNonNull, column)
    }

    pub fn sum_f64(column: usize) -> Self {
        Self::on(AggOp::SumF64, column)
    }

    pub fn avg_f64(column: usize) -> Self {
        Self::on(AggOp::AvgF64, column)
    }

    pub fn min(column: usize) -> Self {
        Self::on(AggOp::Min, column)
    }

    pub fn max(column: usize) -> Self {
        Self::on(AggOp::Max, column)
    }

    pub fn distinct_count(column: usize) -> Self {
        Self::on(AggOp::DistinctCount, column)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Row-major grouped aggregation output: key columns first, then one column per aggregation.
///
/// Groups appear in first-seen scan order.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupByResult {
    names: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl GroupByResult {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Column-major copy of the result.
    pub fn to_values(&self) -> Vec<Vec<Value>> {
        (0..self.names.len())
            .map(|col| self.rows.iter().map(|row| row[col].clone()).collect())
            .collect()
    }
}

/// Hashable identity of a stored cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum CellKey {
    Null,
    Float(u64),
    Int(i64),
    Bool(bool),
    Code(u32),
}

fn cell_key(column: &Column, row: usize) -> CellKey {
    if !column.validity.get(row) {
        return CellKey::Null;
    }
    match &column.data {
        ColumnData::Float(values) => CellKey::Float(float_key(values[row])),
        ColumnData::Int(values) => CellKey::Int(values[row]),
        ColumnData::Bool(bits) => CellKey::Bool(bits.get(row)),
        ColumnData::Dict { indices, .. } => CellKey::Code(indices[row]),
    }
}

fn numeric_at(column: &Column, row: usize) -> Option<f64> {
    if !column.validity.get(row) {
        return None;
    }
    match &column.data {
        ColumnData::Float(values) => Some(values[row]),
        ColumnData::Int(values) => Some(values[row] as f64),
        ColumnData::Bool(bits) => Some(if bits.get(row) { 1.0 } else { 0.0 }),
        ColumnData::Dict { .. } => None,
    }
}

/// Orders two non-null cells of the same column.
fn cell_less(column: &Column, a: usize, b: usize) -> bool {
    match &column.data {
        ColumnData::Float(values) => values[a] < values[b],
        ColumnData::Int(values) => values[a] < values[b],
        ColumnData::Bool(bits) => !bits.get(a) && bits.get(b),
        ColumnData::Dict {
            indices,
            dictionary,
        } => dictionary[indices[a] as usize] < dictionary[indices[b] as usize],
    }
}

enum AggState {
    Count(u64),
    Sum { sum: f64, n: u64 },
    Extreme(Option<usize>),
    Distinct(HashSet<CellKey>),
}

impl AggState {
    fn new(op: AggOp) -> Self {
        match op {
            AggOp::CountRows | AggOp::CountNonNull => AggState::Count(0),
            AggOp::SumF64 | AggOp::AvgF64 => AggState::Sum { sum: 0.0, n: 0 },
            AggOp::Min | AggOp::Max => AggState::Extreme(None),
            AggOp::DistinctCount => AggState::Distinct(HashSet::new()),
        }
    }

    fn update(&mut self, op: AggOp, column: Option<&Column>, row: usize) {
        match (self, column) {
            (AggState::Count(n), None) => *n += 1,
            (AggState::Count(n), Some(column)) => {
                if column.validity.get(row) {
                    *n += 1;
                }
            }
            (AggState::Sum { sum, n }, Some(column)) => {
                if let Some(v) = numeric_at(column, row) {
                    *sum += v;
                    *n += 1;
                }
            }
            (AggState::Extreme(best), Some(column)) => {
                if !column.validity.get(row) {
                    return;
                }
                let replace = match *best {
                    None => true,
                    Some(current) if op == AggOp::Min => cell_less(column, row, current),
                    Some(current) => cell_less(column, current, row),
                };
                if replace {
                    *best = Some(row);
                }
            }
            (AggState::Distinct(seen), Some(column)) => {
                let key = cell_key(column, row);
                if key != CellKey::Null {
                    seen.insert(key);
                }
            }
            _ => {}
        }
    }

    fn finish(self, op: AggOp, column: Option<&Column>) -> Value {
        match self {
            AggState::Count(n) => Value::Number(n as f64),
            AggState::Sum { n: 0, .. } => Value::Null,
            AggState::Sum { sum, n } if op == AggOp::AvgF64 => Value::Number(sum / n as f64),
            AggState::Sum { sum, .. } => Value::Number(sum),
            AggState::Extreme(Some(row)) => column.map_or(Value::Null, |c| c.get(row)),
            AggState::Extreme(None) => Value::Null,
            AggState::Distinct(seen) => Value::Number(seen.len() as f64),
        }
    }
}

/// Read-only query surface over a [`ColumnarTable`].
pub struct TableScan<'a> {
    table: &'a ColumnarTable,
}

impl<'a> TableScan<'a> {
    pub(crate) fn new(table: &'a ColumnarTable) -> Self {
        Self { table }
    }

    pub fn stats(&self, col: usize) -> Option<&'a ColumnStats> {
        self.table.columns.get(col).map(|c| &c.stats)
    }

    pub fn count_non_null(&self, col: usize) -> u64 {
        self.stats(col)
            .map_or(0, |s| self.table.rows as u64 - s.null_count)
    }

    /// Sum of non-null values in storage units; `None` for string columns.
    pub fn sum_f64(&self, col: usize) -> Option<f64> {
        self.stats(col)?.sum
    }

    /// Rows whose cell equals `value`. A `Null` value matches null cells.
    pub fn filter_eq(&self, col: usize, value: &Value) -> Result<Vec<usize>, QueryError> {
        self.filter_in(col, std::slice::from_ref(value))
    }

    /// Rows whose cell equals any of `values`, in increasing order.
    pub fn filter_in(&self, col: usize, values: &[Value]) -> Result<Vec<usize>, QueryError> {
        let column = self
            .table
            .columns
            .get(col)
            .ok_or(QueryError::ColumnOutOfRange(col))?;
        let targets: HashSet<CellKey> = values
            .iter()
            .filter_map(|v| needle_key(column, v))
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        Ok((0..self.table.rows)
            .filter(|&row| targets.contains(&cell_key(column, row)))
            .collect())
    }

    /// Distinct values (including `Null` when present) over `rows`, or the whole column when
    /// `rows` is `None`. Values appear in first-seen order.
    pub fn distinct_values(
        &self,
        col: usize,
        rows: Option<&[usize]>,
    ) -> Result<Vec<Value>, QueryError> {
        let column = self
            .table
            .columns
            .get(col)
            .ok_or(QueryError::ColumnOutOfRange(col))?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in self.row_iter(rows)? {
            if seen.insert(cell_key(column, row)) {
                out.push(column.get(row));
            }
        }
        Ok(out)
    }

    fn row_iter<'r>(
        &self,
        rows: Option<&'r [usize]>,
    ) -> Result<Box<dyn Iterator<Item = usize> + 'r>, QueryError> {
        match rows {
            None => Ok(Box::new(0..self.table.rows)),
            Some(rows) => {
                if let Some(&bad) = rows.iter().find(|&&r| r >= self.table.rows) {
                    return Err(QueryError::RowOutOfRange(bad));
                }
                Ok(Box::new(rows.iter().copied()))
            }
        }
    }

    /// Group `rows` (all rows when `None`) by `keys` and evaluate `aggs` per group.
    pub fn group_by(
        &self,
        keys: &[usize],
        aggs: &[AggSpec],
        rows: Option<&[usize]>,
    ) -> Result<GroupByResult, QueryError> {
        let columns = &self.table.columns;
        for &key in keys {
            if key >= columns.len() {
                return Err(QueryError::ColumnOutOfRange(key));
            }
        }
        for agg in aggs {
            if let Some(col) = agg.column {
                let column = columns.get(col).ok_or(QueryError::ColumnOutOfRange(col))?;
                let column_type = column.schema.column_type;
                if matches!(agg.op, AggOp::SumF64 | AggOp::AvgF64)
                    && column_type == ColumnType::String
                {
                    return Err(QueryError::UnsupportedAggregation {
                        op: agg.op,
                        column_type,
                    });
                }
            } else if agg.op != AggOp::CountRows {
                return Err(QueryError::UnsupportedAggregation {
                    op: agg.op,
                    column_type: ColumnType::default(),
                });
            }
        }

        let agg_columns: Vec<Option<&Column>> = aggs
            .iter()
            .map(|a| a.column.map(|c| &columns[c]))
            .collect();

        let mut group_index: HashMap<Vec<CellKey>, usize> = HashMap::new();
        let mut group_rows: Vec<usize> = Vec::new();
        let mut states: Vec<Vec<AggState>> = Vec::new();

        for row in self.row_iter(rows)? {
            let key: Vec<CellKey> = keys.iter().map(|&k| cell_key(&columns[k], row)).collect();
            let slot = *group_index.entry(key).or_insert_with(|| {
                group_rows.push(row);
                states.push(aggs.iter().map(|a| AggState::new(a.op)).collect());
                states.len() - 1
            });
            for ((state, agg), column) in states[slot].iter_mut().zip(aggs).zip(&agg_columns) {
                state.update(agg.op, *column, row);
            }
        }

        let mut names: Vec<String> = keys
            .iter()
            .map(|&k| self.table.schema[k].name.clone())
            .collect();
        names.extend(aggs.iter().map(|a| agg_name(self.table, a)));

        let rows = group_rows
            .into_iter()
            .zip(states)
            .map(|(first_row, group_states)| {
                let mut out: Vec<Value> =
                    keys.iter().map(|&k| columns[k].get(first_row)).collect();
                for ((state, agg), column) in group_states.into_iter().zip(aggs).zip(&agg_columns)
                {
                    out.push(state.finish(agg.op, *column));
                }
                out
            })
            .collect();

        Ok(GroupByResult { names, rows })
    }
}

fn agg_name(table: &ColumnarTable, agg: &AggSpec) -> String {
    if let Some(name) = &agg.name {
        return name.clone();
    }
    let op = match agg.op {
        AggOp::CountRows => return "count".to_string(),
        AggOp::CountNonNull => "count",
        AggOp::SumF64 => "sum",
        AggOp::AvgF64 => "avg",
        AggOp::Min => "min",
        AggOp::Max => "max",
        AggOp::DistinctCount => "distinct_count",
    };
    let column = agg
        .column
        .and_then(|c| table.schema.get(c))
        .map_or("", |s| s.name.as_str());
    format!("{op}_{column}")
}

/// Key a searched value would have in `column`, or `None` if it can never match.
fn needle_key(column: &Column, value: &Value) -> Option<CellKey> {
    match (&column.data, value) {
        (_, Value::Null) => Some(CellKey::Null),
        (ColumnData::Float(_), Value::Number(n)) => Some(CellKey::Float(float_key(*n))),
        (ColumnData::Int(_), Value::DateTime(v) | Value::Currency(v) | Value::Percentage(v)) => {
            Some(CellKey::Int(*v))
        }
        (ColumnData::Bool(_), Value::Boolean(b)) => Some(CellKey::Bool(*b)),
        (ColumnData::Dict { dictionary, .. }, Value::String(s)) => dictionary
            .iter()
            .position(|d| d == s)
            .map(|code| CellKey::Code(code as u32)),
        _ => None,
    }
}

impl ColumnarTable {
    /// Shorthand for `self.scan().group_by(keys, aggs, None)`.
    pub fn group_by(&self, keys: &[usize], aggs: &[AggSpec]) -> Result<GroupByResult, QueryError> {
        self.scan().group_by(keys, aggs, None)
    }
}
