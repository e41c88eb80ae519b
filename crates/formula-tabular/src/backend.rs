use crate::error::{TabularError, TabularResult};
use crate::value::Value;
use formula_colstore::{AggSpec, ColumnType, ColumnarTable};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Aggregations a backend may compute natively during a grouped scan.
///
/// Semantics match the evaluator's functions of the same name: `Sum`, `Average`, `Min`, and
/// `Max` consider numbers only and yield blank when none are present; `Count` counts numbers;
/// `CountA` counts non-blank values; `DistinctCount` counts distinct values including blank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    Sum,
    Average,
    Min,
    Max,
    Count,
    CountA,
    DistinctCount,
    CountRows,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AggregationSpec {
    pub kind: AggregationKind,
    /// `None` only for [`AggregationKind::CountRows`].
    pub column_idx: Option<usize>,
}

/// Storage abstraction for tables.
///
/// Only the first four methods are required. Everything else is an optional acceleration:
/// `None` means "not supported here" and callers must fall back to scanning with
/// [`TableBackend::value_by_idx`].
pub trait TableBackend: fmt::Debug + Send + Sync {
    fn columns(&self) -> &[String];
    fn row_count(&self) -> usize;
    fn column_index(&self, column: &str) -> Option<usize>;
    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value>;

    fn value(&self, row: usize, column: &str) -> Option<Value> {
        let idx = self.column_index(column)?;
        self.value_by_idx(row, idx)
    }

    /// Sum of the numeric values in a column.
    fn stats_sum(&self, _idx: usize) -> Option<f64> {
        None
    }

    fn stats_non_blank_count(&self, _idx: usize) -> Option<usize> {
        None
    }

    /// Smallest numeric value in a column.
    fn stats_min(&self, _idx: usize) -> Option<Value> {
        None
    }

    fn stats_max(&self, _idx: usize) -> Option<Value> {
        None
    }

    /// Distinct count excluding blanks.
    fn stats_distinct_count(&self, _idx: usize) -> Option<u64> {
        None
    }

    fn stats_has_blank(&self, _idx: usize) -> Option<bool> {
        None
    }

    /// Distinct non-blank values, for dictionary-encoded columns.
    fn dictionary_values(&self, _idx: usize) -> Option<Vec<Value>> {
        None
    }

    fn filter_eq(&self, _idx: usize, _value: &Value) -> Option<Vec<usize>> {
        None
    }

    fn filter_in(&self, _idx: usize, _values: &[Value]) -> Option<Vec<usize>> {
        None
    }

    /// Distinct values (blank included when present) over `rows`, or the whole column.
    fn distinct_values_filtered(&self, _idx: usize, _rows: Option<&[usize]>) -> Option<Vec<Value>> {
        None
    }

    /// Grouped aggregation over `rows` (or all rows). Each output row holds the group key values
    /// followed by one value per aggregation. Group order is unspecified.
    fn group_by_aggregations(
        &self,
        _group_by: &[usize],
        _aggs: &[AggregationSpec],
        _rows: Option<&[usize]>,
    ) -> Option<Vec<Vec<Value>>> {
        None
    }
}

/// Mutable row store. Supports appends and cell writes; offers no accelerations.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTableBackend {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl InMemoryTableBackend {
    pub fn new(columns: Vec<String>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();
        Self {
            columns,
            column_index,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, table: &str, row: Vec<Value>) -> TabularResult<()> {
        if row.len() != self.columns.len() {
            return Err(TabularError::SchemaMismatch {
                table: table.to_string(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn pop_row(&mut self) -> Option<Vec<Value>> {
        self.rows.pop()
    }

    pub fn add_column(&mut self, table: &str, name: String, values: Vec<Value>) -> TabularResult<()> {
        if self.column_index.contains_key(&name) {
            return Err(TabularError::DuplicateColumn {
                table: table.to_string(),
                column: name,
            });
        }
        if values.len() != self.rows.len() {
            return Err(TabularError::ColumnLengthMismatch {
                table: table.to_string(),
                column: name,
                expected: self.rows.len(),
                actual: values.len(),
            });
        }

        self.column_index.insert(name.clone(), self.columns.len());
        self.columns.push(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    pub fn set_value_by_idx(&mut self, row: usize, idx: usize, value: Value) -> TabularResult<()> {
        let slot = self
            .rows
            .get_mut(row)
            .and_then(|r| r.get_mut(idx))
            .ok_or_else(|| TabularError::Eval(format!("cell ({row}, {idx}) out of bounds")))?;
        *slot = value;
        Ok(())
    }
}

impl TableBackend for InMemoryTableBackend {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value> {
        self.rows.get(row)?.get(idx).cloned()
    }
}

/// Read-only adapter over a host-built [`ColumnarTable`].
///
/// Host value kinds collapse into [`Value`]: date-times become their serial number, and scaled
/// currency/percentage integers are divided by `10^scale`.
#[derive(Clone)]
pub struct ColumnarTableBackend {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    table: Arc<ColumnarTable>,
}

impl fmt::Debug for ColumnarTableBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnarTableBackend")
            .field("columns", &self.columns)
            .field("rows", &self.table.row_count())
            .finish()
    }
}

/// How one requested aggregation is assembled from column-store aggregations.
enum AggPlan {
    Direct { slot: usize, divisor: f64 },
    Extreme { slot: usize, column_type: ColumnType },
    DistinctWithBlank { distinct: usize, non_null: usize, rows: usize },
}

impl ColumnarTableBackend {
    pub fn new(table: ColumnarTable) -> Self {
        Self::from_arc(Arc::new(table))
    }

    pub fn from_arc(table: Arc<ColumnarTable>) -> Self {
        let columns: Vec<String> = table.schema().iter().map(|c| c.name.clone()).collect();
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();
        Self {
            columns,
            column_index,
            table,
        }
    }

    pub(crate) fn column_type(&self, idx: usize) -> Option<ColumnType> {
        self.table.column_type(idx)
    }

    fn is_numeric(&self, idx: usize) -> bool {
        self.column_type(idx).is_some_and(ColumnType::is_numeric)
    }

    fn from_store(value: formula_colstore::Value, column_type: ColumnType) -> Value {
        use formula_colstore::Value as Stored;
        match value {
            Stored::Null => Value::Blank,
            Stored::Number(n) => Value::from(n),
            Stored::Boolean(b) => Value::from(b),
            Stored::String(s) => Value::from(s),
            Stored::DateTime(v) => Value::from(v as f64),
            Stored::Currency(v) | Stored::Percentage(v) => {
                Value::from(v as f64 / column_type.scale_divisor())
            }
        }
    }

    /// Inverse of [`Self::from_store`]; `None` when no stored cell can equal `value`.
    fn to_store(value: &Value, column_type: ColumnType) -> Option<formula_colstore::Value> {
        use formula_colstore::Value as Stored;
        match (value, column_type) {
            (Value::Blank, _) => Some(Stored::Null),
            (Value::Number(n), ColumnType::Number) => Some(Stored::Number(n.0)),
            (Value::Text(s), ColumnType::String) => Some(Stored::String(Arc::clone(s))),
            (Value::Boolean(b), ColumnType::Boolean) => Some(Stored::Boolean(*b)),
            (Value::Number(n), ColumnType::DateTime) => {
                (n.0.fract() == 0.0).then(|| Stored::DateTime(n.0 as i64))
            }
            (Value::Number(n), ColumnType::Currency { .. } | ColumnType::Percentage { .. }) => {
                let scaled = n.0 * column_type.scale_divisor();
                if (scaled - scaled.round()).abs() > 1e-9 {
                    return None;
                }
                let raw = scaled.round() as i64;
                Some(match column_type {
                    ColumnType::Currency { .. } => Stored::Currency(raw),
                    _ => Stored::Percentage(raw),
                })
            }
            _ => None,
        }
    }

    fn plan_aggregations(&self, aggs: &[AggregationSpec]) -> Option<(Vec<AggSpec>, Vec<AggPlan>)> {
        let mut store_aggs = Vec::new();
        let mut plans = Vec::with_capacity(aggs.len());
        let mut push = |spec: AggSpec| {
            store_aggs.push(spec);
            store_aggs.len() - 1
        };

        for agg in aggs {
            if agg.kind == AggregationKind::CountRows {
                plans.push(AggPlan::Direct {
                    slot: push(AggSpec::count_rows()),
                    divisor: 1.0,
                });
                continue;
            }
            let idx = agg.column_idx?;
            let column_type = self.column_type(idx)?;
            let numeric = column_type.is_numeric();
            let plan = match agg.kind {
                AggregationKind::Sum if numeric => AggPlan::Direct {
                    slot: push(AggSpec::sum_f64(idx)),
                    divisor: column_type.scale_divisor(),
                },
                AggregationKind::Average if numeric => AggPlan::Direct {
                    slot: push(AggSpec::avg_f64(idx)),
                    divisor: column_type.scale_divisor(),
                },
                AggregationKind::Min if numeric => AggPlan::Extreme {
                    slot: push(AggSpec::min(idx)),
                    column_type,
                },
                AggregationKind::Max if numeric => AggPlan::Extreme {
                    slot: push(AggSpec::max(idx)),
                    column_type,
                },
                AggregationKind::Count if numeric => AggPlan::Direct {
                    slot: push(AggSpec::count_non_null(idx)),
                    divisor: 1.0,
                },
                AggregationKind::CountA => AggPlan::Direct {
                    slot: push(AggSpec::count_non_null(idx)),
                    divisor: 1.0,
                },
                AggregationKind::DistinctCount => AggPlan::DistinctWithBlank {
                    distinct: push(AggSpec::distinct_count(idx)),
                    non_null: push(AggSpec::count_non_null(idx)),
                    rows: push(AggSpec::count_rows()),
                },
                _ => return None,
            };
            plans.push(plan);
        }
        Some((store_aggs, plans))
    }
}

fn stored_f64(value: &formula_colstore::Value) -> Option<f64> {
    match value {
        formula_colstore::Value::Number(n) => Some(*n),
        _ => None,
    }
}

impl TableBackend for ColumnarTableBackend {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.table.row_count()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value> {
        if row >= self.table.row_count() {
            return None;
        }
        let column_type = self.column_type(idx)?;
        Some(Self::from_store(self.table.get_cell(row, idx), column_type))
    }

    fn stats_sum(&self, idx: usize) -> Option<f64> {
        if !self.is_numeric(idx) {
            return None;
        }
        let divisor = self.column_type(idx)?.scale_divisor();
        Some(self.table.scan().sum_f64(idx)? / divisor)
    }

    fn stats_non_blank_count(&self, idx: usize) -> Option<usize> {
        let stats = self.table.scan().stats(idx)?;
        Some(self.table.row_count() - stats.null_count as usize)
    }

    fn stats_min(&self, idx: usize) -> Option<Value> {
        if !self.is_numeric(idx) {
            return None;
        }
        let stats = self.table.scan().stats(idx)?;
        Some(stats.min.clone().map_or(Value::Blank, |v| {
            Self::from_store(v, stats.column_type)
        }))
    }

    fn stats_max(&self, idx: usize) -> Option<Value> {
        if !self.is_numeric(idx) {
            return None;
        }
        let stats = self.table.scan().stats(idx)?;
        Some(stats.max.clone().map_or(Value::Blank, |v| {
            Self::from_store(v, stats.column_type)
        }))
    }

    fn stats_distinct_count(&self, idx: usize) -> Option<u64> {
        Some(self.table.scan().stats(idx)?.distinct_count)
    }

    fn stats_has_blank(&self, idx: usize) -> Option<bool> {
        Some(self.table.scan().stats(idx)?.null_count > 0)
    }

    fn dictionary_values(&self, idx: usize) -> Option<Vec<Value>> {
        let dict = self.table.dictionary(idx)?;
        Some(dict.iter().cloned().map(Value::from).collect())
    }

    fn filter_eq(&self, idx: usize, value: &Value) -> Option<Vec<usize>> {
        self.filter_in(idx, std::slice::from_ref(value))
    }

    fn filter_in(&self, idx: usize, values: &[Value]) -> Option<Vec<usize>> {
        let column_type = self.column_type(idx)?;
        let wanted: Vec<formula_colstore::Value> = values
            .iter()
            .filter_map(|v| Self::to_store(v, column_type))
            .collect();
        self.table.scan().filter_in(idx, &wanted).ok()
    }

    fn distinct_values_filtered(&self, idx: usize, rows: Option<&[usize]>) -> Option<Vec<Value>> {
        let column_type = self.column_type(idx)?;
        let values = self.table.scan().distinct_values(idx, rows).ok()?;
        Some(
            values
                .into_iter()
                .map(|v| Self::from_store(v, column_type))
                .collect(),
        )
    }

    fn group_by_aggregations(
        &self,
        group_by: &[usize],
        aggs: &[AggregationSpec],
        rows: Option<&[usize]>,
    ) -> Option<Vec<Vec<Value>>> {
        let key_types: Vec<ColumnType> = group_by
            .iter()
            .map(|&idx| self.column_type(idx))
            .collect::<Option<_>>()?;
        let (store_aggs, plans) = self.plan_aggregations(aggs)?;
        let result = self.table.scan().group_by(group_by, &store_aggs, rows).ok()?;

        let key_len = group_by.len();
        let out = result
            .into_rows()
            .into_iter()
            .map(|row| {
                let (keys, values) = row.split_at(key_len);
                let mut out: Vec<Value> = keys
                    .iter()
                    .zip(&key_types)
                    .map(|(v, &t)| Self::from_store(v.clone(), t))
                    .collect();
                for plan in &plans {
                    out.push(match *plan {
                        AggPlan::Direct { slot, divisor } => stored_f64(&values[slot])
                            .map_or(Value::Blank, |n| Value::from(n / divisor)),
                        AggPlan::Extreme { slot, column_type } => {
                            Self::from_store(values[slot].clone(), column_type)
                        }
                        AggPlan::DistinctWithBlank {
                            distinct,
                            non_null,
                            rows,
                        } => {
                            let distinct = stored_f64(&values[distinct]).unwrap_or(0.0);
                            let non_null = stored_f64(&values[non_null]).unwrap_or(0.0);
                            let rows = stored_f64(&values[rows]).unwrap_or(0.0);
                            let blank = if rows > non_null { 1.0 } else { 0.0 };
                            Value::from(distinct + blank)
                        }
                    });
                }
                out
            })
            .collect();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_colstore::{ColumnSchema, ColumnarTableBuilder};

    fn prices() -> ColumnarTableBackend {
        let mut builder = ColumnarTableBuilder::new(vec![
            ColumnSchema::new("Sku", ColumnType::String),
            ColumnSchema::new("Price", ColumnType::Currency { scale: 2 }),
            ColumnSchema::new("Active", ColumnType::Boolean),
        ]);
        use formula_colstore::Value as S;
        for (sku, price, active) in [("a", 1_250, true), ("b", 300, false), ("a", 50, true)] {
            builder
                .append_row(&[S::from(sku), S::Currency(price), S::Boolean(active)])
                .unwrap();
        }
        builder
            .append_row(&[S::Null, S::Null, S::Null])
            .unwrap();
        ColumnarTableBackend::new(builder.finalize())
    }

    #[test]
    fn currency_collapses_to_scaled_number() {
        let backend = prices();
        assert_eq!(backend.value_by_idx(0, 1), Some(Value::from(12.5)));
        assert_eq!(backend.value_by_idx(3, 1), Some(Value::Blank));
        assert_eq!(backend.stats_sum(1), Some(16.0));
        assert_eq!(backend.stats_min(1), Some(Value::from(0.5)));
        assert_eq!(backend.stats_sum(2), None);
    }

    #[test]
    fn filter_eq_maps_engine_values_into_storage() {
        let backend = prices();
        assert_eq!(backend.filter_eq(1, &Value::from(3.0)), Some(vec![1]));
        assert_eq!(backend.filter_eq(1, &Value::from(3.001)), Some(vec![]));
        assert_eq!(backend.filter_eq(0, &Value::Blank), Some(vec![3]));
        assert_eq!(
            backend.filter_in(0, &[Value::from("a"), Value::from(1.0)]),
            Some(vec![0, 2])
        );
    }

    #[test]
    fn grouped_distinct_count_counts_blank_once() {
        let backend = prices();
        let rows = backend
            .group_by_aggregations(
                &[],
                &[
                    AggregationSpec {
                        kind: AggregationKind::DistinctCount,
                        column_idx: Some(0),
                    },
                    AggregationSpec {
                        kind: AggregationKind::Sum,
                        column_idx: Some(1),
                    },
                ],
                None,
            )
            .unwrap();
        assert_eq!(rows, vec![vec![Value::from(3.0), Value::from(16.0)]]);
    }

    #[test]
    fn unsupported_aggregations_report_none() {
        let backend = prices();
        let sum_text = AggregationSpec {
            kind: AggregationKind::Sum,
            column_idx: Some(0),
        };
        assert!(backend.group_by_aggregations(&[], &[sum_text], None).is_none());
        assert!(InMemoryTableBackend::new(vec!["A".into()])
            .group_by_aggregations(&[], &[], None)
            .is_none());
    }
}
