use super::TabularEngine;
use crate::backend::{AggregationKind, AggregationSpec, TableBackend};
use crate::context::{FilterContext, RowContext};
use crate::error::{TabularError, TabularResult};
use crate::model::DataModel;
use crate::parser::Expr;
use crate::propagation::{blank_member_visible, resolve_row_sets, resolve_table_rows};
use crate::value::Value;
use std::collections::HashSet;

/// Fold column values the way the aggregation functions do.
///
/// Sum, average, min and max only look at numbers and yield blank when there are none. The
/// counting kinds always yield a number.
pub(crate) fn fold_values(kind: AggregationKind, values: impl IntoIterator<Item = Value>) -> Value {
    let mut sum = 0.0;
    let mut numbers = 0usize;
    let mut rows = 0usize;
    let mut non_blank = 0usize;
    let mut best: Option<f64> = None;
    let mut distinct = HashSet::new();

    for value in values {
        rows += 1;
        if !value.is_blank() {
            non_blank += 1;
        }
        if let Some(n) = value.as_f64() {
            numbers += 1;
            sum += n;
            best = Some(match (kind, best) {
                (AggregationKind::Min, Some(b)) => b.min(n),
                (AggregationKind::Max, Some(b)) => b.max(n),
                _ => n,
            });
        }
        if kind == AggregationKind::DistinctCount {
            distinct.insert(value);
        }
    }

    let count = |n: usize| Value::from(n as f64);
    match kind {
        AggregationKind::Sum if numbers > 0 => Value::from(sum),
        AggregationKind::Average if numbers > 0 => Value::from(sum / numbers as f64),
        AggregationKind::Min | AggregationKind::Max => best.map_or(Value::Blank, Value::from),
        AggregationKind::Sum | AggregationKind::Average => Value::Blank,
        AggregationKind::Count => count(numbers),
        AggregationKind::CountA => count(non_blank),
        AggregationKind::CountRows => count(rows),
        AggregationKind::DistinctCount => count(distinct.len()),
    }
}

/// Whole-column answer from precomputed statistics, when the backend keeps them.
fn stats_aggregate(backend: &dyn TableBackend, kind: AggregationKind, idx: usize) -> Option<Value> {
    // `stats_sum` is only offered for numeric columns, which makes it the numeric-ness test.
    let numeric_sum = backend.stats_sum(idx);
    match kind {
        AggregationKind::Sum => {
            let non_blank = backend.stats_non_blank_count(idx)?;
            let sum = numeric_sum?;
            Some(if non_blank == 0 {
                Value::Blank
            } else {
                Value::from(sum)
            })
        }
        AggregationKind::Average => {
            let non_blank = backend.stats_non_blank_count(idx)?;
            let sum = numeric_sum?;
            Some(if non_blank == 0 {
                Value::Blank
            } else {
                Value::from(sum / non_blank as f64)
            })
        }
        AggregationKind::Min => backend.stats_min(idx),
        AggregationKind::Max => backend.stats_max(idx),
        AggregationKind::Count => {
            numeric_sum?;
            Some(Value::from(backend.stats_non_blank_count(idx)? as f64))
        }
        AggregationKind::CountA => Some(Value::from(backend.stats_non_blank_count(idx)? as f64)),
        AggregationKind::DistinctCount | AggregationKind::CountRows => None,
    }
}

#[derive(Clone, Copy, Debug)]
enum IteratorKind {
    Sum,
    Average,
    Min,
    Max,
    Count,
}

impl TabularEngine {
    pub(super) fn eval_column_aggregation(
        &self,
        model: &DataModel,
        kind: AggregationKind,
        table: &str,
        column: &str,
        filter: &FilterContext,
    ) -> TabularResult<Value> {
        let idx = model.column_idx_or_err(table, column)?;
        let backend = model.table_or_err(table)?.backend();

        if filter.is_empty() {
            if let Some(value) = stats_aggregate(backend, kind, idx) {
                return Ok(value);
            }
        }

        let rows = resolve_table_rows(model, filter, table)?;
        let spec = AggregationSpec {
            kind,
            column_idx: Some(idx),
        };
        if let Some(groups) = backend.group_by_aggregations(&[], &[spec], Some(&rows)) {
            if let Some(value) = groups.into_iter().next().and_then(|g| g.into_iter().next()) {
                return Ok(value);
            }
            return Ok(fold_values(kind, std::iter::empty()));
        }

        Ok(fold_values(
            kind,
            rows.iter()
                .map(|&row| backend.value_by_idx(row, idx).unwrap_or_default()),
        ))
    }

    pub(super) fn eval_countblank(
        &self,
        model: &DataModel,
        table: &str,
        column: &str,
        filter: &FilterContext,
    ) -> TabularResult<Value> {
        let idx = model.column_idx_or_err(table, column)?;
        let backend = model.table_or_err(table)?.backend();
        if filter.is_empty() {
            if let Some(non_blank) = backend.stats_non_blank_count(idx) {
                return Ok(Value::from((backend.row_count() - non_blank) as f64));
            }
        }
        let blanks = resolve_table_rows(model, filter, table)?
            .into_iter()
            .filter(|&row| backend.value_by_idx(row, idx).unwrap_or_default().is_blank())
            .count();
        Ok(Value::from(blanks as f64))
    }

    /// Distinct values of `table[column]` visible under `filter`, blank included when a visible
    /// row holds it or the table's virtual blank row is visible.
    pub(super) fn distinct_column_values(
        &self,
        model: &DataModel,
        table: &str,
        column: &str,
        filter: &FilterContext,
    ) -> TabularResult<HashSet<Value>> {
        let idx = model.column_idx_or_err(table, column)?;
        let backend = model.table_or_err(table)?.backend();

        let (rows, sets) = if filter.is_empty() {
            (None, None)
        } else {
            let sets = resolve_row_sets(model, filter)?;
            let rows: Vec<usize> = sets
                .get(table)
                .ok_or_else(|| TabularError::UnknownTable(table.to_string()))?
                .iter_ones()
                .collect();
            (Some(rows), Some(sets))
        };

        let mut out: HashSet<Value> = match backend.distinct_values_filtered(idx, rows.as_deref()) {
            Some(values) => values.into_iter().collect(),
            None => match &rows {
                Some(rows) => rows
                    .iter()
                    .map(|&row| backend.value_by_idx(row, idx).unwrap_or_default())
                    .collect(),
                None => (0..backend.row_count())
                    .map(|row| backend.value_by_idx(row, idx).unwrap_or_default())
                    .collect(),
            },
        };

        if !out.contains(&Value::Blank)
            && blank_member_visible(model, filter, table, sets.as_ref())?
        {
            out.insert(Value::Blank);
        }
        Ok(out)
    }

    pub(super) fn eval_iterator(
        &self,
        model: &DataModel,
        function: &str,
        table_expr: &Expr,
        value_expr: &Expr,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        let kind = match function {
            "SUMX" => IteratorKind::Sum,
            "AVERAGEX" => IteratorKind::Average,
            "MINX" => IteratorKind::Min,
            "MAXX" => IteratorKind::Max,
            _ => IteratorKind::Count,
        };
        let table = self.eval_table(model, table_expr, filter, row_ctx)?;
        // Each row is a fresh row context, so measures inside transition again.
        let row_filter = filter.with_transition_suppressed(false);

        let mut sum = 0.0;
        let mut count = 0usize;
        let mut best: Option<f64> = None;
        for &row in &table.rows {
            let inner = row_ctx.with_frame(table.frame(row));
            let value = self.eval_scalar(model, value_expr, &row_filter, &inner)?;
            if value.is_blank() {
                continue;
            }
            if let IteratorKind::Count = kind {
                count += 1;
                continue;
            }
            let n = match value {
                Value::Number(n) => n.0,
                other => {
                    return Err(TabularError::Type(format!(
                        "{function} expects a numeric expression, got {other}"
                    )))
                }
            };
            sum += n;
            count += 1;
            best = Some(match (kind, best) {
                (IteratorKind::Min, Some(b)) => b.min(n),
                (IteratorKind::Max, Some(b)) => b.max(n),
                _ => n,
            });
        }

        Ok(match kind {
            IteratorKind::Count => Value::from(count as f64),
            _ if count == 0 => Value::Blank,
            IteratorKind::Sum => Value::from(sum),
            IteratorKind::Average => Value::from(sum / count as f64),
            IteratorKind::Min | IteratorKind::Max => best.map_or(Value::Blank, Value::from),
        })
    }
}
