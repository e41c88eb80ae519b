//! Expression evaluation.
//!
//! Every entry point threads `(model, filter, row_ctx)` explicitly. Contexts are never mutated
//! in place: nested constructs derive a modified copy and pass it down.

mod aggregate;
mod calculate;
mod scalar;
mod table;

pub(crate) use aggregate::fold_values;
pub(crate) use table::TableResult;

use crate::context::{FilterContext, RowContext};
use crate::error::{TabularError, TabularResult};
use crate::model::DataModel;
use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::value::{apply_binary, Value};

#[derive(Clone, Copy, Debug, Default)]
pub struct TabularEngine;

impl TabularEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `CALCULATE`-style filter arguments to `filter` and return the result.
    ///
    /// Lets hosts express filters that [`FilterContext::with_column_equals`] cannot, such as
    /// `Orders[Amount] > 100` or `USERELATIONSHIP(...)`, before calling [`crate::pivot`].
    pub fn apply_calculate_filters(
        &self,
        model: &DataModel,
        filter: &FilterContext,
        filter_args: &[&str],
    ) -> TabularResult<FilterContext> {
        let parsed = filter_args
            .iter()
            .map(|arg| crate::parser::parse_filter_arg(arg))
            .collect::<TabularResult<Vec<_>>>()?;
        self.build_calculate_filter(model, filter, &RowContext::new(), &parsed)
    }

    pub fn evaluate(
        &self,
        model: &DataModel,
        expression: &str,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        let parsed = crate::parser::parse(expression)?;
        self.evaluate_expr(model, &parsed, filter, row_ctx)
    }

    pub fn evaluate_expr(
        &self,
        model: &DataModel,
        expr: &Expr,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        self.eval_scalar(model, expr, filter, row_ctx)
    }

    fn eval_scalar(
        &self,
        model: &DataModel,
        expr: &Expr,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::from(*n)),
            Expr::Text(s) => Ok(Value::from(s.as_str())),
            Expr::Boolean(b) => Ok(Value::from(*b)),
            Expr::Measure(name) => self.eval_measure_ref(model, name, filter, row_ctx),
            Expr::ColumnRef { table, column } => {
                let frame = row_ctx.frame_for_level(table, 0).ok_or_else(|| {
                    TabularError::Eval(format!("no row context for {table}[{column}]"))
                })?;
                let idx = model.column_idx_or_err(table, column)?;
                if !row_ctx.is_column_visible(table, idx) {
                    return Err(TabularError::Eval(format!(
                        "column {table}[{column}] is not part of the current row"
                    )));
                }
                read_cell(model, table, frame.row, idx)
            }
            Expr::UnaryOp {
                op: UnaryOp::Negate,
                expr,
            } => {
                let value = self.eval_scalar(model, expr, filter, row_ctx)?;
                Ok(Value::from(-value.to_number()?))
            }
            Expr::BinaryOp {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                let left = self.eval_scalar(model, left, filter, row_ctx)?.truthy()?;
                let short_circuit = match op {
                    BinaryOp::And => !left,
                    _ => left,
                };
                if short_circuit {
                    return Ok(Value::Boolean(left));
                }
                let right = self.eval_scalar(model, right, filter, row_ctx)?.truthy()?;
                Ok(Value::Boolean(right))
            }
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval_scalar(model, left, filter, row_ctx)?;
                let right = self.eval_scalar(model, right, filter, row_ctx)?;
                apply_binary(*op, &left, &right)
            }
            Expr::Call { name, args } => self.eval_call_scalar(model, name, args, filter, row_ctx),
            Expr::Calculate { expr, filters } => {
                let mut inner = self.build_calculate_filter(model, filter, row_ctx, filters)?;
                // Transition already happened above; a nested measure must not redo it and undo
                // an explicit clear.
                inner.suppress_implicit_transition = true;
                self.eval_scalar(model, expr, &inner, row_ctx)
            }
            Expr::TableName(name) => Err(TabularError::Type(format!(
                "table {name} used where a scalar is expected"
            ))),
            Expr::CalculateTable { .. } => Err(TabularError::Type(
                "CALCULATETABLE used where a scalar is expected".into(),
            )),
        }
    }

    /// `[Name]`: a measure, evaluated after an implicit context transition when a row context
    /// is active, or else a column of the innermost row-context table.
    fn eval_measure_ref(
        &self,
        model: &DataModel,
        name: &str,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        let normalized = DataModel::normalize_measure_name(name);
        if let Some(measure) = model.measure(normalized) {
            let eval_filter = if !row_ctx.is_empty() && !filter.suppress_implicit_transition {
                self.apply_context_transition(model, filter, row_ctx)?
            } else {
                filter.clone()
            };
            return self.eval_scalar(model, &measure.parsed, &eval_filter, &RowContext::new());
        }

        let Some(table) = row_ctx.current_table() else {
            return Err(TabularError::UnknownMeasure(normalized.to_string()));
        };
        let Some(idx) = model.table_or_err(table)?.column_idx(normalized) else {
            return Err(TabularError::Eval(format!(
                "unknown measure [{normalized}] and no column {table}[{normalized}]"
            )));
        };
        if !row_ctx.is_column_visible(table, idx) {
            return Err(TabularError::Eval(format!(
                "column {table}[{normalized}] is not part of the current row"
            )));
        }
        let row = row_ctx
            .row_for(table)
            .ok_or_else(|| TabularError::Eval(format!("no row context for [{normalized}]")))?;
        read_cell(model, table, row, idx)
    }
}

/// Read one cell; the virtual blank row (one past the last row) reads as blank.
pub(crate) fn read_cell(
    model: &DataModel,
    table: &str,
    row: usize,
    idx: usize,
) -> TabularResult<Value> {
    let table_ref = model.table_or_err(table)?;
    if row >= table_ref.row_count() {
        return Ok(Value::Blank);
    }
    Ok(table_ref.value_by_idx(row, idx).unwrap_or_default())
}

fn column_ref<'a>(expr: &'a Expr, function: &str) -> TabularResult<(&'a str, &'a str)> {
    match expr {
        Expr::ColumnRef { table, column } => Ok((table, column)),
        other => Err(TabularError::Type(format!(
            "{function} expects a column reference, got {other:?}"
        ))),
    }
}

fn arity_error(function: &str, expected: &str) -> TabularError {
    TabularError::Eval(format!("{function} expects {expected}"))
}
