use super::{read_cell, TabularEngine};
use crate::context::{FilterContext, RelationshipOverride, RowContext, RowFrame};
use crate::error::{TabularError, TabularResult};
use crate::model::{CrossFilterDirection, DataModel};
use crate::parser::{BinaryOp, CrossFilterSetting, Expr, FilterArg, FilterTarget};
use crate::propagation::resolve_table_rows;
use crate::value::{compare_values, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

type ColumnKey = (String, String);

/// Effects of all filter arguments of one `CALCULATE`, gathered before any is applied so the
/// result does not depend on argument order.
#[derive(Default)]
struct FilterEffects {
    clear_tables: HashSet<String>,
    clear_columns: HashSet<ColumnKey>,
    /// Tables whose column filters (but not row filter) are replaced by a row filter.
    clear_column_filters_of: HashSet<String>,
    column_filters: Vec<(ColumnKey, HashSet<Value>)>,
    row_filters: Vec<(String, HashSet<usize>)>,
}

impl FilterEffects {
    fn apply(self, filter: &mut FilterContext) {
        for table in &self.clear_tables {
            filter.clear_table_filters(table);
        }
        for (table, column) in &self.clear_columns {
            filter.clear_column_filter(table, column);
        }
        if !self.clear_column_filters_of.is_empty() {
            filter
                .column_filters
                .retain(|(t, _), _| !self.clear_column_filters_of.contains(t));
        }
        for (key, values) in self.column_filters {
            filter.intersect_column(key, values);
        }
        for (table, rows) in self.row_filters {
            filter.intersect_rows(&table, rows);
        }
    }
}

impl TabularEngine {
    /// Filter context for the body of `CALCULATE` / `CALCULATETABLE`: the ambient context,
    /// transitioned from the current row, with every filter argument applied.
    pub(super) fn build_calculate_filter(
        &self,
        model: &DataModel,
        filter: &FilterContext,
        row_ctx: &RowContext,
        args: &[FilterArg],
    ) -> TabularResult<FilterContext> {
        let base = filter.with_transition_suppressed(false);
        let mut out = self.apply_context_transition(model, &base, row_ctx)?;

        // Relationship modifiers first: they change how every other argument propagates.
        for arg in args {
            apply_relationship_modifier(model, &mut out, arg)?;
        }

        let eval_filter = out.clone();
        let mut effects = FilterEffects::default();
        for arg in args {
            self.collect_filter_effect(model, arg, &eval_filter, row_ctx, false, &mut effects)?;
        }
        effects.apply(&mut out);
        Ok(out)
    }

    /// Turn the current row of every row-context table into equality filters.
    ///
    /// The new filters replace whatever was filtering those columns before. A frame exposing
    /// the whole row also drops the table's row filter.
    pub(super) fn apply_context_transition(
        &self,
        model: &DataModel,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<FilterContext> {
        let mut out = filter.clone();
        for frame in row_ctx.innermost_frames() {
            let table = frame.table.as_ref();
            let columns = model.table_or_err(table)?.columns();
            let indices: Vec<usize> = match &frame.visible_cols {
                Some(cols) => cols.to_vec(),
                None => {
                    out.row_filters.remove(table);
                    (0..columns.len()).collect()
                }
            };
            for idx in indices {
                let column = columns.get(idx).ok_or_else(|| {
                    TabularError::Eval(format!("row context column {idx} is out of range for {table}"))
                })?;
                let value = read_cell(model, table, frame.row, idx)?;
                out.set_column_equals(table, column, value);
            }
        }
        Ok(out)
    }

    fn collect_filter_effect(
        &self,
        model: &DataModel,
        arg: &FilterArg,
        eval_filter: &FilterContext,
        row_ctx: &RowContext,
        keep: bool,
        effects: &mut FilterEffects,
    ) -> TabularResult<()> {
        match arg {
            FilterArg::UseRelationship { .. } | FilterArg::CrossFilter { .. } => Ok(()),
            FilterArg::RemoveFilters(FilterTarget::Table(table)) => {
                model.table_or_err(table)?;
                if !keep {
                    effects.clear_tables.insert(table.clone());
                }
                Ok(())
            }
            FilterArg::RemoveFilters(FilterTarget::Column { table, column }) => {
                model.column_idx_or_err(table, column)?;
                if !keep {
                    effects.clear_columns.insert((table.clone(), column.clone()));
                }
                Ok(())
            }
            FilterArg::KeepFilters(inner) => {
                self.collect_filter_effect(model, inner, eval_filter, row_ctx, true, effects)
            }
            FilterArg::Compare {
                table,
                column,
                op,
                value,
            } => {
                model.column_idx_or_err(table, column)?;
                let rhs = self.eval_scalar(model, value, eval_filter, row_ctx)?;
                let values = if *op == BinaryOp::Equals {
                    HashSet::from([rhs])
                } else {
                    self.matching_column_values(model, table, column, *op, &rhs, eval_filter)?
                };
                push_column_filter(effects, (table.clone(), column.clone()), values, keep);
                Ok(())
            }
            FilterArg::Values { table, column } => {
                let values = self.distinct_column_values(model, table, column, eval_filter)?;
                push_column_filter(effects, (table.clone(), column.clone()), values, keep);
                Ok(())
            }
            FilterArg::TreatAs { source, target } => {
                model.column_idx_or_err(&target.0, &target.1)?;
                let values = self.distinct_column_values(model, &source.0, &source.1, eval_filter)?;
                push_column_filter(effects, target.clone(), values, keep);
                Ok(())
            }
            FilterArg::Predicate(expr) => {
                let (table, columns) = predicate_columns(expr)?;
                model.table_or_err(&table)?;
                let visible: Vec<usize> = columns
                    .iter()
                    .map(|column| model.column_idx_or_err(&table, column))
                    .collect::<TabularResult<_>>()?;

                // The predicate replaces the filters on the columns it reads and is evaluated
                // under whatever else filters the context.
                let mut remaining = eval_filter.clone();
                for column in &columns {
                    remaining.clear_column_filter(&table, column);
                }

                if let [column] = columns.as_slice() {
                    let key = (table.clone(), column.clone());
                    let mut values = HashSet::new();
                    for value in self.distinct_column_values(model, &table, column, &remaining)? {
                        let bound = bind_column(expr, &table, column, &value);
                        if self.eval_scalar(model, &bound, &remaining, row_ctx)?.truthy()? {
                            values.insert(value);
                        }
                    }
                    push_column_filter(effects, key, values, keep);
                    return Ok(());
                }

                let visible: Arc<[usize]> = Arc::from(visible);
                let table_name: Arc<str> = Arc::from(table.as_str());
                let mut rows = HashSet::new();
                for row in resolve_table_rows(model, &remaining, &table)? {
                    let inner = row_ctx.with_frame(RowFrame {
                        table: Arc::clone(&table_name),
                        row,
                        visible_cols: Some(Arc::clone(&visible)),
                    });
                    if self.eval_scalar(model, expr, &remaining, &inner)?.truthy()? {
                        rows.insert(row);
                    }
                }
                if !keep {
                    for column in columns {
                        effects.clear_columns.insert((table.clone(), column));
                    }
                }
                effects.row_filters.push((table, rows));
                Ok(())
            }
            FilterArg::Table(expr) => {
                let result = self.eval_table(model, expr, eval_filter, row_ctx)?;
                let table_ref = model.table_or_err(&result.table)?;
                if let Some([idx]) = result.visible_cols.as_deref() {
                    let column = table_ref.columns().get(*idx).cloned().ok_or_else(|| {
                        TabularError::Eval(format!(
                            "column {idx} is out of range for {}",
                            result.table
                        ))
                    })?;
                    let values = result
                        .rows
                        .iter()
                        .map(|&row| read_cell(model, &result.table, row, *idx))
                        .collect::<TabularResult<HashSet<_>>>()?;
                    push_column_filter(effects, (result.table, column), values, keep);
                    return Ok(());
                }

                let row_count = table_ref.row_count();
                let rows: HashSet<usize> =
                    result.rows.iter().copied().filter(|&r| r < row_count).collect();
                if !keep {
                    effects.clear_column_filters_of.insert(result.table.clone());
                }
                effects.row_filters.push((result.table, rows));
                Ok(())
            }
        }
    }

    /// Values of `table[column]` that satisfy `value <op> rhs`, taken from the rows visible once
    /// the column's own filter is removed. Blank qualifies through the virtual blank row too.
    fn matching_column_values(
        &self,
        model: &DataModel,
        table: &str,
        column: &str,
        op: BinaryOp,
        rhs: &Value,
        eval_filter: &FilterContext,
    ) -> TabularResult<HashSet<Value>> {
        let mut remaining = eval_filter.clone();
        remaining.clear_column_filter(table, column);
        let mut out = HashSet::new();
        for value in self.distinct_column_values(model, table, column, &remaining)? {
            if compare_values(op, &value, rhs)? {
                out.insert(value);
            }
        }
        Ok(out)
    }
}

fn push_column_filter(
    effects: &mut FilterEffects,
    key: ColumnKey,
    values: HashSet<Value>,
    keep: bool,
) {
    if !keep {
        effects.clear_columns.insert(key.clone());
    }
    effects.column_filters.push((key, values));
}

fn apply_relationship_modifier(
    model: &DataModel,
    filter: &mut FilterContext,
    arg: &FilterArg,
) -> TabularResult<()> {
    let (left, right) = match arg {
        FilterArg::UseRelationship { left, right } | FilterArg::CrossFilter { left, right, .. } => {
            (left, right)
        }
        _ => return Ok(()),
    };
    let idx = model
        .find_relationship(
            (left.0.as_str(), left.1.as_str()),
            (right.0.as_str(), right.1.as_str()),
        )
        .ok_or_else(|| {
            TabularError::UnknownRelationship(format!(
                "{}[{}] <-> {}[{}]",
                left.0, left.1, right.0, right.1
            ))
        })?;
    match arg {
        FilterArg::CrossFilter { setting, .. } => {
            let state = match setting {
                CrossFilterSetting::Both => RelationshipOverride::Active(CrossFilterDirection::Both),
                CrossFilterSetting::OneWay => {
                    RelationshipOverride::Active(CrossFilterDirection::Single)
                }
                CrossFilterSetting::None => RelationshipOverride::Disabled,
            };
            filter.override_relationship(idx, state);
        }
        _ => filter.activate_relationship(idx),
    }
    Ok(())
}

/// The single table a boolean filter predicate ranges over, with the columns it reads.
fn predicate_columns(expr: &Expr) -> TabularResult<(String, Vec<String>)> {
    fn collect(expr: &Expr, out: &mut BTreeSet<(String, String)>) {
        match expr {
            Expr::ColumnRef { table, column } => {
                out.insert((table.clone(), column.clone()));
            }
            Expr::UnaryOp { expr, .. } => collect(expr, out),
            Expr::BinaryOp { left, right, .. } => {
                collect(left, out);
                collect(right, out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| collect(arg, out)),
            _ => {}
        }
    }

    let mut refs = BTreeSet::new();
    collect(expr, &mut refs);
    let tables: BTreeSet<&str> = refs.iter().map(|(t, _)| t.as_str()).collect();
    if tables.len() != 1 {
        return Err(TabularError::Eval(
            "a boolean filter argument must reference columns of exactly one table".into(),
        ));
    }
    let table = tables.into_iter().next().unwrap_or_default().to_string();
    let columns = refs.into_iter().map(|(_, c)| c).collect();
    Ok((table, columns))
}

/// `expr` with every reference to `table[column]` replaced by the literal `value`.
fn bind_column(expr: &Expr, table: &str, column: &str, value: &Value) -> Expr {
    match expr {
        Expr::ColumnRef { table: t, column: c } if t == table && c == column => match value {
            Value::Blank => Expr::Call {
                name: "BLANK".into(),
                args: Vec::new(),
            },
            Value::Number(n) => Expr::Number(n.0),
            Value::Text(s) => Expr::Text(s.to_string()),
            Value::Boolean(b) => Expr::Boolean(*b),
        },
        Expr::UnaryOp { op, expr } => Expr::UnaryOp {
            op: *op,
            expr: Box::new(bind_column(expr, table, column, value)),
        },
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: *op,
            left: Box::new(bind_column(left, table, column, value)),
            right: Box::new(bind_column(right, table, column, value)),
        },
        Expr::Call { name, args } => Expr::Call {
            name: name.clone(),
            args: args
                .iter()
                .map(|arg| bind_column(arg, table, column, value))
                .collect(),
        },
        other => other.clone(),
    }
}
