use super::{arity_error, column_ref, read_cell, TabularEngine};
use crate::backend::AggregationKind;
use crate::context::{FilterContext, RowContext};
use crate::error::{TabularError, TabularResult};
use crate::model::{Cardinality, DataModel};
use crate::parser::{BinaryOp, Expr};
use crate::propagation::{active_directions, resolve_table_rows};
use crate::value::{compare_values, Value};

impl TabularEngine {
    pub(super) fn eval_call_scalar(
        &self,
        model: &DataModel,
        name: &str,
        args: &[Expr],
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "TRUE" | "FALSE" | "BLANK" if !args.is_empty() => {
                Err(arity_error(&upper, "no arguments"))
            }
            "TRUE" => Ok(Value::Boolean(true)),
            "FALSE" => Ok(Value::Boolean(false)),
            "BLANK" => Ok(Value::Blank),
            "ISBLANK" => {
                let [arg] = args else {
                    return Err(arity_error("ISBLANK", "1 argument"));
                };
                Ok(Value::Boolean(
                    self.eval_scalar(model, arg, filter, row_ctx)?.is_blank(),
                ))
            }
            "IF" => {
                let (cond, then, otherwise) = match args {
                    [cond, then] => (cond, then, None),
                    [cond, then, otherwise] => (cond, then, Some(otherwise)),
                    _ => return Err(arity_error("IF", "2 or 3 arguments")),
                };
                if self.eval_scalar(model, cond, filter, row_ctx)?.truthy()? {
                    self.eval_scalar(model, then, filter, row_ctx)
                } else if let Some(otherwise) = otherwise {
                    self.eval_scalar(model, otherwise, filter, row_ctx)
                } else {
                    Ok(Value::Blank)
                }
            }
            "SWITCH" => {
                let [subject, rest @ ..] = args else {
                    return Err(arity_error("SWITCH", "at least 3 arguments"));
                };
                if rest.len() < 2 {
                    return Err(arity_error("SWITCH", "at least 3 arguments"));
                }
                let subject = self.eval_scalar(model, subject, filter, row_ctx)?;
                let mut pairs = rest.chunks_exact(2);
                for pair in pairs.by_ref() {
                    let candidate = self.eval_scalar(model, &pair[0], filter, row_ctx)?;
                    if compare_values(BinaryOp::Equals, &subject, &candidate)? {
                        return self.eval_scalar(model, &pair[1], filter, row_ctx);
                    }
                }
                match pairs.remainder() {
                    [otherwise] => self.eval_scalar(model, otherwise, filter, row_ctx),
                    _ => Ok(Value::Blank),
                }
            }
            "DIVIDE" => {
                let (numerator, denominator, alternate) = match args {
                    [n, d] => (n, d, None),
                    [n, d, alt] => (n, d, Some(alt)),
                    _ => return Err(arity_error("DIVIDE", "2 or 3 arguments")),
                };
                let numerator = self.eval_scalar(model, numerator, filter, row_ctx)?;
                let denominator = self
                    .eval_scalar(model, denominator, filter, row_ctx)?
                    .to_number()?;
                if denominator == 0.0 {
                    return match alternate {
                        Some(alt) => self.eval_scalar(model, alt, filter, row_ctx),
                        None => Ok(Value::Blank),
                    };
                }
                Ok(Value::from(numerator.to_number()? / denominator))
            }
            "COALESCE" => {
                if args.is_empty() {
                    return Err(arity_error("COALESCE", "at least 1 argument"));
                }
                for arg in args {
                    let value = self.eval_scalar(model, arg, filter, row_ctx)?;
                    if !value.is_blank() {
                        return Ok(value);
                    }
                }
                Ok(Value::Blank)
            }
            "NOT" => {
                let [arg] = args else {
                    return Err(arity_error("NOT", "1 argument"));
                };
                let value = self.eval_scalar(model, arg, filter, row_ctx)?.truthy()?;
                Ok(Value::Boolean(!value))
            }
            "AND" | "OR" => {
                let [left, right] = args else {
                    return Err(arity_error(&upper, "2 arguments"));
                };
                let left = self.eval_scalar(model, left, filter, row_ctx)?.truthy()?;
                let right = self.eval_scalar(model, right, filter, row_ctx)?.truthy()?;
                Ok(Value::Boolean(if upper == "AND" {
                    left && right
                } else {
                    left || right
                }))
            }
            "SUM" | "AVERAGE" | "MIN" | "MAX" | "COUNT" | "COUNTA" => {
                let [arg] = args else {
                    return Err(arity_error(&upper, "1 argument"));
                };
                let kind = match upper.as_str() {
                    "SUM" => AggregationKind::Sum,
                    "AVERAGE" => AggregationKind::Average,
                    "MIN" => AggregationKind::Min,
                    "MAX" => AggregationKind::Max,
                    "COUNT" => AggregationKind::Count,
                    _ => AggregationKind::CountA,
                };
                let (table, column) = column_ref(arg, &upper)?;
                self.eval_column_aggregation(model, kind, table, column, filter)
            }
            "COUNTBLANK" => {
                let [arg] = args else {
                    return Err(arity_error("COUNTBLANK", "1 argument"));
                };
                let (table, column) = column_ref(arg, "COUNTBLANK")?;
                self.eval_countblank(model, table, column, filter)
            }
            "COUNTROWS" => {
                let [arg] = args else {
                    return Err(arity_error("COUNTROWS", "1 argument"));
                };
                let rows = match arg {
                    Expr::TableName(table) => resolve_table_rows(model, filter, table)?.len(),
                    other => self.eval_table(model, other, filter, row_ctx)?.rows.len(),
                };
                Ok(Value::from(rows as f64))
            }
            "DISTINCTCOUNT" | "DISTINCTCOUNTNOBLANK" => {
                let [arg] = args else {
                    return Err(arity_error(&upper, "1 argument"));
                };
                let (table, column) = column_ref(arg, &upper)?;
                let mut values = self.distinct_column_values(model, table, column, filter)?;
                if upper == "DISTINCTCOUNTNOBLANK" {
                    values.remove(&Value::Blank);
                }
                Ok(Value::from(values.len() as f64))
            }
            "HASONEVALUE" => {
                let [arg] = args else {
                    return Err(arity_error("HASONEVALUE", "1 argument"));
                };
                let (table, column) = column_ref(arg, "HASONEVALUE")?;
                let values = self.distinct_column_values(model, table, column, filter)?;
                Ok(Value::Boolean(values.len() == 1))
            }
            "SELECTEDVALUE" => {
                let (arg, alternate) = match args {
                    [arg] => (arg, None),
                    [arg, alt] => (arg, Some(alt)),
                    _ => return Err(arity_error("SELECTEDVALUE", "1 or 2 arguments")),
                };
                let (table, column) = column_ref(arg, "SELECTEDVALUE")?;
                let values = self.distinct_column_values(model, table, column, filter)?;
                if values.len() == 1 {
                    if let Some(value) = values.into_iter().next() {
                        return Ok(value);
                    }
                }
                match alternate {
                    Some(alt) => self.eval_scalar(model, alt, filter, row_ctx),
                    None => Ok(Value::Blank),
                }
            }
            "SUMX" | "AVERAGEX" | "MINX" | "MAXX" | "COUNTX" => {
                let [table_expr, value_expr] = args else {
                    return Err(arity_error(&upper, "2 arguments"));
                };
                self.eval_iterator(model, &upper, table_expr, value_expr, filter, row_ctx)
            }
            "RELATED" => {
                let [arg] = args else {
                    return Err(arity_error("RELATED", "1 argument"));
                };
                let (table, column) = column_ref(arg, "RELATED")?;
                self.eval_related(model, table, column, filter, row_ctx)
            }
            "LOOKUPVALUE" => self.eval_lookupvalue(model, args, filter, row_ctx),
            "EARLIER" => {
                let (arg, level) = match args {
                    [arg] => (arg, 1),
                    [arg, level] => {
                        let n = self.eval_scalar(model, level, filter, row_ctx)?.to_number()?;
                        if !n.is_finite() || n < 1.0 {
                            return Err(TabularError::Eval(format!(
                                "EARLIER level must be a number >= 1, got {n}"
                            )));
                        }
                        (arg, n.trunc() as usize)
                    }
                    _ => return Err(arity_error("EARLIER", "1 or 2 arguments")),
                };
                let (table, column) = column_ref(arg, "EARLIER")?;
                let frame = row_ctx.frame_for_level(table, level).ok_or_else(|| {
                    TabularError::Eval(format!(
                        "EARLIER({table}[{column}], {level}) has no matching outer row context"
                    ))
                })?;
                let idx = model.column_idx_or_err(table, column)?;
                read_cell(model, table, frame.row, idx)
            }
            "EARLIEST" => {
                let [arg] = args else {
                    return Err(arity_error("EARLIEST", "1 argument"));
                };
                let (table, column) = column_ref(arg, "EARLIEST")?;
                let frame = row_ctx.outermost_frame(table).ok_or_else(|| {
                    TabularError::Eval(format!("EARLIEST requires a row context for {table}"))
                })?;
                let idx = model.column_idx_or_err(table, column)?;
                read_cell(model, table, frame.row, idx)
            }
            "USERELATIONSHIP" | "CROSSFILTER" | "KEEPFILTERS" | "REMOVEFILTERS" | "TREATAS" => {
                Err(TabularError::Eval(format!(
                    "{upper} is only valid as a CALCULATE filter argument"
                )))
            }
            "FILTER" | "ALL" | "ALLNOBLANKROW" | "ALLEXCEPT" | "VALUES" | "DISTINCT"
            | "RELATEDTABLE" => Err(TabularError::Type(format!(
                "table function {upper} used where a scalar is expected"
            ))),
            other => Err(TabularError::Eval(format!("unsupported function {other}"))),
        }
    }

    /// `RELATED(T[C])`: follow one direct active relationship from the current row to `T`.
    fn eval_related(
        &self,
        model: &DataModel,
        table: &str,
        column: &str,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        let Some(current) = row_ctx.current_table() else {
            return Err(TabularError::Eval("RELATED requires a row context".into()));
        };
        let row = row_ctx
            .row_for(current)
            .ok_or_else(|| TabularError::Eval("RELATED requires a row context".into()))?;
        let target_idx = model.column_idx_or_err(table, column)?;
        let directions = active_directions(model, filter);

        let many_to_one = model
            .relationships
            .iter()
            .zip(&directions)
            .find(|(info, dir)| {
                dir.is_some() && info.rel.from_table == current && info.rel.to_table == table
            })
            .map(|(info, _)| info);
        if let Some(info) = many_to_one {
            let key = read_cell(model, current, row, info.from_idx)?;
            return match info.to_index.get(&key).map(|rows| rows.as_slice()) {
                None | Some([]) => Ok(Value::Blank),
                Some([to_row]) => read_cell(model, table, *to_row, target_idx),
                Some(_) => Err(TabularError::Eval(format!(
                    "RELATED({table}[{column}]) is ambiguous: key {key} matches several rows through {}",
                    info.rel.name
                ))),
            };
        }

        // A one-to-one relationship can be followed from its to-side as well.
        let one_to_one = model
            .relationships
            .iter()
            .zip(&directions)
            .find(|(info, dir)| {
                dir.is_some()
                    && info.rel.cardinality == Cardinality::OneToOne
                    && info.rel.to_table == current
                    && info.rel.from_table == table
            })
            .map(|(info, _)| info);
        if let Some(info) = one_to_one {
            let key = read_cell(model, current, row, info.to_idx)?;
            return match info.from_index.get(&key).map(Vec::as_slice) {
                Some([from_row]) => read_cell(model, table, *from_row, target_idx),
                _ => Ok(Value::Blank),
            };
        }

        Err(TabularError::Eval(format!(
            "no active relationship from {current} to {table} for RELATED"
        )))
    }

    /// Restricted `LOOKUPVALUE`: the result and every search column live in one table.
    fn eval_lookupvalue(
        &self,
        model: &DataModel,
        args: &[Expr],
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<Value> {
        let [result, rest @ ..] = args else {
            return Err(arity_error("LOOKUPVALUE", "at least 3 arguments"));
        };
        if rest.len() < 2 {
            return Err(arity_error("LOOKUPVALUE", "at least 3 arguments"));
        }
        let (result_table, result_column) = column_ref(result, "LOOKUPVALUE")?;
        let result_idx = model.column_idx_or_err(result_table, result_column)?;

        let mut pairs = rest.chunks_exact(2);
        let mut searches = Vec::with_capacity(rest.len() / 2);
        for pair in pairs.by_ref() {
            let (table, column) = column_ref(&pair[0], "LOOKUPVALUE")?;
            if table != result_table {
                return Err(TabularError::Eval(format!(
                    "LOOKUPVALUE search column {table}[{column}] must be in {result_table}"
                )));
            }
            let idx = model.column_idx_or_err(table, column)?;
            let wanted = self.eval_scalar(model, &pair[1], filter, row_ctx)?;
            searches.push((idx, wanted));
        }
        let alternate = pairs.remainder().first();

        let mut found: Option<Value> = None;
        for row in resolve_table_rows(model, filter, result_table)? {
            let mut is_match = true;
            for (idx, wanted) in &searches {
                let cell = read_cell(model, result_table, row, *idx)?;
                if !compare_values(BinaryOp::Equals, &cell, wanted)? {
                    is_match = false;
                    break;
                }
            }
            if !is_match {
                continue;
            }
            // A blank result is a value like any other: mixing it with another is ambiguous.
            let value = read_cell(model, result_table, row, result_idx)?;
            match &found {
                Some(existing) if *existing != value => {
                    return Err(TabularError::Eval(format!(
                        "LOOKUPVALUE found several values for {result_table}[{result_column}]"
                    )));
                }
                Some(_) => {}
                None => found = Some(value),
            }
        }

        match (found, alternate) {
            (Some(value), _) => Ok(value),
            (None, Some(alt)) => self.eval_scalar(model, alt, filter, row_ctx),
            (None, None) => Ok(Value::Blank),
        }
    }
}
