use super::{GroupByColumn, PivotMeasure, PivotOptions, PivotStrategy};
use crate::backend::{AggregationKind, AggregationSpec};
use crate::context::FilterContext;
use crate::error::TabularResult;
use crate::model::{DataModel, KeyRows};
use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::propagation::active_directions;
use crate::value::{apply_binary, Value};

/// Where a group key value comes from for one base-table row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum GroupSource {
    /// A column of the base table.
    Base(usize),
    /// Column `idx` of the to-side of relationship `rel`, reached through the base row's key.
    Hop { rel: usize, idx: usize },
}

/// A measure reduced to arithmetic over backend aggregations.
#[derive(Clone, Debug, PartialEq)]
pub(super) enum PlannedExpr {
    Aggregate(usize),
    Constant(Value),
    Negate(Box<PlannedExpr>),
    Binary(BinaryOp, Box<PlannedExpr>, Box<PlannedExpr>),
}

impl PlannedExpr {
    /// Evaluate against one group's aggregation results, with the evaluator's coercions.
    pub(super) fn evaluate(&self, aggregates: &[Value]) -> TabularResult<Value> {
        match self {
            PlannedExpr::Aggregate(idx) => Ok(aggregates.get(*idx).cloned().unwrap_or_default()),
            PlannedExpr::Constant(value) => Ok(value.clone()),
            PlannedExpr::Negate(inner) => {
                Ok(Value::from(-inner.evaluate(aggregates)?.to_number()?))
            }
            PlannedExpr::Binary(op, left, right) => {
                apply_binary(*op, &left.evaluate(aggregates)?, &right.evaluate(aggregates)?)
            }
        }
    }
}

/// Deduplicated aggregations shared by all measures, plus one expression per measure.
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct PlannedMeasures {
    pub(super) aggs: Vec<AggregationSpec>,
    pub(super) exprs: Vec<PlannedExpr>,
}

impl PlannedMeasures {
    fn push_agg(&mut self, spec: AggregationSpec) -> usize {
        match self.aggs.iter().position(|existing| *existing == spec) {
            Some(idx) => idx,
            None => {
                self.aggs.push(spec);
                self.aggs.len() - 1
            }
        }
    }

    /// Evaluate every measure for one group.
    pub(super) fn finish(&self, aggregates: &[Value]) -> TabularResult<Vec<Value>> {
        self.exprs.iter().map(|e| e.evaluate(aggregates)).collect()
    }
}

#[derive(Clone, Debug)]
pub(super) enum PlanKind {
    AcceleratedGroupBy {
        group_idxs: Vec<usize>,
        planned: PlannedMeasures,
    },
    AcceleratedGroupKeys {
        group_idxs: Vec<usize>,
    },
    AcceleratedRollup {
        sources: Vec<GroupSource>,
        planned: PlannedMeasures,
    },
    PlannedScan {
        sources: Vec<GroupSource>,
        planned: PlannedMeasures,
    },
    RowScan,
}

#[derive(Clone, Debug)]
pub(super) struct PivotPlan {
    pub(super) kind: PlanKind,
    skipped: Vec<(PivotStrategy, &'static str)>,
}

impl PivotPlan {
    pub(super) fn strategy(&self) -> PivotStrategy {
        match self.kind {
            PlanKind::AcceleratedGroupBy { .. } => PivotStrategy::AcceleratedGroupBy,
            PlanKind::AcceleratedGroupKeys { .. } => PivotStrategy::AcceleratedGroupKeys,
            PlanKind::AcceleratedRollup { .. } => PivotStrategy::AcceleratedRollup,
            PlanKind::PlannedScan { .. } => PivotStrategy::PlannedScan,
            PlanKind::RowScan => PivotStrategy::RowScan,
        }
    }

    pub(super) fn skipped_summary(&self) -> String {
        self.skipped
            .iter()
            .map(|(strategy, reason)| format!("; skipped {strategy}: {reason}"))
            .collect()
    }
}

pub(super) fn plan(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
    options: &PivotOptions,
) -> TabularResult<PivotPlan> {
    let table_ref = model.table_or_err(base_table)?;
    for col in group_by {
        model.column_idx_or_err(&col.table, &col.column)?;
    }

    let planned = plan_measures(model, base_table, measures, options.max_measure_depth);
    let sources = one_hop_sources(model, base_table, group_by, filter)?;
    let base_idxs: Option<Vec<usize>> = sources.as_ref().and_then(|sources| {
        sources
            .iter()
            .map(|source| match source {
                GroupSource::Base(idx) => Some(*idx),
                GroupSource::Hop { .. } => None,
            })
            .collect()
    });

    let accelerated_reason = if !options.use_acceleration {
        Some("acceleration disabled")
    } else if !table_ref.is_accelerated() {
        Some("base table is not accelerated")
    } else {
        None
    };

    let mut skipped = Vec::new();
    let mut skip = |strategy, reason| skipped.push((strategy, reason));

    let kind = 'pick: {
        match (accelerated_reason, &base_idxs, &planned) {
            (Some(reason), _, _) => skip(PivotStrategy::AcceleratedGroupBy, reason),
            (None, None, _) => skip(
                PivotStrategy::AcceleratedGroupBy,
                "group columns are not all on the base table",
            ),
            (None, Some(_), None) => skip(
                PivotStrategy::AcceleratedGroupBy,
                "measures do not reduce to aggregations",
            ),
            (None, Some(idxs), Some(planned)) => {
                break 'pick PlanKind::AcceleratedGroupBy {
                    group_idxs: idxs.clone(),
                    planned: planned.clone(),
                }
            }
        }

        match (accelerated_reason, &base_idxs) {
            (Some(reason), _) => skip(PivotStrategy::AcceleratedGroupKeys, reason),
            (None, None) => skip(
                PivotStrategy::AcceleratedGroupKeys,
                "group columns are not all on the base table",
            ),
            (None, Some(idxs)) => {
                break 'pick PlanKind::AcceleratedGroupKeys {
                    group_idxs: idxs.clone(),
                }
            }
        }

        let scan_inputs = match (&sources, &planned) {
            (None, _) => Err("group columns are more than one relationship hop away"),
            (_, None) => Err("measures do not reduce to aggregations"),
            (Some(sources), Some(planned)) => Ok((sources, planned)),
        };

        match (accelerated_reason, &scan_inputs) {
            (Some(reason), _) => skip(PivotStrategy::AcceleratedRollup, reason),
            (None, Err(reason)) => skip(PivotStrategy::AcceleratedRollup, *reason),
            (None, Ok((sources, planned))) if rollup_compatible(planned, sources) => {
                break 'pick PlanKind::AcceleratedRollup {
                    sources: sources.to_vec(),
                    planned: (*planned).clone(),
                }
            }
            (None, Ok(_)) => skip(
                PivotStrategy::AcceleratedRollup,
                "average or distinct count cannot be rolled up",
            ),
        }

        match (options.use_planned_scan, scan_inputs) {
            (false, _) => skip(PivotStrategy::PlannedScan, "planned scan disabled"),
            (true, Err(reason)) => skip(PivotStrategy::PlannedScan, reason),
            (true, Ok((sources, planned))) => {
                break 'pick PlanKind::PlannedScan {
                    sources: sources.to_vec(),
                    planned: planned.clone(),
                }
            }
        }

        PlanKind::RowScan
    };

    Ok(PivotPlan { kind, skipped })
}

/// Partial groups keyed by foreign key can only be merged for kinds that compose.
fn rollup_compatible(planned: &PlannedMeasures, sources: &[GroupSource]) -> bool {
    planned.aggs.iter().all(|spec| match spec.kind {
        AggregationKind::Average => false,
        // Grouped on the counted column itself, so every group holds exactly one value.
        AggregationKind::DistinctCount => sources
            .iter()
            .any(|source| matches!(source, GroupSource::Base(idx) if Some(*idx) == spec.column_idx)),
        _ => true,
    })
}

/// Resolve each group column to the base table or a single active many-to-one hop.
///
/// Returns `None` when some column needs more than one hop, the hop is ambiguous, or the
/// dimension has duplicate keys.
fn one_hop_sources(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    filter: &FilterContext,
) -> TabularResult<Option<Vec<GroupSource>>> {
    let directions = active_directions(model, filter);
    let mut sources = Vec::with_capacity(group_by.len());
    for col in group_by {
        let idx = model.column_idx_or_err(&col.table, &col.column)?;
        if col.table == base_table {
            sources.push(GroupSource::Base(idx));
            continue;
        }
        let mut hops = model.relationships.iter().enumerate().filter(|(rel, info)| {
            directions[*rel].is_some()
                && info.rel.from_table == base_table
                && info.rel.to_table == col.table
        });
        let (Some((rel, info)), None) = (hops.next(), hops.next()) else {
            return Ok(None);
        };
        if info.to_index.values().any(|rows| matches!(rows, KeyRows::Many(_))) {
            return Ok(None);
        }
        sources.push(GroupSource::Hop { rel, idx });
    }
    Ok(Some(sources))
}

fn plan_measures(
    model: &DataModel,
    base_table: &str,
    measures: &[PivotMeasure],
    max_depth: usize,
) -> Option<PlannedMeasures> {
    let mut planned = PlannedMeasures::default();
    for measure in measures {
        let expr = plan_expr(model, base_table, &measure.parsed, 0, max_depth, &mut planned)?;
        planned.exprs.push(expr);
    }
    Some(planned)
}

fn plan_expr(
    model: &DataModel,
    base_table: &str,
    expr: &Expr,
    depth: usize,
    max_depth: usize,
    planned: &mut PlannedMeasures,
) -> Option<PlannedExpr> {
    let recurse = |expr: &Expr, depth: usize, planned: &mut PlannedMeasures| {
        plan_expr(model, base_table, expr, depth, max_depth, planned).map(Box::new)
    };
    match expr {
        Expr::Number(n) => Some(PlannedExpr::Constant(Value::from(*n))),
        Expr::Measure(name) => {
            if depth >= max_depth {
                return None;
            }
            let measure = model.measure(DataModel::normalize_measure_name(name))?;
            plan_expr(model, base_table, &measure.parsed, depth + 1, max_depth, planned)
        }
        Expr::UnaryOp {
            op: UnaryOp::Negate,
            expr,
        } => Some(PlannedExpr::Negate(recurse(expr, depth, planned)?)),
        Expr::BinaryOp {
            op: op @ (BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide),
            left,
            right,
        } => {
            let left = recurse(left, depth, planned)?;
            let right = recurse(right, depth, planned)?;
            Some(PlannedExpr::Binary(*op, left, right))
        }
        Expr::Call { name, args } => {
            let spec = aggregation_for_call(model, base_table, name, args)?;
            Some(PlannedExpr::Aggregate(planned.push_agg(spec)))
        }
        _ => None,
    }
}

fn aggregation_for_call(
    model: &DataModel,
    base_table: &str,
    name: &str,
    args: &[Expr],
) -> Option<AggregationSpec> {
    let upper = name.to_ascii_uppercase();
    if upper == "COUNTROWS" {
        return match args {
            [Expr::TableName(table)] if table == base_table => Some(AggregationSpec {
                kind: AggregationKind::CountRows,
                column_idx: None,
            }),
            _ => None,
        };
    }

    let kind = match upper.as_str() {
        "SUM" => AggregationKind::Sum,
        "AVERAGE" => AggregationKind::Average,
        "MIN" => AggregationKind::Min,
        "MAX" => AggregationKind::Max,
        "COUNT" => AggregationKind::Count,
        "COUNTA" => AggregationKind::CountA,
        "DISTINCTCOUNT" => AggregationKind::DistinctCount,
        _ => return None,
    };
    let [Expr::ColumnRef { table, column }] = args else {
        return None;
    };
    if table != base_table {
        return None;
    }
    // A to-side table can contribute its virtual blank row to a distinct count.
    if kind == AggregationKind::DistinctCount
        && model.relationships.iter().any(|info| info.rel.to_table == base_table)
    {
        return None;
    }
    let idx = model.table(base_table)?.column_idx(column)?;
    Some(AggregationSpec {
        kind,
        column_idx: Some(idx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Table;

    fn model() -> DataModel {
        let mut model = DataModel::new();
        let mut fact = Table::new("Fact", vec!["Group", "Amount"]);
        fact.push_row(vec![Value::from("a"), Value::from(1.0)]).unwrap();
        model.add_table(fact).unwrap();
        model.add_measure("Total", "SUM(Fact[Amount])").unwrap();
        model.add_measure("Twice", "[Total] * 2").unwrap();
        model
    }

    #[test]
    fn nested_measures_share_one_aggregation() {
        let model = model();
        let measures = [
            PivotMeasure::new("Total", "[Total]").unwrap(),
            PivotMeasure::new("Twice", "-[Twice] + COUNTROWS(Fact)").unwrap(),
        ];
        let planned = plan_measures(&model, "Fact", &measures, 16).unwrap();
        assert_eq!(planned.aggs.len(), 2);
        assert_eq!(
            planned.finish(&[Value::from(3.0), Value::from(2.0)]).unwrap(),
            vec![Value::from(3.0), Value::from(-4.0)]
        );
    }

    #[test]
    fn depth_limit_and_other_tables_are_not_plannable() {
        let model = model();
        let nested = [PivotMeasure::new("Twice", "[Twice]").unwrap()];
        assert!(plan_measures(&model, "Fact", &nested, 1).is_none());
        assert!(plan_measures(&model, "Fact", &nested, 2).is_some());

        let foreign = [PivotMeasure::new("X", "SUM(Other[Amount])").unwrap()];
        assert!(plan_measures(&model, "Fact", &foreign, 16).is_none());

        let iterator = [PivotMeasure::new("X", "SUMX(Fact, Fact[Amount])").unwrap()];
        assert!(plan_measures(&model, "Fact", &iterator, 16).is_none());
    }
}
