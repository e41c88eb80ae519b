//! Grouped aggregation over a base table.
//!
//! [`pivot`] picks the cheapest of several execution strategies whose preconditions hold. All of
//! them produce the same rows as evaluating every measure once per group through the general
//! evaluator; the faster ones only apply when a measure reduces to backend aggregations.

mod crosstab;
mod plan;
mod strategy;

pub use crosstab::{pivot_crosstab, pivot_crosstab_with_options, PivotCrosstab};

use crate::context::FilterContext;
use crate::error::TabularResult;
use crate::model::DataModel;
use crate::parser::Expr;
use crate::value::{cmp_for_sort, Value};
use std::cmp::Ordering;
use std::fmt;

/// A group-by column used by the pivot engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupByColumn {
    pub table: String,
    pub column: String,
}

impl GroupByColumn {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    fn label(&self) -> String {
        format!("{}[{}]", self.table, self.column)
    }
}

/// A named expression evaluated once per pivot group.
#[derive(Clone, Debug)]
pub struct PivotMeasure {
    pub name: String,
    pub expression: String,
    pub(crate) parsed: Expr,
}

impl PivotMeasure {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> TabularResult<Self> {
        let name = name.into();
        let expression = expression.into();
        let parsed = crate::parser::parse(&expression)?;
        Ok(Self {
            name,
            expression,
            parsed,
        })
    }
}

/// Group keys followed by measure values, one row per group, sorted by key.
#[derive(Clone, Debug, PartialEq)]
pub struct PivotResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PivotOptions {
    /// Allow strategies that push grouping into an accelerated backend.
    pub use_acceleration: bool,
    /// Allow the row-scan strategy that folds plannable measures without the evaluator.
    pub use_planned_scan: bool,
    /// How many levels of measure references are followed when planning a measure.
    pub max_measure_depth: usize,
}

impl Default for PivotOptions {
    fn default() -> Self {
        Self {
            use_acceleration: true,
            use_planned_scan: true,
            max_measure_depth: 16,
        }
    }
}

/// Execution strategies, fastest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PivotStrategy {
    /// Backend group-by computing every measure from native aggregations.
    AcceleratedGroupBy,
    /// Backend enumerates the group keys; the evaluator computes each measure per group.
    AcceleratedGroupKeys,
    /// Backend group-by on base columns and foreign keys, rolled up to dimension attributes.
    AcceleratedRollup,
    /// Row scan folding plannable measures, with at most one relationship hop per column.
    PlannedScan,
    /// Row scan enumerating groups; the evaluator computes each measure per group.
    RowScan,
}

impl fmt::Display for PivotStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PivotStrategy::AcceleratedGroupBy => "accelerated group-by",
            PivotStrategy::AcceleratedGroupKeys => "accelerated group keys",
            PivotStrategy::AcceleratedRollup => "accelerated rollup",
            PivotStrategy::PlannedScan => "planned scan",
            PivotStrategy::RowScan => "row scan",
        };
        f.write_str(name)
    }
}

/// Compute a grouped table suitable for rendering a pivot table.
pub fn pivot(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
) -> TabularResult<PivotResult> {
    pivot_with_options(
        model,
        base_table,
        group_by,
        measures,
        filter,
        &PivotOptions::default(),
    )
}

pub fn pivot_with_options(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
    options: &PivotOptions,
) -> TabularResult<PivotResult> {
    let plan = plan::plan(model, base_table, group_by, measures, filter, options)?;
    log::debug!(
        "pivot over {base_table}: {} group columns, {} measures, strategy {}{}",
        group_by.len(),
        measures.len(),
        plan.strategy(),
        plan.skipped_summary()
    );

    let mut rows = match strategy::execute(model, base_table, group_by, measures, filter, &plan)? {
        Some(rows) => rows,
        None => {
            log::debug!("accelerated backend declined the group-by; falling back to row scan");
            strategy::row_scan(model, base_table, group_by, measures, filter)?
        }
    };

    let key_len = group_by.len();
    rows.sort_by(|a, b| cmp_key(&a[..key_len], &b[..key_len]));

    let mut columns: Vec<String> = group_by.iter().map(GroupByColumn::label).collect();
    columns.extend(measures.iter().map(|m| m.name.clone()));
    Ok(PivotResult { columns, rows })
}

/// The strategy [`pivot_with_options`] would run for these inputs.
pub fn plan_pivot(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
    options: &PivotOptions,
) -> TabularResult<PivotStrategy> {
    Ok(plan::plan(model, base_table, group_by, measures, filter, options)?.strategy())
}

fn cmp_key(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(a, b)| cmp_for_sort(a, b))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}
