use super::plan::{GroupSource, PivotPlan, PlanKind, PlannedMeasures};
use super::{GroupByColumn, PivotMeasure};
use crate::backend::AggregationKind;
use crate::context::{FilterContext, RowContext};
use crate::engine::{fold_values, read_cell, TabularEngine};
use crate::error::{TabularError, TabularResult};
use crate::model::{CrossFilterDirection, DataModel, KeyRows};
use crate::propagation::{active_directions, resolve_table_rows};
use crate::value::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

type GroupRows = Vec<Vec<Value>>;

/// Run the planned strategy. `None` means an accelerated backend declined the group-by.
pub(super) fn execute(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
    plan: &PivotPlan,
) -> TabularResult<Option<GroupRows>> {
    let backend = model.table_or_err(base_table)?.backend();
    let rows = (!filter.is_empty())
        .then(|| resolve_table_rows(model, filter, base_table))
        .transpose()?;

    match &plan.kind {
        PlanKind::AcceleratedGroupBy {
            group_idxs,
            planned,
        } => {
            let Some(groups) =
                backend.group_by_aggregations(group_idxs, &planned.aggs, rows.as_deref())
            else {
                return Ok(None);
            };
            let key_len = group_idxs.len();
            groups
                .into_iter()
                .map(|mut group| {
                    let aggregates = group.split_off(key_len);
                    group.extend(planned.finish(&aggregates)?);
                    Ok(group)
                })
                .collect::<TabularResult<_>>()
                .map(Some)
        }
        PlanKind::AcceleratedGroupKeys { group_idxs } => {
            let Some(keys) = backend.group_by_aggregations(group_idxs, &[], rows.as_deref()) else {
                return Ok(None);
            };
            evaluate_groups(model, group_by, keys, measures, filter).map(Some)
        }
        PlanKind::AcceleratedRollup { sources, planned } => {
            accelerated_rollup(model, base_table, sources, planned, rows.as_deref())
        }
        PlanKind::PlannedScan { sources, planned } => {
            let rows = match rows {
                Some(rows) => rows,
                None => (0..backend.row_count()).collect(),
            };
            planned_scan(model, base_table, sources, planned, &rows).map(Some)
        }
        PlanKind::RowScan => row_scan(model, base_table, group_by, measures, filter).map(Some),
    }
}

/// Group by base columns plus the foreign keys of every hop, then merge partial groups that
/// land on the same dimension attributes.
fn accelerated_rollup(
    model: &DataModel,
    base_table: &str,
    sources: &[GroupSource],
    planned: &PlannedMeasures,
    rows: Option<&[usize]>,
) -> TabularResult<Option<GroupRows>> {
    let mut key_cols: Vec<usize> = Vec::new();
    let mut positions = Vec::with_capacity(sources.len());
    for source in sources {
        let col = match source {
            GroupSource::Base(idx) => *idx,
            GroupSource::Hop { rel, .. } => model.relationships[*rel].from_idx,
        };
        let pos = match key_cols.iter().position(|c| *c == col) {
            Some(pos) => pos,
            None => {
                key_cols.push(col);
                key_cols.len() - 1
            }
        };
        positions.push(pos);
    }

    let backend = model.table_or_err(base_table)?.backend();
    let Some(partials) = backend.group_by_aggregations(&key_cols, &planned.aggs, rows) else {
        return Ok(None);
    };

    let mut merged: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
    for mut partial in partials {
        let aggregates = partial.split_off(key_cols.len());
        let key = sources
            .iter()
            .zip(&positions)
            .map(|(source, &pos)| match source {
                GroupSource::Base(_) => Ok(partial[pos].clone()),
                GroupSource::Hop { rel, idx } => hop_value(model, *rel, &partial[pos], *idx),
            })
            .collect::<TabularResult<Vec<_>>>()?;
        match merged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(aggregates);
            }
            Entry::Occupied(mut slot) => {
                let pairs = slot.get_mut().iter_mut().zip(aggregates);
                for ((acc, next), spec) in pairs.zip(&planned.aggs) {
                    merge_partial(spec.kind, acc, next);
                }
            }
        }
    }

    merged
        .into_iter()
        .map(|(mut key, aggregates)| {
            key.extend(planned.finish(&aggregates)?);
            Ok(key)
        })
        .collect::<TabularResult<_>>()
        .map(Some)
}

fn merge_partial(kind: AggregationKind, acc: &mut Value, next: Value) {
    let (Some(a), Some(b)) = (acc.as_f64(), next.as_f64()) else {
        if acc.is_blank() {
            *acc = next;
        }
        return;
    };
    *acc = match kind {
        AggregationKind::Min => Value::from(a.min(b)),
        AggregationKind::Max => Value::from(a.max(b)),
        // Only planned when grouped on the counted column, so each group holds one value.
        AggregationKind::DistinctCount | AggregationKind::Average => Value::from(a.max(b)),
        AggregationKind::Sum
        | AggregationKind::Count
        | AggregationKind::CountA
        | AggregationKind::CountRows => Value::from(a + b),
    };
}

/// Value of column `idx` on the to-side row that `key` selects, the way `RELATED` reads it.
/// Keys with no to-side row land on the virtual blank row.
fn hop_value(model: &DataModel, rel: usize, key: &Value, idx: usize) -> TabularResult<Value> {
    let info = &model.relationships[rel];
    match info.to_index.get(key) {
        Some(KeyRows::One(row)) => read_cell(model, &info.rel.to_table, *row, idx),
        Some(KeyRows::Many(_)) => Err(TabularError::AmbiguousRelationship {
            from_table: info.rel.from_table.clone(),
            to_table: info.rel.to_table.clone(),
            detail: format!("key {key} matches several rows"),
        }),
        None => Ok(Value::Blank),
    }
}

fn planned_scan(
    model: &DataModel,
    base_table: &str,
    sources: &[GroupSource],
    planned: &PlannedMeasures,
    rows: &[usize],
) -> TabularResult<GroupRows> {
    let backend = model.table_or_err(base_table)?.backend();
    let cell = |row: usize, idx: usize| backend.value_by_idx(row, idx).unwrap_or_default();

    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
    for &row in rows {
        let key = sources
            .iter()
            .map(|source| match source {
                GroupSource::Base(idx) => Ok(cell(row, *idx)),
                GroupSource::Hop { rel, idx } => {
                    let fk = cell(row, model.relationships[*rel].from_idx);
                    hop_value(model, *rel, &fk, *idx)
                }
            })
            .collect::<TabularResult<Vec<_>>>()?;
        match groups.entry(key) {
            Entry::Vacant(slot) => {
                order.push(slot.key().clone());
                slot.insert(vec![row]);
            }
            Entry::Occupied(mut slot) => slot.get_mut().push(row),
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for mut key in order {
        let group_rows = groups.remove(&key).unwrap_or_default();
        let aggregates: Vec<Value> = planned
            .aggs
            .iter()
            .map(|spec| {
                fold_values(
                    spec.kind,
                    group_rows
                        .iter()
                        .map(|&row| spec.column_idx.map_or(Value::Blank, |idx| cell(row, idx))),
                )
            })
            .collect();
        key.extend(planned.finish(&aggregates)?);
        out.push(key);
    }
    Ok(out)
}

/// Enumerate the groups present among visible base rows, following many-to-one chains for
/// columns of other tables, and evaluate every measure per group.
pub(super) fn row_scan(
    model: &DataModel,
    base_table: &str,
    group_by: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
) -> TabularResult<GroupRows> {
    let directions = active_directions(model, filter);

    let mut tables: Vec<&str> = Vec::new();
    let mut paths: Vec<Vec<usize>> = Vec::new();
    let mut columns = Vec::with_capacity(group_by.len());
    for col in group_by {
        let idx = model.column_idx_or_err(&col.table, &col.column)?;
        let slot = match tables.iter().position(|t| *t == col.table) {
            Some(slot) => slot,
            None => {
                paths.push(many_to_one_path(model, &directions, base_table, &col.table)?);
                tables.push(&col.table);
                tables.len() - 1
            }
        };
        columns.push((slot, idx));
    }

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for row in resolve_table_rows(model, filter, base_table)? {
        let reached = paths
            .iter()
            .map(|path| reached_rows(model, path, row))
            .collect::<TabularResult<Vec<_>>>()?;
        // Every combination of reached rows, one per table.
        let mut choice = vec![0usize; reached.len()];
        loop {
            let key = columns
                .iter()
                .map(|&(slot, idx)| match reached[slot][choice[slot]] {
                    Some(r) => read_cell(model, tables[slot], r, idx),
                    None => Ok(Value::Blank),
                })
                .collect::<TabularResult<Vec<_>>>()?;
            if seen.insert(key.clone()) {
                keys.push(key);
            }

            let Some(pos) = (0..choice.len()).find(|&i| choice[i] + 1 < reached[i].len()) else {
                break;
            };
            choice[pos] += 1;
            choice[..pos].iter_mut().for_each(|c| *c = 0);
        }
    }

    evaluate_groups(model, group_by, keys, measures, filter)
}

/// Rows reached from `base_row` along `path`; `None` is a virtual blank row.
fn reached_rows(
    model: &DataModel,
    path: &[usize],
    base_row: usize,
) -> TabularResult<Vec<Option<usize>>> {
    let mut current = vec![Some(base_row)];
    for &rel in path {
        let info = &model.relationships[rel];
        let mut next = Vec::new();
        for row in current {
            let key = match row {
                Some(row) => read_cell(model, &info.rel.from_table, row, info.from_idx)?,
                None => Value::Blank,
            };
            match info.to_index.get(&key) {
                Some(rows) => next.extend(rows.as_slice().iter().copied().map(Some)),
                None => next.push(None),
            }
        }
        next.sort_unstable();
        next.dedup();
        current = next;
    }
    Ok(current)
}

/// The unique chain of active relationships walking from-side to to-side, `from` to `to`.
fn many_to_one_path(
    model: &DataModel,
    directions: &[Option<CrossFilterDirection>],
    from: &str,
    to: &str,
) -> TabularResult<Vec<usize>> {
    fn walk(
        model: &DataModel,
        directions: &[Option<CrossFilterDirection>],
        at: &str,
        to: &str,
        path: &mut Vec<usize>,
        found: &mut Vec<Vec<usize>>,
    ) {
        if found.len() > 1 {
            return;
        }
        if at == to {
            found.push(path.clone());
            return;
        }
        for (idx, info) in model.relationships.iter().enumerate() {
            if info.rel.from_table != at || directions[idx].is_none() || path.contains(&idx) {
                continue;
            }
            let next = info.rel.to_table.as_str();
            let revisits = path
                .iter()
                .any(|&rel| model.relationships[rel].rel.from_table == next);
            if revisits {
                continue;
            }
            path.push(idx);
            walk(model, directions, next, to, path, found);
            path.pop();
        }
    }

    let mut found = Vec::new();
    walk(model, directions, from, to, &mut Vec::new(), &mut found);
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(TabularError::Eval(format!(
            "cannot group {from} rows by {to}: no active relationship path"
        ))),
        _ => Err(TabularError::AmbiguousRelationship {
            from_table: from.to_string(),
            to_table: to.to_string(),
            detail: "several active relationship paths".into(),
        }),
    }
}

/// Evaluate every measure once per group, with the group key applied as equality filters.
fn evaluate_groups(
    model: &DataModel,
    group_by: &[GroupByColumn],
    keys: Vec<Vec<Value>>,
    measures: &[PivotMeasure],
    filter: &FilterContext,
) -> TabularResult<GroupRows> {
    let engine = TabularEngine::new();
    keys.into_iter()
        .map(|key| {
            let mut group_filter = filter.clone();
            for (col, value) in group_by.iter().zip(&key) {
                group_filter.set_column_equals(&col.table, &col.column, value.clone());
            }
            let mut row = key;
            for measure in measures {
                row.push(engine.evaluate_expr(
                    model,
                    &measure.parsed,
                    &group_filter,
                    &RowContext::new(),
                )?);
            }
            Ok(row)
        })
        .collect()
}
