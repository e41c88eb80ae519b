//! Resolution of a [`FilterContext`] into the visible physical rows of every table.

use crate::context::{FilterContext, RelationshipOverride};
use crate::error::{TabularError, TabularResult};
use crate::model::{CrossFilterDirection, DataModel, RelationshipInfo};
use crate::value::Value;
use formula_colstore::BitVec;
use std::collections::{HashMap, HashSet};

/// Visible physical rows per table, plus whether each table's virtual blank row may show.
#[derive(Clone, Debug, Default)]
pub(crate) struct RowSets {
    rows: HashMap<String, BitVec>,
    blank: HashMap<String, bool>,
}

impl RowSets {
    pub(crate) fn get(&self, table: &str) -> Option<&BitVec> {
        self.rows.get(table)
    }

    /// Whether the filters, including those reached through relationships, admit the virtual
    /// blank row of `table`. Says nothing about whether that row exists.
    pub(crate) fn blank_allowed(&self, table: &str) -> bool {
        self.blank.get(table).copied().unwrap_or(true)
    }

    fn disallow_blank(&mut self, table: &str) -> bool {
        match self.blank.get_mut(table) {
            Some(allowed) if *allowed => {
                *allowed = false;
                true
            }
            _ => false,
        }
    }
}

/// Effective state of each relationship under `filter`, indexed like `model.relationships`.
///
/// `USERELATIONSHIP` on a relationship deactivates every other relationship between the same
/// ordered table pair; `CROSSFILTER` then overrides direction or disables it entirely.
pub(crate) fn active_directions(
    model: &DataModel,
    filter: &FilterContext,
) -> Vec<Option<CrossFilterDirection>> {
    let override_pairs: HashSet<(&str, &str)> = filter
        .activated_relationships
        .iter()
        .filter_map(|&idx| model.relationships.get(idx))
        .map(|info| (info.rel.from_table.as_str(), info.rel.to_table.as_str()))
        .collect();

    model
        .relationships
        .iter()
        .enumerate()
        .map(|(idx, info)| {
            let pair = (info.rel.from_table.as_str(), info.rel.to_table.as_str());
            let active = if override_pairs.contains(&pair) {
                filter.activated_relationships.contains(&idx)
            } else {
                info.rel.is_active
            };
            match filter.relationship_override(idx) {
                _ if !active => None,
                Some(RelationshipOverride::Disabled) => None,
                Some(RelationshipOverride::Active(direction)) => Some(direction),
                None => Some(info.rel.cross_filter_direction),
            }
        })
        .collect()
}

/// Visible rows of `table` in ascending order. The virtual blank row is never included.
pub(crate) fn resolve_table_rows(
    model: &DataModel,
    filter: &FilterContext,
    table: &str,
) -> TabularResult<Vec<usize>> {
    if filter.is_empty() {
        let table_ref = model.table_or_err(table)?;
        return Ok((0..table_ref.row_count()).collect());
    }
    let sets = resolve_row_sets(model, filter)?;
    let rows = sets
        .get(table)
        .ok_or_else(|| TabularError::UnknownTable(table.to_string()))?;
    Ok(rows.iter_ones().collect())
}

/// Resolve `filter` to a per-table bitmap of allowed rows.
///
/// Each table starts from its own row and column filters. Relationship constraints are then
/// applied until nothing changes: dimension to fact for every active relationship, and fact to
/// dimension as well when the effective direction is `Both`. A table's virtual blank row carries
/// a blank foreign key, so it only stays admissible while the dimension it points at admits its
/// own blank row. Rows and blank rows only ever get removed, so the iteration terminates.
pub(crate) fn resolve_row_sets(model: &DataModel, filter: &FilterContext) -> TabularResult<RowSets> {
    for table in filter.row_filters.keys() {
        model.table_or_err(table)?;
    }
    for (table, column) in filter.column_filters.keys() {
        model.column_idx_or_err(table, column)?;
    }

    let mut sets = RowSets::default();
    for (name, table) in &model.tables {
        let row_count = table.row_count();
        let mut allowed = BitVec::with_len_all_true(row_count);
        if let Some(rows) = filter.row_filters.get(name) {
            allowed = BitVec::with_len_all_false(row_count);
            for &row in rows {
                allowed.set(row, true);
            }
        }

        for ((t, c), values) in &filter.column_filters {
            if t != name {
                continue;
            }
            let idx = model.column_idx_or_err(t, c)?;
            let backend = table.backend();
            let wanted: Vec<Value> = values.iter().cloned().collect();
            let matched = match wanted.as_slice() {
                [] => Some(Vec::new()),
                [value] => backend.filter_eq(idx, value),
                many => backend.filter_in(idx, many),
            };
            match matched {
                Some(rows) => {
                    let mut mask = BitVec::with_len_all_false(row_count);
                    for row in rows {
                        mask.set(row, true);
                    }
                    allowed.and_inplace(&mask);
                }
                None => {
                    for row in allowed.iter_ones().collect::<Vec<_>>() {
                        let v = backend.value_by_idx(row, idx).unwrap_or_default();
                        if !values.contains(&v) {
                            allowed.set(row, false);
                        }
                    }
                }
            }
        }
        sets.rows.insert(name.clone(), allowed);
        sets.blank.insert(name.clone(), blank_row_allowed(filter, name));
    }

    let directions = active_directions(model, filter);
    let mut iterations = 0usize;
    let mut changed = true;
    while changed {
        changed = false;
        iterations += 1;
        for (info, direction) in model.relationships.iter().zip(&directions) {
            let Some(direction) = *direction else {
                continue;
            };
            changed |= propagate_to_many(&mut sets, info)?;
            if direction == CrossFilterDirection::Both {
                changed |= propagate_to_one(&mut sets, info)?;
            }
        }
    }
    log::trace!("filter propagation settled after {iterations} passes");

    Ok(sets)
}

fn set_for<'a>(sets: &'a RowSets, table: &str) -> TabularResult<&'a BitVec> {
    sets.rows
        .get(table)
        .ok_or_else(|| TabularError::UnknownTable(table.to_string()))
}

/// Whether some visible `to_table` row carries `key`.
fn key_visible(info: &RelationshipInfo, to_set: &BitVec, key: &Value) -> bool {
    info.to_index
        .get(key)
        .is_some_and(|to_rows| to_rows.as_slice().iter().any(|&r| to_set.get(r)))
}

/// Restrict the fact side to rows whose key is visible on the dimension side.
fn propagate_to_many(sets: &mut RowSets, info: &RelationshipInfo) -> TabularResult<bool> {
    let to_table = info.rel.to_table.as_str();
    let from_table = info.rel.from_table.as_str();
    let to_set = set_for(sets, to_table)?;
    let blank_allowed = sets.blank_allowed(to_table);

    // The fact table's own blank row reads a blank key.
    let from_blank_reachable = blank_allowed || key_visible(info, to_set, &Value::Blank);

    // An unrestricted dimension, blank row included, cannot restrict the fact table.
    if blank_allowed && to_set.all() {
        return Ok(false);
    }

    let from_set = set_for(sets, from_table)?;
    let mut next = BitVec::with_len_all_false(from_set.len());
    for (key, rows) in &info.from_index {
        // Blank keys may still match a real dimension row holding a blank key.
        let visible = (info.is_unmatched(key) && blank_allowed) || key_visible(info, to_set, key);
        if visible {
            for &row in rows {
                if from_set.get(row) {
                    next.set(row, true);
                }
            }
        }
    }

    let mut changed = next.count_ones() != from_set.count_ones();
    if changed {
        sets.rows.insert(from_table.to_string(), next);
    }
    if !from_blank_reachable {
        changed |= sets.disallow_blank(from_table);
    }
    Ok(changed)
}

/// Restrict the dimension side to rows whose key occurs in a visible fact row.
///
/// The dimension keeps its blank row only while a visible fact row has a blank or unmatched key.
fn propagate_to_one(sets: &mut RowSets, info: &RelationshipInfo) -> TabularResult<bool> {
    let to_table = info.rel.to_table.as_str();
    let from_set = set_for(sets, info.rel.from_table.as_str())?;

    // An unfiltered fact table keeps dimension members that have no facts.
    if from_set.all() {
        return Ok(false);
    }

    let to_set = set_for(sets, to_table)?;
    let mut next = BitVec::with_len_all_false(to_set.len());
    let mut unmatched_visible = false;
    for (key, rows) in &info.from_index {
        if !rows.iter().any(|&row| from_set.get(row)) {
            continue;
        }
        match info.to_index.get(key) {
            Some(to_rows) => {
                for &row in to_rows.as_slice() {
                    if to_set.get(row) {
                        next.set(row, true);
                    }
                }
            }
            None => unmatched_visible = true,
        }
    }

    let mut changed = next.count_ones() != to_set.count_ones();
    if changed {
        sets.rows.insert(to_table.to_string(), next);
    }
    if !unmatched_visible {
        changed |= sets.disallow_blank(to_table);
    }
    Ok(changed)
}

/// Whether the filters placed directly on `table` admit its virtual blank row.
///
/// A row filter never lists the virtual row; a column filter admits it only when it allows
/// blank. Propagation may still rule the row out; see [`RowSets::blank_allowed`].
pub(crate) fn blank_row_allowed(filter: &FilterContext, table: &str) -> bool {
    if filter.row_filters.contains_key(table) {
        return false;
    }
    filter
        .column_filters
        .iter()
        .filter(|((t, _), _)| t == table)
        .all(|(_, values)| values.contains(&Value::Blank))
}

/// Whether `table` currently has a virtual blank row: some active relationship into it has a
/// visible fact row with a blank or unmatched key.
///
/// `sets` may carry an already resolved [`resolve_row_sets`] result for `filter`.
pub(crate) fn virtual_blank_row_exists(
    model: &DataModel,
    filter: &FilterContext,
    table: &str,
    sets: Option<&RowSets>,
) -> TabularResult<bool> {
    let directions = active_directions(model, filter);
    let computed;
    let sets = match sets {
        _ if filter.is_empty() => None,
        Some(sets) => Some(sets),
        None => {
            computed = resolve_row_sets(model, filter)?;
            Some(&computed)
        }
    };

    for (info, direction) in model.relationships.iter().zip(&directions) {
        if info.rel.to_table != table || direction.is_none() {
            continue;
        }
        let from_set = sets
            .map(|sets| set_for(sets, info.rel.from_table.as_str()))
            .transpose()?;
        let exists = info
            .from_index
            .iter()
            .filter(|(key, _)| info.is_unmatched(key) && !info.to_index.contains_key(*key))
            .any(|(_, rows)| match from_set {
                Some(set) => rows.iter().any(|&row| set.get(row)),
                None => !rows.is_empty(),
            });
        if exists {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether the virtual blank row of `table` is visible under `filter`: it exists, and neither
/// the filters on `table` nor those propagated into it exclude it.
pub(crate) fn blank_member_visible(
    model: &DataModel,
    filter: &FilterContext,
    table: &str,
    sets: Option<&RowSets>,
) -> TabularResult<bool> {
    if filter.is_empty() {
        return virtual_blank_row_exists(model, filter, table, None);
    }
    let computed;
    let sets = match sets {
        Some(sets) => sets,
        None => {
            computed = resolve_row_sets(model, filter)?;
            &computed
        }
    };
    Ok(sets.blank_allowed(table) && virtual_blank_row_exists(model, filter, table, Some(sets))?)
}
