use crate::model::CrossFilterDirection;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Per-evaluation override of a relationship, set by `CROSSFILTER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RelationshipOverride {
    Active(CrossFilterDirection),
    Disabled,
}

/// The set of restrictions an expression is evaluated under.
///
/// All constraints combine with logical AND. Values are cheap to clone and are never shared
/// between unrelated evaluations: nested calls build a modified copy instead of mutating the
/// caller's context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterContext {
    pub(crate) column_filters: HashMap<(String, String), HashSet<Value>>,
    pub(crate) row_filters: HashMap<String, HashSet<usize>>,
    pub(crate) activated_relationships: HashSet<usize>,
    pub(crate) relationship_overrides: BTreeMap<usize, RelationshipOverride>,
    pub(crate) suppress_implicit_transition: bool,
}

impl FilterContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `true` when no column or row filter is present. Relationship modifiers alone do not
    /// restrict any table.
    pub fn is_empty(&self) -> bool {
        self.column_filters.is_empty() && self.row_filters.is_empty()
    }

    pub fn with_column_equals(mut self, table: &str, column: &str, value: Value) -> Self {
        self.set_column_equals(table, column, value);
        self
    }

    pub fn with_column_in(
        mut self,
        table: &str,
        column: &str,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.set_column_in(table, column, values);
        self
    }

    pub fn with_row_filter(mut self, table: &str, rows: impl IntoIterator<Item = usize>) -> Self {
        self.set_row_filter(table, rows.into_iter().collect());
        self
    }

    /// Replace the filter on `table[column]` with a single allowed value.
    pub fn set_column_equals(&mut self, table: &str, column: &str, value: Value) {
        self.column_filters.insert(
            (table.to_string(), column.to_string()),
            HashSet::from([value]),
        );
    }

    pub fn set_column_in(
        &mut self,
        table: &str,
        column: &str,
        values: impl IntoIterator<Item = Value>,
    ) {
        self.column_filters.insert(
            (table.to_string(), column.to_string()),
            values.into_iter().collect(),
        );
    }

    pub fn set_row_filter(&mut self, table: &str, rows: HashSet<usize>) {
        self.row_filters.insert(table.to_string(), rows);
    }

    pub fn clear_column_filter(&mut self, table: &str, column: &str) {
        self.column_filters
            .remove(&(table.to_string(), column.to_string()));
    }

    /// Remove every column filter and the row filter on `table`.
    pub fn clear_table_filters(&mut self, table: &str) {
        self.column_filters.retain(|(t, _), _| t != table);
        self.row_filters.remove(table);
    }

    pub fn column_filter(&self, table: &str, column: &str) -> Option<&HashSet<Value>> {
        self.column_filters
            .get(&(table.to_string(), column.to_string()))
    }

    pub fn row_filter(&self, table: &str) -> Option<&HashSet<usize>> {
        self.row_filters.get(table)
    }

    /// Narrow `table[column]` to `values`, intersecting with an existing filter.
    pub(crate) fn intersect_column(&mut self, key: (String, String), values: HashSet<Value>) {
        match self.column_filters.get_mut(&key) {
            Some(existing) => existing.retain(|v| values.contains(v)),
            None => {
                self.column_filters.insert(key, values);
            }
        }
    }

    pub(crate) fn intersect_rows(&mut self, table: &str, rows: HashSet<usize>) {
        match self.row_filters.get_mut(table) {
            Some(existing) => existing.retain(|row| rows.contains(row)),
            None => self.set_row_filter(table, rows),
        }
    }

    pub(crate) fn activate_relationship(&mut self, idx: usize) {
        self.activated_relationships.insert(idx);
    }

    pub(crate) fn override_relationship(&mut self, idx: usize, state: RelationshipOverride) {
        self.relationship_overrides.insert(idx, state);
    }

    pub(crate) fn relationship_override(&self, idx: usize) -> Option<RelationshipOverride> {
        self.relationship_overrides.get(&idx).copied()
    }

    /// Same relationship modifiers as `self`, with no row or column restrictions.
    pub(crate) fn relationships_only(&self) -> FilterContext {
        FilterContext {
            activated_relationships: self.activated_relationships.clone(),
            relationship_overrides: self.relationship_overrides.clone(),
            ..FilterContext::default()
        }
    }

    pub(crate) fn with_transition_suppressed(&self, suppressed: bool) -> FilterContext {
        let mut out = self.clone();
        out.suppress_implicit_transition = suppressed;
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RowFrame {
    pub(crate) table: Arc<str>,
    pub(crate) row: usize,
    /// Column indices exposed by this frame; `None` exposes the whole row. Iterating a
    /// one-column table such as `VALUES(T[C])` only exposes `C`.
    pub(crate) visible_cols: Option<Arc<[usize]>>,
}

/// Stack of current-row bindings, innermost last.
///
/// Frames are shared: [`RowContext::with_row`] returns an extended copy and leaves `self`
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowContext {
    frames: Arc<Vec<RowFrame>>,
}

impl RowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new context with `table`/`row` pushed as the innermost frame.
    pub fn with_row(&self, table: &str, row: usize) -> RowContext {
        self.with_frame(RowFrame {
            table: Arc::from(table),
            row,
            visible_cols: None,
        })
    }

    pub(crate) fn with_frame(&self, frame: RowFrame) -> RowContext {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.extend(self.frames.iter().cloned());
        frames.push(frame);
        RowContext {
            frames: Arc::new(frames),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn current_table(&self) -> Option<&str> {
        self.frames.last().map(|f| f.table.as_ref())
    }

    /// Frame for `table`, `level` steps out from the innermost one (0 = innermost).
    pub(crate) fn frame_for_level(&self, table: &str, level: usize) -> Option<&RowFrame> {
        self.frames
            .iter()
            .rev()
            .filter(|f| f.table.as_ref() == table)
            .nth(level)
    }

    pub(crate) fn outermost_frame(&self, table: &str) -> Option<&RowFrame> {
        self.frames.iter().find(|f| f.table.as_ref() == table)
    }

    pub(crate) fn row_for(&self, table: &str) -> Option<usize> {
        self.frame_for_level(table, 0).map(|f| f.row)
    }

    /// Innermost frame of every distinct table with a current row.
    pub(crate) fn innermost_frames(&self) -> Vec<&RowFrame> {
        let mut seen = HashSet::new();
        self.frames
            .iter()
            .rev()
            .filter(|f| seen.insert(f.table.as_ref()))
            .collect()
    }

    pub(crate) fn is_column_visible(&self, table: &str, idx: usize) -> bool {
        match self.frame_for_level(table, 0) {
            Some(RowFrame {
                visible_cols: Some(cols),
                ..
            }) => cols.contains(&idx),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_row_leaves_the_original_untouched() {
        let outer = RowContext::new().with_row("Orders", 3);
        let inner = outer.with_row("Orders", 5);
        assert_eq!(outer.depth(), 1);
        assert_eq!(inner.depth(), 2);
        assert_eq!(inner.row_for("Orders"), Some(5));
        assert_eq!(inner.frame_for_level("Orders", 1).map(|f| f.row), Some(3));
        assert_eq!(inner.outermost_frame("Orders").map(|f| f.row), Some(3));
        assert_eq!(inner.innermost_frames().len(), 1);
    }

    #[test]
    fn clear_table_filters_removes_row_and_column_filters() {
        let mut filter = FilterContext::empty()
            .with_column_equals("A", "x", Value::from(1.0))
            .with_column_equals("B", "y", Value::from(2.0))
            .with_row_filter("A", [0, 1]);
        filter.clear_table_filters("A");
        assert!(filter.column_filter("A", "x").is_none());
        assert!(filter.row_filter("A").is_none());
        assert!(filter.column_filter("B", "y").is_some());
    }

    #[test]
    fn intersect_column_narrows_existing_sets() {
        let mut filter =
            FilterContext::empty().with_column_in("A", "x", [Value::from(1.0), Value::from(2.0)]);
        filter.intersect_column(
            ("A".into(), "x".into()),
            HashSet::from([Value::from(2.0), Value::from(3.0)]),
        );
        assert_eq!(
            filter.column_filter("A", "x"),
            Some(&HashSet::from([Value::from(2.0)]))
        );
    }
}
