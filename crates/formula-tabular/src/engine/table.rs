use super::{arity_error, column_ref, read_cell, TabularEngine};
use crate::context::{FilterContext, RowContext, RowFrame};
use crate::error::{TabularError, TabularResult};
use crate::model::{Cardinality, DataModel, RelationshipInfo};
use crate::parser::Expr;
use crate::propagation::{
    active_directions, blank_member_visible, resolve_row_sets, resolve_table_rows,
};
use crate::value::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Rows of one model table produced by a table expression.
///
/// `rows` may contain `row_count()`, the table's virtual blank row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TableResult {
    pub(crate) table: String,
    pub(crate) rows: Vec<usize>,
    pub(crate) visible_cols: Option<Arc<[usize]>>,
}

impl TableResult {
    fn all_columns(table: &str, rows: Vec<usize>) -> Self {
        Self {
            table: table.to_string(),
            rows,
            visible_cols: None,
        }
    }

    pub(crate) fn frame(&self, row: usize) -> RowFrame {
        RowFrame {
            table: Arc::from(self.table.as_str()),
            row,
            visible_cols: self.visible_cols.clone(),
        }
    }
}

impl TabularEngine {
    pub(crate) fn eval_table(
        &self,
        model: &DataModel,
        expr: &Expr,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<TableResult> {
        match expr {
            Expr::TableName(name) => Ok(TableResult::all_columns(
                name,
                resolve_table_rows(model, filter, name)?,
            )),
            Expr::CalculateTable { table, filters } => {
                let mut inner = self.build_calculate_filter(model, filter, row_ctx, filters)?;
                inner.suppress_implicit_transition = true;
                self.eval_table(model, table, &inner, row_ctx)
            }
            Expr::Call { name, args } => {
                let upper = name.to_ascii_uppercase();
                self.eval_table_call(model, &upper, args, filter, row_ctx)
            }
            other => Err(TabularError::Type(format!(
                "expression {other:?} cannot be evaluated as a table"
            ))),
        }
    }

    fn eval_table_call(
        &self,
        model: &DataModel,
        name: &str,
        args: &[Expr],
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<TableResult> {
        match name {
            "FILTER" => {
                let [table_expr, predicate] = args else {
                    return Err(arity_error("FILTER", "2 arguments"));
                };
                let base = self.eval_table(model, table_expr, filter, row_ctx)?;
                let row_filter = filter.with_transition_suppressed(false);
                let mut rows = Vec::new();
                for &row in &base.rows {
                    let inner = row_ctx.with_frame(base.frame(row));
                    if self
                        .eval_scalar(model, predicate, &row_filter, &inner)?
                        .truthy()?
                    {
                        rows.push(row);
                    }
                }
                Ok(TableResult { rows, ..base })
            }
            "ALL" | "ALLNOBLANKROW" => {
                let [arg] = args else {
                    return Err(arity_error(name, "1 argument"));
                };
                match arg {
                    Expr::TableName(table) => {
                        let row_count = model.table_or_err(table)?.row_count();
                        Ok(TableResult::all_columns(table, (0..row_count).collect()))
                    }
                    Expr::ColumnRef { table, column } => {
                        let mut cleared = filter.clone();
                        cleared.clear_column_filter(table, column);
                        self.distinct_rows_of_column(
                            model,
                            table,
                            column,
                            &cleared,
                            name == "ALL",
                        )
                    }
                    other => Err(TabularError::Type(format!(
                        "{name} expects a table or column, got {other:?}"
                    ))),
                }
            }
            "VALUES" | "DISTINCT" => {
                let [arg] = args else {
                    return Err(arity_error(name, "1 argument"));
                };
                match arg {
                    Expr::ColumnRef { table, column } => {
                        self.distinct_rows_of_column(model, table, column, filter, true)
                    }
                    Expr::TableName(table) if name == "VALUES" => {
                        let sets = (!filter.is_empty())
                            .then(|| resolve_row_sets(model, filter))
                            .transpose()?;
                        let mut rows = resolve_table_rows(model, filter, table)?;
                        if blank_member_visible(model, filter, table, sets.as_ref())?
                        {
                            rows.push(model.table_or_err(table)?.row_count());
                        }
                        Ok(TableResult::all_columns(table, rows))
                    }
                    other => {
                        let base = self.eval_table(model, other, filter, row_ctx)?;
                        distinct_rows(model, base)
                    }
                }
            }
            "ALLEXCEPT" => {
                let [Expr::TableName(table), keep @ ..] = args else {
                    return Err(TabularError::Type(
                        "ALLEXCEPT expects a table name followed by columns".into(),
                    ));
                };
                if keep.is_empty() {
                    return Err(arity_error("ALLEXCEPT", "at least 2 arguments"));
                }
                let mut kept = HashSet::new();
                for expr in keep {
                    let (col_table, column) = column_ref(expr, "ALLEXCEPT")?;
                    if col_table != table.as_str() {
                        return Err(TabularError::Eval(format!(
                            "ALLEXCEPT column {col_table}[{column}] must belong to {table}"
                        )));
                    }
                    model.column_idx_or_err(col_table, column)?;
                    kept.insert(column);
                }
                let mut modified = filter.clone();
                modified.clear_table_filters(table);
                for ((t, c), values) in &filter.column_filters {
                    if t == table && kept.contains(c.as_str()) {
                        modified.set_column_in(t, c, values.iter().cloned());
                    }
                }
                Ok(TableResult::all_columns(
                    table,
                    resolve_table_rows(model, &modified, table)?,
                ))
            }
            "RELATEDTABLE" => {
                let [Expr::TableName(target)] = args else {
                    return Err(TabularError::Type(
                        "RELATEDTABLE expects a table name".into(),
                    ));
                };
                self.eval_relatedtable(model, target, filter, row_ctx)
            }
            other => Err(TabularError::Eval(format!(
                "unsupported table function {other}"
            ))),
        }
    }

    /// One row per distinct value of `table[column]` visible under `filter`, exposing only
    /// that column. With `include_blank_row`, the virtual blank row stands in for blank when no
    /// physical row holds it; otherwise physical blanks are dropped too.
    fn distinct_rows_of_column(
        &self,
        model: &DataModel,
        table: &str,
        column: &str,
        filter: &FilterContext,
        include_blank_row: bool,
    ) -> TabularResult<TableResult> {
        let idx = model.column_idx_or_err(table, column)?;
        let table_ref = model.table_or_err(table)?;
        let sets = (!filter.is_empty())
            .then(|| resolve_row_sets(model, filter))
            .transpose()?;
        let candidates: Vec<usize> = match &sets {
            Some(sets) => sets
                .get(table)
                .ok_or_else(|| TabularError::UnknownTable(table.to_string()))?
                .iter_ones()
                .collect(),
            None => (0..table_ref.row_count()).collect(),
        };

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for row in candidates {
            let value = table_ref.value_by_idx(row, idx).unwrap_or_default();
            if value.is_blank() && !include_blank_row {
                continue;
            }
            if seen.insert(value) {
                rows.push(row);
            }
        }
        if include_blank_row
            && !seen.contains(&Value::Blank)
            && blank_member_visible(model, filter, table, sets.as_ref())?
        {
            rows.push(table_ref.row_count());
        }

        Ok(TableResult {
            table: table.to_string(),
            rows,
            visible_cols: Some(Arc::from([idx])),
        })
    }

    /// `RELATEDTABLE(T)`: rows of `T` reached from the current row through a unique chain of
    /// active one-to-many relationships, restricted to rows visible under `filter`.
    fn eval_relatedtable(
        &self,
        model: &DataModel,
        target: &str,
        filter: &FilterContext,
        row_ctx: &RowContext,
    ) -> TabularResult<TableResult> {
        let Some(current) = row_ctx.current_table() else {
            return Err(TabularError::Eval("RELATEDTABLE requires a row context".into()));
        };
        let row = row_ctx
            .row_for(current)
            .ok_or_else(|| TabularError::Eval("RELATEDTABLE requires a row context".into()))?;
        let path = unique_one_to_many_path(model, filter, current, target)?;

        let mut frontier = vec![row];
        let mut table = current;
        for rel in path {
            let info = &model.relationships[rel];
            let mut next = Vec::new();
            for &row in &frontier {
                let key = read_cell(model, table, row, info.to_idx)?;
                if model.table_or_err(table)?.row_count() <= row || key.is_blank() {
                    // The virtual blank row owns every blank or unmatched fact key.
                    for (fk, rows) in &info.from_index {
                        if info.is_unmatched(fk) && !info.to_index.contains_key(fk) {
                            next.extend(rows.iter().copied());
                        }
                    }
                }
                if let Some(rows) = info.from_index.get(&key) {
                    next.extend(rows.iter().copied());
                }
            }
            next.sort_unstable();
            next.dedup();
            frontier = next;
            table = info.rel.from_table.as_str();
        }

        let visible: HashSet<usize> = resolve_table_rows(model, filter, target)?
            .into_iter()
            .collect();
        frontier.retain(|row| visible.contains(row));
        Ok(TableResult::all_columns(target, frontier))
    }
}

/// Chain of relationship indices leading from `from` (one side) to `to` (many side).
fn unique_one_to_many_path(
    model: &DataModel,
    filter: &FilterContext,
    from: &str,
    to: &str,
) -> TabularResult<Vec<usize>> {
    let directions = active_directions(model, filter);
    let usable = |idx: usize, info: &RelationshipInfo| {
        directions[idx].is_some()
            && matches!(
                info.rel.cardinality,
                Cardinality::OneToMany | Cardinality::OneToOne
            )
    };

    fn walk(
        model: &DataModel,
        usable: &dyn Fn(usize, &RelationshipInfo) -> bool,
        at: &str,
        to: &str,
        path: &mut Vec<usize>,
        visited: &mut Vec<String>,
        found: &mut Vec<Vec<usize>>,
    ) {
        if found.len() > 1 {
            return;
        }
        if at == to && !path.is_empty() {
            found.push(path.clone());
            return;
        }
        for (idx, info) in model.relationships.iter().enumerate() {
            if info.rel.to_table != at || !usable(idx, info) {
                continue;
            }
            let next = info.rel.from_table.as_str();
            if visited.iter().any(|t| t == next) && next != to {
                continue;
            }
            path.push(idx);
            visited.push(next.to_string());
            walk(model, usable, next, to, path, visited, found);
            visited.pop();
            path.pop();
        }
    }

    let mut found = Vec::new();
    walk(
        model,
        &usable,
        from,
        to,
        &mut Vec::new(),
        &mut vec![from.to_string()],
        &mut found,
    );
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(TabularError::Eval(format!(
            "no active one-to-many relationship path from {from} to {to}"
        ))),
        _ => Err(TabularError::AmbiguousRelationship {
            from_table: from.to_string(),
            to_table: to.to_string(),
            detail: "several active relationship paths".into(),
        }),
    }
}

/// Deduplicate rows by every column of the source table.
fn distinct_rows(model: &DataModel, base: TableResult) -> TabularResult<TableResult> {
    let columns = model.table_or_err(&base.table)?.columns().len();
    let visible: Vec<usize> = match &base.visible_cols {
        Some(cols) => cols.to_vec(),
        None => (0..columns).collect(),
    };
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for &row in &base.rows {
        let key = visible
            .iter()
            .map(|&idx| read_cell(model, &base.table, row, idx))
            .collect::<TabularResult<Vec<_>>>()?;
        if seen.insert(key) {
            rows.push(row);
        }
    }
    Ok(TableResult { rows, ..base })
}
