use super::{cmp_key, pivot_with_options, GroupByColumn, PivotMeasure, PivotOptions};
use crate::context::FilterContext;
use crate::error::TabularResult;
use crate::model::DataModel;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

/// A pivot reshaped into a grid: a header row, then one row per row-axis key.
#[derive(Clone, Debug, PartialEq)]
pub struct PivotCrosstab {
    pub data: Vec<Vec<Value>>,
}

pub fn pivot_crosstab(
    model: &DataModel,
    base_table: &str,
    row_fields: &[GroupByColumn],
    column_fields: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
) -> TabularResult<PivotCrosstab> {
    pivot_crosstab_with_options(
        model,
        base_table,
        row_fields,
        column_fields,
        measures,
        filter,
        &PivotOptions::default(),
    )
}

/// Like [`pivot_crosstab`], with explicit planner options.
///
/// Each data row holds the row key, then one cell per column key and measure. Combinations
/// with no group are filled with blank.
pub fn pivot_crosstab_with_options(
    model: &DataModel,
    base_table: &str,
    row_fields: &[GroupByColumn],
    column_fields: &[GroupByColumn],
    measures: &[PivotMeasure],
    filter: &FilterContext,
    options: &PivotOptions,
) -> TabularResult<PivotCrosstab> {
    let group_by: Vec<GroupByColumn> = row_fields.iter().chain(column_fields).cloned().collect();
    let grouped = pivot_with_options(model, base_table, &group_by, measures, filter, options)?;

    let row_len = row_fields.len();
    let key_len = group_by.len();

    let mut row_keys: Vec<Vec<Value>> = Vec::new();
    let mut col_keys: Vec<Vec<Value>> = Vec::new();
    let mut seen_rows = HashSet::new();
    let mut seen_cols = HashSet::new();
    let mut cells: HashMap<(Vec<Value>, Vec<Value>), Vec<Value>> = HashMap::new();
    for row in grouped.rows {
        let row_key = row[..row_len].to_vec();
        let col_key = row[row_len..key_len].to_vec();
        if seen_rows.insert(row_key.clone()) {
            row_keys.push(row_key.clone());
        }
        if seen_cols.insert(col_key.clone()) {
            col_keys.push(col_key.clone());
        }
        cells.insert((row_key, col_key), row[key_len..].to_vec());
    }
    // Rows arrive sorted by the full key, which already orders the row keys.
    col_keys.sort_by(|a, b| cmp_key(a, b));

    let mut header: Vec<Value> = row_fields.iter().map(|f| Value::from(f.label())).collect();
    for col_key in &col_keys {
        for measure in measures {
            header.push(Value::from(cell_label(col_key, &measure.name, measures.len())));
        }
    }

    let mut data = Vec::with_capacity(row_keys.len() + 1);
    data.push(header);
    for row_key in row_keys {
        let mut out = row_key.clone();
        for col_key in &col_keys {
            match cells.remove(&(row_key.clone(), col_key.clone())) {
                Some(values) => out.extend(values),
                None => out.extend(std::iter::repeat(Value::Blank).take(measures.len())),
            }
        }
        data.push(out);
    }
    Ok(PivotCrosstab { data })
}

fn cell_label(col_key: &[Value], measure: &str, measure_count: usize) -> String {
    if col_key.is_empty() {
        return measure.to_string();
    }
    let key = col_key
        .iter()
        .map(|value| match value {
            Value::Blank => "(blank)".to_string(),
            other => other.to_text().into_owned(),
        })
        .collect::<Vec<_>>()
        .join(" / ");
    if measure_count > 1 {
        format!("{key} - {measure}")
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_join_key_parts_and_mark_blank() {
        let key = [Value::from("East"), Value::Blank];
        assert_eq!(cell_label(&key, "Total", 1), "East / (blank)");
        assert_eq!(cell_label(&key, "Total", 2), "East / (blank) - Total");
        assert_eq!(cell_label(&[], "Total", 2), "Total");
    }
}
