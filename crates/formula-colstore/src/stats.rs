#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::table::ColumnData;
use crate::types::{ColumnType, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Exact per-column statistics computed when a table is finalized.
///
/// `sum` is expressed in storage units: scaled integer columns report the sum of the raw
/// integers, boolean columns report the number of `true` values, and string columns have none.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnStats {
    pub column_type: ColumnType,
    pub distinct_count: u64,
    pub null_count: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub sum: Option<f64>,
    pub avg_length: Option<f64>,
}

pub(crate) fn float_key(v: f64) -> u64 {
    // -0.0 and 0.0 are one distinct value.
    if v == 0.0 {
        0f64.to_bits()
    } else {
        v.to_bits()
    }
}

pub(crate) fn compute_stats(
    column_type: ColumnType,
    data: &ColumnData,
    validity: &BitVec,
) -> ColumnStats {
    let null_count = (validity.len() - validity.count_ones()) as u64;
    let mut stats = ColumnStats {
        column_type,
        null_count,
        ..ColumnStats::default()
    };

    match data {
        ColumnData::Float(values) => {
            let mut seen = HashSet::new();
            let mut min: Option<f64> = None;
            let mut max: Option<f64> = None;
            let mut sum = 0.0;
            for idx in validity.iter_ones() {
                let v = values[idx];
                seen.insert(float_key(v));
                min = Some(min.map_or(v, |m| m.min(v)));
                max = Some(max.map_or(v, |m| m.max(v)));
                sum += v;
            }
            stats.distinct_count = seen.len() as u64;
            stats.min = min.map(Value::Number);
            stats.max = max.map(Value::Number);
            stats.sum = Some(sum);
        }
        ColumnData::Int(values) => {
            let mut seen = HashSet::new();
            let mut min: Option<i64> = None;
            let mut max: Option<i64> = None;
            let mut sum = 0.0;
            for idx in validity.iter_ones() {
                let v = values[idx];
                seen.insert(v);
                min = Some(min.map_or(v, |m| m.min(v)));
                max = Some(max.map_or(v, |m| m.max(v)));
                sum += v as f64;
            }
            stats.distinct_count = seen.len() as u64;
            stats.min = min.map(|v| int_value(column_type, v));
            stats.max = max.map(|v| int_value(column_type, v));
            stats.sum = Some(sum);
        }
        ColumnData::Bool(bits) => {
            let mut trues = 0u64;
            let mut falses = 0u64;
            for idx in validity.iter_ones() {
                if bits.get(idx) {
                    trues += 1;
                } else {
                    falses += 1;
                }
            }
            stats.distinct_count = u64::from(trues > 0) + u64::from(falses > 0);
            stats.min = match (falses, trues) {
                (0, 0) => None,
                (0, _) => Some(Value::Boolean(true)),
                _ => Some(Value::Boolean(false)),
            };
            stats.max = match (falses, trues) {
                (0, 0) => None,
                (_, 0) => Some(Value::Boolean(false)),
                _ => Some(Value::Boolean(true)),
            };
            stats.sum = Some(trues as f64);
        }
        ColumnData::Dict {
            indices,
            dictionary,
        } => {
            let mut seen = HashSet::new();
            let mut total_len = 0usize;
            let mut non_null = 0usize;
            let mut min: Option<&Arc<str>> = None;
            let mut max: Option<&Arc<str>> = None;
            for idx in validity.iter_ones() {
                let code = indices[idx];
                non_null += 1;
                let s = &dictionary[code as usize];
                total_len += s.len();
                if !seen.insert(code) {
                    continue;
                }
                if min.map_or(true, |m| s < m) {
                    min = Some(s);
                }
                if max.map_or(true, |m| s > m) {
                    max = Some(s);
                }
            }
            stats.distinct_count = seen.len() as u64;
            stats.min = min.map(|s| Value::String(Arc::clone(s)));
            stats.max = max.map(|s| Value::String(Arc::clone(s)));
            stats.avg_length = (non_null > 0).then(|| total_len as f64 / non_null as f64);
        }
    }

    stats
}

pub(crate) fn int_value(column_type: ColumnType, v: i64) -> Value {
    match column_type {
        ColumnType::Currency { .. } => Value::Currency(v),
        ColumnType::Percentage { .. } => Value::Percentage(v),
        _ => Value::DateTime(v),
    }
}
