//! Host-side columnar storage for tabular models.
//!
//! Tables are built once through [`ColumnarTableBuilder`] and are immutable afterwards. Each
//! column keeps a validity bitmap plus typed storage (floats, integers, booleans, or
//! dictionary-encoded strings) and exact statistics computed at finalize time. The scan API
//! exposes the primitives an analytical engine can use to avoid row-by-row evaluation:
//! equality/membership filtering, distinct-value enumeration, and grouped aggregation.

#![forbid(unsafe_code)]

mod bitmap;
mod query;
mod stats;
mod table;
mod types;

pub use crate::bitmap::BitVec;
pub use crate::query::{AggOp, AggSpec, GroupByResult, QueryError, TableScan};
pub use crate::stats::ColumnStats;
pub use crate::table::{ColumnSchema, ColumnarTable, ColumnarTableBuilder};
pub use crate::types::{ColumnType, Value};
