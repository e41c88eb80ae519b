//! Embedded evaluator for a tabular analytical formula language.
//!
//! A [`DataModel`] owns tables, relationships, measures and calculated columns. Expressions are
//! evaluated by [`TabularEngine`] against an explicit [`FilterContext`] and [`RowContext`];
//! grouped queries go through [`pivot`] / [`pivot_crosstab`], which pick the cheapest execution
//! strategy the table backends support.

#![forbid(unsafe_code)]

mod backend;
mod context;
mod engine;
mod error;
mod model;
mod parser;
mod pivot;
mod propagation;
mod value;

pub use crate::backend::{
    AggregationKind, AggregationSpec, ColumnarTableBackend, InMemoryTableBackend, TableBackend,
};
pub use crate::context::{FilterContext, RowContext};
pub use crate::engine::TabularEngine;
pub use crate::error::{TabularError, TabularResult};
pub use crate::model::{
    CalculatedColumn, Cardinality, CrossFilterDirection, DataModel, Measure, Relationship,
    RelationshipIndexStats, Table,
};
pub use crate::parser::{
    parse, BinaryOp, CrossFilterSetting, Expr, FilterArg, FilterTarget, UnaryOp,
};
pub use crate::pivot::{
    pivot, pivot_crosstab, pivot_crosstab_with_options, pivot_with_options, plan_pivot,
    GroupByColumn, PivotCrosstab, PivotMeasure, PivotOptions, PivotResult, PivotStrategy,
};
pub use crate::value::Value;
