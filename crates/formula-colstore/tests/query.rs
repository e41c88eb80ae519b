use formula_colstore::{
    AggSpec, ColumnSchema, ColumnType, ColumnarTable, ColumnarTableBuilder, QueryError, Value,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn text(s: &str) -> Value {
    Value::String(Arc::<str>::from(s))
}

fn build_table(schema: Vec<ColumnSchema>, rows: Vec<Vec<Value>>) -> ColumnarTable {
    let mut builder = ColumnarTableBuilder::new(schema);
    for row in rows {
        builder.append_row(&row).unwrap();
    }
    builder.finalize()
}

fn sales() -> ColumnarTable {
    build_table(
        vec![
            ColumnSchema::new("Region", ColumnType::String),
            ColumnSchema::new("Amount", ColumnType::Number),
            ColumnSchema::new("Price", ColumnType::Currency { scale: 2 }),
        ],
        vec![
            vec![text("East"), Value::Number(10.0), Value::Currency(1_050)],
            vec![Value::Null, Value::Number(2.0), Value::Null],
            vec![text("West"), Value::Null, Value::Currency(200)],
            vec![text("East"), Value::Number(5.0), Value::Currency(1_050)],
        ],
    )
}

#[test]
fn group_by_empty_table_is_empty() {
    let table = ColumnarTableBuilder::new(vec![
        ColumnSchema::new("k", ColumnType::String),
        ColumnSchema::new("v", ColumnType::Number),
    ])
    .finalize();

    let result = table
        .group_by(&[0], &[AggSpec::count_rows(), AggSpec::sum_f64(1)])
        .unwrap();

    assert_eq!(result.row_count(), 0);
    assert_eq!(result.column_count(), 3);
    assert!(result.to_values().iter().all(|c| c.is_empty()));
}

#[test]
fn group_by_handles_null_keys_and_null_values() {
    let table = sales();
    let result = table
        .group_by(
            &[0],
            &[
                AggSpec::count_rows().with_name("rows"),
                AggSpec::count_non_null(1),
                AggSpec::sum_f64(1),
                AggSpec::min(1),
                AggSpec::max(1),
            ],
        )
        .unwrap();

    assert_eq!(
        result.names(),
        &["Region", "rows", "count_Amount", "sum_Amount", "min_Amount", "max_Amount"]
    );
    assert_eq!(
        result.rows(),
        &[
            vec![
                text("East"),
                Value::Number(2.0),
                Value::Number(2.0),
                Value::Number(15.0),
                Value::Number(5.0),
                Value::Number(10.0),
            ],
            vec![
                Value::Null,
                Value::Number(1.0),
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(2.0),
                Value::Number(2.0),
            ],
            vec![
                text("West"),
                Value::Number(1.0),
                Value::Number(0.0),
                Value::Null,
                Value::Null,
                Value::Null,
            ],
        ]
    );
}

#[test]
fn group_by_respects_row_subset() {
    let table = sales();
    let result = table
        .scan()
        .group_by(&[0], &[AggSpec::sum_f64(1)], Some(&[0, 2][..]))
        .unwrap();
    assert_eq!(
        result.into_rows(),
        vec![
            vec![text("East"), Value::Number(10.0)],
            vec![text("West"), Value::Null],
        ]
    );
}

#[test]
fn scaled_integer_columns_aggregate_in_storage_units() {
    let table = sales();
    let result = table
        .group_by(&[], &[AggSpec::sum_f64(2), AggSpec::distinct_count(2), AggSpec::max(2)])
        .unwrap();
    assert_eq!(
        result.into_rows(),
        vec![vec![
            Value::Number(2_300.0),
            Value::Number(2.0),
            Value::Currency(1_050),
        ]]
    );
}

#[test]
fn sum_over_string_column_is_rejected() {
    let err = sales().group_by(&[], &[AggSpec::sum_f64(0)]).unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedAggregation { .. }));
}

#[test]
fn stats_are_exact() {
    let table = sales();
    let scan = table.scan();

    let region = scan.stats(0).unwrap();
    assert_eq!(region.distinct_count, 2);
    assert_eq!(region.null_count, 1);
    assert_eq!(region.min, Some(text("East")));
    assert_eq!(region.max, Some(text("West")));
    assert_eq!(region.sum, None);

    let amount = scan.stats(1).unwrap();
    assert_eq!(amount.sum, Some(17.0));
    assert_eq!(amount.min, Some(Value::Number(2.0)));
    assert_eq!(scan.count_non_null(1), 3);
}

#[test]
fn filter_eq_and_in_use_column_identity() {
    let table = sales();
    let scan = table.scan();
    assert_eq!(scan.filter_eq(0, &text("East")).unwrap(), vec![0, 3]);
    assert_eq!(scan.filter_eq(0, &Value::Null).unwrap(), vec![1]);
    assert_eq!(scan.filter_eq(0, &text("North")).unwrap(), Vec::<usize>::new());
    assert_eq!(
        scan.filter_in(1, &[Value::Number(2.0), Value::Number(5.0)]).unwrap(),
        vec![1, 3]
    );
    // A value of the wrong kind never matches.
    assert_eq!(scan.filter_eq(1, &text("2")).unwrap(), Vec::<usize>::new());
}

#[test]
fn distinct_values_include_null_in_first_seen_order() {
    let table = sales();
    assert_eq!(
        table.scan().distinct_values(0, None).unwrap(),
        vec![text("East"), Value::Null, text("West")]
    );
    assert_eq!(
        table.scan().distinct_values(0, Some(&[3, 2][..])).unwrap(),
        vec![text("East"), text("West")]
    );
    assert_eq!(
        table.scan().distinct_values(0, Some(&[9][..])).unwrap_err(),
        QueryError::RowOutOfRange(9)
    );
}

#[test]
fn builder_rejects_mismatched_rows_without_partial_writes() {
    let mut builder = ColumnarTableBuilder::new(vec![
        ColumnSchema::new("Flag", ColumnType::Boolean),
        ColumnSchema::new("When", ColumnType::DateTime),
    ]);
    builder
        .append_row(&[Value::Boolean(true), Value::DateTime(45_000)])
        .unwrap();

    let err = builder
        .append_row(&[Value::Boolean(false), Value::Number(1.0)])
        .unwrap_err();
    assert!(matches!(err, QueryError::TypeMismatch { column: 1, .. }));
    assert_eq!(
        builder.append_row(&[Value::Boolean(false)]).unwrap_err(),
        QueryError::RowLength {
            expected: 2,
            actual: 1
        }
    );

    let table = builder.finalize();
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.get_cell(0, 1), Value::DateTime(45_000));
    assert_eq!(table.get_cell(5, 0), Value::Null);
}

#[test]
fn dictionary_lists_distinct_strings() {
    let table = sales();
    let dict = table.dictionary(0).unwrap();
    assert_eq!(dict.len(), 2);
    assert!(table.dictionary(1).is_none());
}
