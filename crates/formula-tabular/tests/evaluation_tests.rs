mod common;

use common::{category_model, columnar_star_model, num, star_model, table};
use formula_tabular::{DataModel, FilterContext, RowContext, TabularEngine, TabularError, Value};
use pretty_assertions::assert_eq;

fn eval(model: &DataModel, expr: &str) -> Value {
    TabularEngine::new()
        .evaluate(model, expr, &FilterContext::empty(), &RowContext::new())
        .unwrap()
}

fn eval_err(model: &DataModel, expr: &str) -> TabularError {
    TabularEngine::new()
        .evaluate(model, expr, &FilterContext::empty(), &RowContext::new())
        .unwrap_err()
}

#[test]
fn scalar_coercions() {
    let model = DataModel::new();
    assert_eq!(eval(&model, "1 & \"\""), Value::from("1"));
    assert_eq!(eval(&model, "2.5 & \"\""), Value::from("2.5"));
    assert_eq!(eval(&model, "BLANK() & \"x\""), Value::from("x"));
    assert_eq!(eval(&model, "TRUE & 1"), Value::from("TRUE1"));
    assert_eq!(eval(&model, "BLANK() + 2"), num(2.0));
    assert_eq!(eval(&model, "TRUE + 1"), num(2.0));
    assert!(matches!(eval_err(&model, "\"a\" + 1"), TabularError::Type(_)));
    assert!(matches!(eval_err(&model, "IF(\"yes\", 1, 2)"), TabularError::Type(_)));
}

#[test]
fn operator_precedence() {
    let model = DataModel::new();
    assert_eq!(eval(&model, "1 + 2 * 3"), num(7.0));
    assert_eq!(eval(&model, "(1 + 2) * 3"), num(9.0));
    assert_eq!(eval(&model, "-2 * 3"), num(-6.0));
    assert_eq!(eval(&model, "10 - 4 - 3"), num(3.0));
    assert_eq!(eval(&model, "\"a\" & 1 + 2"), Value::from("a3"));
    assert_eq!(eval(&model, "1 < 2 && 2 < 1 || TRUE"), Value::Boolean(true));
    assert_eq!(eval(&model, "1 + 1 = 2"), Value::Boolean(true));
}

#[test]
fn division_and_divide_differ_on_zero() {
    let model = DataModel::new();
    assert_eq!(eval(&model, "1 / 0"), num(f64::INFINITY));
    assert_eq!(eval(&model, "DIVIDE(1, 0)"), Value::Blank);
    assert_eq!(eval(&model, "DIVIDE(1, 0, -1)"), num(-1.0));
    assert_eq!(eval(&model, "DIVIDE(6, 4)"), num(1.5));
    assert_eq!(eval(&model, "DIVIDE(1, BLANK())"), Value::Blank);
}

#[test]
fn logical_functions() {
    let model = DataModel::new();
    assert_eq!(eval(&model, "IF(1 > 2, \"yes\")"), Value::Blank);
    assert_eq!(eval(&model, "IF(1 < 2, \"yes\", \"no\")"), Value::from("yes"));
    assert_eq!(
        eval(&model, "SWITCH(2, 1, \"one\", 2, \"two\", \"other\")"),
        Value::from("two")
    );
    assert_eq!(eval(&model, "SWITCH(9, 1, \"one\", \"other\")"), Value::from("other"));
    assert_eq!(eval(&model, "SWITCH(9, 1, \"one\")"), Value::Blank);
    assert_eq!(eval(&model, "COALESCE(BLANK(), BLANK(), 3)"), num(3.0));
    assert_eq!(eval(&model, "ISBLANK(BLANK())"), Value::Boolean(true));
    assert_eq!(eval(&model, "NOT(AND(TRUE, FALSE))"), Value::Boolean(true));
    assert_eq!(eval(&model, "OR(FALSE, FALSE)"), Value::Boolean(false));
    // `&&` short-circuits, so the failing right side is never evaluated.
    assert_eq!(eval(&model, "FALSE && \"x\" + 1"), Value::Boolean(false));
}

#[test]
fn literals_and_quoting() {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "Order Lines",
            &["Qty", "Odd]Name"],
            vec![
                vec![2.0.into(), "a".into()],
                vec![3.0.into(), "b".into()],
            ],
        ))
        .unwrap();
    assert_eq!(eval(&model, "\"say \"\"hi\"\"\""), Value::from("say \"hi\""));
    assert_eq!(eval(&model, "SUM('Order Lines'[Qty])"), num(5.0));
    assert_eq!(eval(&model, "COUNTROWS('Order Lines')"), num(2.0));
    assert_eq!(eval(&model, "MAXX('Order Lines', 'Order Lines'[Qty])"), num(3.0));
    assert_eq!(
        eval(
            &model,
            "COUNTROWS(FILTER('Order Lines', 'Order Lines'[Odd]]Name] = \"b\"))"
        ),
        num(1.0)
    );
}

#[test]
fn parse_errors_are_reported() {
    let model = DataModel::new();
    for expr in ["SUM(", "1 +", "[Unclosed", "\"open", "T[", "1 2", ""] {
        assert!(
            matches!(eval_err(&model, expr), TabularError::Parse(_)),
            "{expr}"
        );
    }
}

#[test]
fn column_aggregations() {
    let model = star_model();
    assert_eq!(eval(&model, "SUM(Sales[Amount])"), num(32.0));
    assert_eq!(eval(&model, "sum(Sales[Amount])"), num(32.0));
    assert_eq!(eval(&model, "AVERAGE(Sales[Amount])"), num(32.0 / 7.0));
    assert_eq!(eval(&model, "MIN(Sales[Amount])"), num(1.0));
    assert_eq!(eval(&model, "MAX(Sales[Amount])"), num(10.0));
    assert_eq!(eval(&model, "COUNT(Sales[CustomerId])"), num(6.0));
    assert_eq!(eval(&model, "COUNTA(Sales[CustomerId])"), num(6.0));
    assert_eq!(eval(&model, "COUNTBLANK(Sales[CustomerId])"), num(1.0));
    assert_eq!(eval(&model, "DISTINCTCOUNT(Sales[CustomerId])"), num(4.0));
    assert_eq!(eval(&model, "DISTINCTCOUNTNOBLANK(Sales[CustomerId])"), num(3.0));
    assert_eq!(eval(&model, "COUNTROWS(Sales)"), num(7.0));
    assert_eq!(eval(&model, "AVERAGEX(Products, COUNTROWS(RELATEDTABLE(Sales)))"), num(3.5));
    assert_eq!(eval(&model, "MINX(Sales, Sales[Amount] * 2)"), num(2.0));
    assert_eq!(eval(&model, "SUM(Customers[Region])"), Value::Blank);
}

#[test]
fn columnar_tables_answer_like_in_memory_tables() {
    let in_memory = star_model();
    let columnar = columnar_star_model();
    for expr in [
        "SUM(Sales[Amount])",
        "AVERAGE(Sales[Amount])",
        "MIN(Sales[Amount])",
        "MAX(Sales[Amount])",
        "COUNT(Sales[CustomerId])",
        "COUNTBLANK(Sales[CustomerId])",
        "DISTINCTCOUNT(Sales[CustomerId])",
        "DISTINCTCOUNT(Customers[CustomerId])",
        "COUNTROWS(VALUES(Customers[Region]))",
        "CALCULATE([Total Sales], Customers[Region] = \"East\")",
        "CALCULATE([Total Sales], Customers[Region] <> \"East\")",
        "CALCULATE([Orders], Sales[Amount] > 4 && Sales[ProductId] = 10)",
        "SUMX(Customers, [Total Sales])",
    ] {
        assert_eq!(eval(&in_memory, expr), eval(&columnar, expr), "{expr}");
    }
}

#[test]
fn selection_functions() {
    let model = star_model();
    let east = FilterContext::empty().with_column_equals("Customers", "Region", "East".into());
    let engine = TabularEngine::new();
    let in_east = |expr: &str| {
        engine
            .evaluate(&model, expr, &east, &RowContext::new())
            .unwrap()
    };
    assert_eq!(in_east("HASONEVALUE(Customers[Region])"), Value::Boolean(true));
    assert_eq!(in_east("SELECTEDVALUE(Customers[CustomerId])"), num(1.0));
    assert_eq!(
        eval(&model, "SELECTEDVALUE(Customers[Region], \"many\")"),
        Value::from("many")
    );
    assert_eq!(eval(&model, "HASONEVALUE(Customers[Region])"), Value::Boolean(false));
}

#[test]
fn lookupvalue_searches_one_table() {
    let model = star_model();
    assert_eq!(
        eval(&model, "LOOKUPVALUE(Customers[Region], Customers[CustomerId], 2)"),
        Value::from("West")
    );
    assert_eq!(
        eval(
            &model,
            "LOOKUPVALUE(Customers[Region], Customers[CustomerId], 42, \"none\")"
        ),
        Value::from("none")
    );
    assert_eq!(
        eval(&model, "LOOKUPVALUE(Customers[Region], Customers[CustomerId], 42)"),
        Value::Blank
    );
    assert!(matches!(
        eval_err(&model, "LOOKUPVALUE(Customers[Region], Sales[CustomerId], 1)"),
        TabularError::Eval(_)
    ));
    // Several sales for customer 1 with different amounts.
    assert!(matches!(
        eval_err(&model, "LOOKUPVALUE(Sales[Amount], Sales[CustomerId], 1)"),
        TabularError::Eval(_)
    ));
}

#[test]
fn lookupvalue_treats_blank_results_as_values() {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "Codes",
            &["Key", "Label"],
            vec![
                vec![1.0.into(), Value::Blank],
                vec![1.0.into(), "one".into()],
                vec![2.0.into(), Value::Blank],
                vec![2.0.into(), Value::Blank],
            ],
        ))
        .unwrap();
    assert!(matches!(
        eval_err(&model, "LOOKUPVALUE(Codes[Label], Codes[Key], 1)"),
        TabularError::Eval(_)
    ));
    // A matched blank is the answer; the alternate only covers a missing match.
    assert_eq!(
        eval(&model, "LOOKUPVALUE(Codes[Label], Codes[Key], 2, \"none\")"),
        Value::Blank
    );
    assert_eq!(
        eval(&model, "LOOKUPVALUE(Codes[Label], Codes[Key], 3, \"none\")"),
        Value::from("none")
    );
}

#[test]
fn unknown_names_are_errors() {
    let model = star_model();
    assert_eq!(
        eval_err(&model, "[Nope]"),
        TabularError::UnknownMeasure("Nope".into())
    );
    assert_eq!(
        eval_err(&model, "SUM(Missing[Amount])"),
        TabularError::UnknownTable("Missing".into())
    );
    assert_eq!(
        eval_err(&model, "SUM(Sales[Missing])"),
        TabularError::UnknownColumn {
            table: "Sales".into(),
            column: "Missing".into(),
        }
    );
    assert!(matches!(eval_err(&model, "FROBNICATE(1)"), TabularError::Eval(_)));
    assert!(matches!(eval_err(&model, "Sales[Amount]"), TabularError::Eval(_)));
    assert!(matches!(eval_err(&model, "RELATED(Customers[Region])"), TabularError::Eval(_)));
}

#[test]
fn measures_are_named_once_and_cannot_refer_to_themselves() {
    let mut model = star_model();
    model.add_measure("[Net]", "[Total Sales] - 1").unwrap();
    assert!(model.measure("Net").is_some());
    assert_eq!(model.evaluate_measure("[Net]", &FilterContext::empty()).unwrap(), num(31.0));
    assert_eq!(
        model.add_measure("Net", "1").unwrap_err(),
        TabularError::DuplicateMeasure {
            measure: "Net".into()
        }
    );

    assert!(matches!(model.add_measure("Loop", "[Loop] + 1"), Err(TabularError::Eval(_))));
    model.add_measure("A", "[B] + 1").unwrap();
    assert!(matches!(model.add_measure("B", "[A] * 2"), Err(TabularError::Eval(_))));
    assert!(matches!(
        model.add_measure("C", "CALCULATE(1, Sales[Amount] > [C])"),
        Err(TabularError::Eval(_))
    ));
    assert!(model.measure("B").is_none());

    // [B] is still undefined, so [A] fails at evaluation time instead.
    assert_eq!(
        model.evaluate_measure("A", &FilterContext::empty()).unwrap_err(),
        TabularError::UnknownMeasure("B".into())
    );
    assert!(matches!(model.add_measure("Bad", "SUM("), Err(TabularError::Parse(_))));
}

#[test]
fn calculated_columns_are_materialized_per_row() {
    let mut model = star_model();
    model
        .add_calculated_column("Sales", "Double", "Sales[Amount] * 2")
        .unwrap();
    model
        .add_calculated_column("Sales", "Region", "RELATED(Customers[Region])")
        .unwrap();
    model
        .add_calculated_column("Customers", "Revenue", "[Total Sales]")
        .unwrap();

    let sales = model.table("Sales").unwrap();
    assert_eq!(sales.value(0, "Double"), Some(num(20.0)));
    assert_eq!(sales.value(0, "Region"), Some(Value::from("East")));
    assert_eq!(sales.value(5, "Region"), Some(Value::Blank));
    assert_eq!(sales.value(6, "Region"), Some(Value::Blank));

    let revenue: Vec<Value> = (0..3)
        .map(|row| model.table("Customers").unwrap().value(row, "Revenue").unwrap())
        .collect();
    assert_eq!(revenue, vec![num(17.0), num(10.0), Value::Blank]);

    assert_eq!(
        model
            .add_calculated_column("Sales", "Double", "1")
            .unwrap_err(),
        TabularError::DuplicateColumn {
            table: "Sales".into(),
            column: "Double".into(),
        }
    );
    assert_eq!(model.calculated_columns().len(), 3);
}

#[test]
fn inserted_rows_get_their_calculated_columns() {
    let mut model = star_model();
    model
        .add_calculated_column("Sales", "Double", "Sales[Amount] * 2")
        .unwrap();
    model
        .add_calculated_column("Sales", "Region", "RELATED(Customers[Region])")
        .unwrap();

    model
        .insert_row("Sales", vec![107.0.into(), 2.0.into(), 10.0.into(), 6.0.into()])
        .unwrap();
    let sales = model.table("Sales").unwrap();
    assert_eq!(sales.row_count(), 8);
    assert_eq!(sales.value(7, "Double"), Some(num(12.0)));
    assert_eq!(sales.value(7, "Region"), Some(Value::from("West")));

    // Calculated values are never taken from the caller.
    let err = model
        .insert_row(
            "Sales",
            vec![108.0.into(), 2.0.into(), 10.0.into(), 6.0.into(), 0.0.into()],
        )
        .unwrap_err();
    assert!(matches!(err, TabularError::SchemaMismatch { expected: 4, actual: 5, .. }));

    // A failing calculated column rolls the row back.
    model
        .add_calculated_column("Sales", "Label", "IF(Sales[Amount] > 100, \"x\" + 1, \"ok\")")
        .unwrap();
    let err = model
        .insert_row("Sales", vec![109.0.into(), 1.0.into(), 10.0.into(), 500.0.into()])
        .unwrap_err();
    assert!(matches!(err, TabularError::Type(_)));
    assert_eq!(model.table("Sales").unwrap().row_count(), 8);
    assert_eq!(eval(&model, "SUM(Sales[Amount])"), num(38.0));
}

#[test]
fn inserted_rows_see_themselves_through_relationships() {
    let mut model = category_model();
    model
        .add_calculated_column(
            "Fact",
            "AlphaRows",
            "CALCULATE(COUNTROWS(Fact), ALL(Fact), DimCategory[Name] = \"Alpha\")",
        )
        .unwrap();
    assert_eq!(model.table("Fact").unwrap().value(0, "AlphaRows"), Some(num(1.0)));

    model.insert_row("Fact", vec!["A".into(), 20.0.into()]).unwrap();
    assert_eq!(model.table("Fact").unwrap().value(2, "AlphaRows"), Some(num(2.0)));

    // A rejected row leaves no index entries behind.
    model
        .add_calculated_column("Fact", "Check", "IF(Fact[Amount] > 100, \"x\" + 1, 1)")
        .unwrap();
    let err = model
        .insert_row("Fact", vec!["A".into(), 500.0.into()])
        .unwrap_err();
    assert!(matches!(err, TabularError::Type(_)));
    assert_eq!(model.table("Fact").unwrap().row_count(), 3);
    assert_eq!(
        eval(&model, "CALCULATE(COUNTROWS(Fact), DimCategory[Name] = \"Alpha\")"),
        num(2.0)
    );
    assert_eq!(
        eval(&model, "CALCULATE([Total], DimCategory[Name] = \"Alpha\")"),
        num(30.0)
    );
}

#[test]
fn failing_calculated_column_adds_nothing() {
    let mut model = star_model();
    let err = model
        .add_calculated_column("Customers", "Bad", "Customers[Region] + 1")
        .unwrap_err();
    assert!(matches!(err, TabularError::Type(_)));
    assert_eq!(model.table("Customers").unwrap().columns().len(), 2);
    assert!(model.calculated_columns().is_empty());
}

#[test]
fn earlier_reaches_the_outer_row() {
    let mut model = star_model();
    model
        .add_calculated_column(
            "Sales",
            "Rank",
            "COUNTROWS(FILTER(Sales, Sales[Amount] > EARLIER(Sales[Amount]))) + 1",
        )
        .unwrap();
    let ranks: Vec<Value> = (0..7)
        .map(|row| model.table("Sales").unwrap().value(row, "Rank").unwrap())
        .collect();
    assert_eq!(
        ranks,
        [1.0, 3.0, 2.0, 5.0, 6.0, 4.0, 7.0].map(num).to_vec()
    );

    assert!(matches!(
        eval_err(&model, "EARLIER(Sales[Amount])"),
        TabularError::Eval(_)
    ));
}

#[test]
fn persisted_calculated_columns_are_recomputed_on_insert() {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "T",
            &["A", "B"],
            vec![vec![1.0.into(), 2.0.into()], vec![4.0.into(), 5.0.into()]],
        ))
        .unwrap();
    model
        .add_calculated_column_definition("T", "B", "T[A] + 1")
        .unwrap();
    // Stored values are kept as they are.
    assert_eq!(model.table("T").unwrap().value(1, "B"), Some(num(5.0)));

    model.insert_row("T", vec![9.0.into()]).unwrap();
    assert_eq!(model.table("T").unwrap().value(2, "B"), Some(num(10.0)));

    assert_eq!(
        model
            .add_calculated_column_definition("T", "Missing", "1")
            .unwrap_err(),
        TabularError::UnknownColumn {
            table: "T".into(),
            column: "Missing".into(),
        }
    );
}

#[test]
fn accelerated_tables_reject_calculated_columns() {
    let mut model = columnar_star_model();
    assert_eq!(
        model
            .add_calculated_column("Sales", "Double", "Sales[Amount] * 2")
            .unwrap_err(),
        TabularError::ImmutableTable {
            table: "Sales".into(),
            operation: "add_calculated_column".into(),
        }
    );
}
