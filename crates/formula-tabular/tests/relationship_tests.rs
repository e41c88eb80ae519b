mod common;

use common::{relationship, table};
use formula_tabular::{
    Cardinality, DataModel, RelationshipIndexStats, TabularError, Value,
};
use pretty_assertions::assert_eq;

fn enforced_model() -> DataModel {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "Customers",
            &["CustomerId", "Name"],
            vec![
                vec![1.0.into(), "Ada".into()],
                vec![2.0.into(), "Grace".into()],
            ],
        ))
        .unwrap();
    model
        .add_table(table(
            "Orders",
            &["OrderId", "CustomerId", "Amount"],
            vec![
                vec![10.0.into(), 1.0.into(), 3.0.into()],
                vec![11.0.into(), 2.0.into(), 4.0.into()],
            ],
        ))
        .unwrap();
    let mut rel = relationship(
        "Orders_Customers",
        "Orders",
        "CustomerId",
        "Customers",
        "CustomerId",
    );
    rel.enforce_referential_integrity = true;
    model.add_relationship(rel).unwrap();
    model
}

#[test]
fn one_to_one_rejects_duplicate_keys_on_either_side() {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "People",
            &["Id"],
            vec![vec![1.0.into()], vec![1.0.into()]],
        ))
        .unwrap();
    model
        .add_table(table("Badges", &["PersonId"], vec![vec![1.0.into()]]))
        .unwrap();
    let mut rel = relationship("Badges_People", "Badges", "PersonId", "People", "Id");
    rel.cardinality = Cardinality::OneToOne;
    let err = model.add_relationship(rel).unwrap_err();
    assert_eq!(
        err,
        TabularError::NonUniqueKey {
            table: "People".into(),
            column: "Id".into(),
            value: 1.0.into(),
        }
    );
}

#[test]
fn one_to_one_treats_blank_as_a_key() {
    let mut model = DataModel::new();
    model
        .add_table(table("People", &["Id"], vec![vec![1.0.into()]]))
        .unwrap();
    model
        .add_table(table(
            "Badges",
            &["PersonId"],
            vec![vec![Value::Blank], vec![Value::Blank]],
        ))
        .unwrap();
    let mut rel = relationship("Badges_People", "Badges", "PersonId", "People", "Id");
    rel.cardinality = Cardinality::OneToOne;
    let err = model.add_relationship(rel).unwrap_err();
    assert_eq!(
        err,
        TabularError::NonUniqueKey {
            table: "Badges".into(),
            column: "PersonId".into(),
            value: Value::Blank,
        }
    );
    assert_eq!(model.relationships().count(), 0);
}

#[test]
fn many_to_many_is_rejected_at_registration() {
    let mut model = DataModel::new();
    model
        .add_table(table("A", &["k"], vec![vec![1.0.into()]]))
        .unwrap();
    model
        .add_table(table("B", &["k"], vec![vec![1.0.into()]]))
        .unwrap();
    let mut rel = relationship("A_B", "A", "k", "B", "k");
    rel.cardinality = Cardinality::ManyToMany;
    let err = model.add_relationship(rel).unwrap_err();
    assert_eq!(
        err,
        TabularError::UnsupportedCardinality {
            relationship: "A_B".into(),
            cardinality: Cardinality::ManyToMany,
        }
    );
}

#[test]
fn unknown_tables_and_columns_are_reported() {
    let mut model = enforced_model();
    let err = model
        .add_relationship(relationship("x", "Orders", "Nope", "Customers", "CustomerId"))
        .unwrap_err();
    assert_eq!(
        err,
        TabularError::UnknownColumn {
            table: "Orders".into(),
            column: "Nope".into(),
        }
    );
    let err = model
        .add_relationship(relationship("y", "Missing", "k", "Customers", "CustomerId"))
        .unwrap_err();
    assert_eq!(err, TabularError::UnknownTable("Missing".into()));
}

#[test]
fn second_active_relationship_between_the_same_tables_is_rejected() {
    let mut model = enforced_model();
    let err = model
        .add_relationship(relationship(
            "Orders_Customers_ByOrder",
            "Orders",
            "OrderId",
            "Customers",
            "CustomerId",
        ))
        .unwrap_err();
    assert!(matches!(err, TabularError::AmbiguousRelationship { .. }));

    let mut inactive = relationship(
        "Orders_Customers_ByOrder",
        "Orders",
        "OrderId",
        "Customers",
        "CustomerId",
    );
    inactive.is_active = false;
    model.add_relationship(inactive).unwrap();
    assert_eq!(model.relationships().count(), 2);

    let err = model
        .add_relationship(relationship(
            "Orders_Customers",
            "Orders",
            "CustomerId",
            "Customers",
            "CustomerId",
        ))
        .unwrap_err();
    assert_eq!(
        err,
        TabularError::DuplicateRelationship {
            relationship: "Orders_Customers".into()
        }
    );
}

#[test]
fn index_stats_count_keys_and_unmatched_rows() {
    let mut model = enforced_model();
    model
        .insert_row("Orders", vec![12.0.into(), Value::Blank, 1.0.into()])
        .unwrap();
    assert_eq!(
        model.relationship_index_stats("Orders_Customers"),
        Some(RelationshipIndexStats {
            to_keys: 2,
            from_keys: 3,
            from_rows: 3,
            unmatched_from_rows: 1,
        })
    );
    assert_eq!(model.relationship_index_stats("missing"), None);
}

#[test]
fn rejected_insert_leaves_table_and_indices_untouched() {
    let mut model = enforced_model();
    let before = model.relationship_index_stats("Orders_Customers");
    let rows_before = model.table("Orders").unwrap().row_count();

    let err = model
        .insert_row("Orders", vec![12.0.into(), 99.0.into(), 1.0.into()])
        .unwrap_err();
    assert_eq!(
        err,
        TabularError::ReferentialIntegrityViolation {
            relationship: "Orders_Customers".into(),
            from_table: "Orders".into(),
            from_column: "CustomerId".into(),
            to_table: "Customers".into(),
            to_column: "CustomerId".into(),
            value: 99.0.into(),
        }
    );
    assert_eq!(model.table("Orders").unwrap().row_count(), rows_before);
    assert_eq!(model.relationship_index_stats("Orders_Customers"), before);

    // Rebuilding from table contents agrees with the rolled-back indices.
    model.rebuild_relationship_indices().unwrap();
    assert_eq!(model.relationship_index_stats("Orders_Customers"), before);
    assert_eq!(model.table("Orders").unwrap().row_count(), rows_before);
}

#[test]
fn duplicate_dimension_key_insert_is_rolled_back() {
    let mut model = enforced_model();
    let before = model.relationship_index_stats("Orders_Customers");

    let err = model
        .insert_row("Customers", vec![1.0.into(), "Ada again".into()])
        .unwrap_err();
    assert!(matches!(err, TabularError::NonUniqueKey { .. }));
    assert_eq!(model.table("Customers").unwrap().row_count(), 2);
    assert_eq!(model.relationship_index_stats("Orders_Customers"), before);

    model
        .insert_row("Customers", vec![3.0.into(), "Edsger".into()])
        .unwrap();
    model
        .insert_row("Orders", vec![12.0.into(), 3.0.into(), 8.0.into()])
        .unwrap();
    let stats = model.relationship_index_stats("Orders_Customers").unwrap();
    assert_eq!(stats.to_keys, 3);
    assert_eq!(stats.from_rows, 3);
}

#[test]
fn blank_foreign_key_passes_integrity_checks() {
    let mut model = enforced_model();
    model
        .insert_row("Orders", vec![12.0.into(), Value::Blank, 2.0.into()])
        .unwrap();
    assert_eq!(model.table("Orders").unwrap().row_count(), 3);
}

#[test]
fn insert_validates_row_width() {
    let mut model = enforced_model();
    let err = model
        .insert_row("Orders", vec![12.0.into(), 1.0.into()])
        .unwrap_err();
    assert_eq!(
        err,
        TabularError::SchemaMismatch {
            table: "Orders".into(),
            expected: 3,
            actual: 2,
        }
    );
}

#[test]
fn accelerated_tables_are_read_only() {
    let mut model = common::columnar_star_model();
    let err = model
        .insert_row("Customers", vec![4.0.into(), "South".into()])
        .unwrap_err();
    assert_eq!(
        err,
        TabularError::ImmutableTable {
            table: "Customers".into(),
            operation: "insert_row".into(),
        }
    );
}

#[test]
fn related_reports_duplicate_dimension_keys() {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "Dim",
            &["Key", "Label"],
            vec![
                vec![1.0.into(), "first".into()],
                vec![1.0.into(), "second".into()],
                vec![2.0.into(), "only".into()],
            ],
        ))
        .unwrap();
    model
        .add_table(table("Fact", &["Key"], vec![vec![2.0.into()]]))
        .unwrap();
    model
        .add_relationship(relationship("Fact_Dim", "Fact", "Key", "Dim", "Key"))
        .unwrap();

    model
        .add_calculated_column("Fact", "Label", "RELATED(Dim[Label])")
        .unwrap();
    assert_eq!(
        model.table("Fact").unwrap().value(0, "Label"),
        Some(Value::from("only"))
    );

    // The new row's key matches two dimension rows; the insert is refused as a whole.
    let err = model.insert_row("Fact", vec![1.0.into()]).unwrap_err();
    match err {
        TabularError::Eval(message) => assert!(message.contains("ambiguous"), "{message}"),
        other => panic!("expected an evaluation error, got {other:?}"),
    }
    assert_eq!(model.table("Fact").unwrap().row_count(), 1);
}

#[test]
fn enforced_relationship_rejects_duplicate_dimension_keys() {
    let mut model = DataModel::new();
    model
        .add_table(table("Dim", &["Key"], vec![vec![1.0.into()], vec![1.0.into()]]))
        .unwrap();
    model
        .add_table(table("Fact", &["Key"], vec![vec![1.0.into()]]))
        .unwrap();
    let mut rel = relationship("Fact_Dim", "Fact", "Key", "Dim", "Key");
    rel.enforce_referential_integrity = true;
    assert!(matches!(
        model.add_relationship(rel),
        Err(TabularError::NonUniqueKey { .. })
    ));
}
