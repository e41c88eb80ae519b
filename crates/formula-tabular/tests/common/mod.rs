#![allow(dead_code)]

use formula_colstore::{ColumnSchema, ColumnType, ColumnarTableBuilder};
use formula_tabular::{
    Cardinality, CrossFilterDirection, DataModel, Relationship, Table, Value,
};
use std::sync::Arc;

/// Active, single-direction one-to-many relationship without integrity enforcement.
pub fn relationship(
    name: &str,
    from_table: &str,
    from_column: &str,
    to_table: &str,
    to_column: &str,
) -> Relationship {
    Relationship {
        name: name.into(),
        from_table: from_table.into(),
        from_column: from_column.into(),
        to_table: to_table.into(),
        to_column: to_column.into(),
        cardinality: Cardinality::OneToMany,
        cross_filter_direction: CrossFilterDirection::Single,
        is_active: true,
        enforce_referential_integrity: false,
    }
}

pub fn table(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
    let mut table = Table::new(name, columns.to_vec());
    for row in rows {
        table.push_row(row).unwrap();
    }
    table
}

/// `DimCategory{CategoryId, Name}` with two categories and one fact row per category.
pub fn category_model() -> DataModel {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "DimCategory",
            &["CategoryId", "Name"],
            vec![
                vec!["A".into(), "Alpha".into()],
                vec!["B".into(), "Beta".into()],
            ],
        ))
        .unwrap();
    model
        .add_table(table(
            "Fact",
            &["CategoryId", "Amount"],
            vec![vec!["A".into(), 10.0.into()], vec!["B".into(), 5.0.into()]],
        ))
        .unwrap();
    model
        .add_relationship(relationship(
            "Fact_DimCategory",
            "Fact",
            "CategoryId",
            "DimCategory",
            "CategoryId",
        ))
        .unwrap();
    model.add_measure("Total", "SUM(Fact[Amount])").unwrap();
    model
}

/// Two dimension rows and a single fact row whose key is blank.
pub fn blank_key_model() -> DataModel {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "Dim",
            &["Key", "Label"],
            vec![
                vec![1.0.into(), "one".into()],
                vec![2.0.into(), "two".into()],
            ],
        ))
        .unwrap();
    model
        .add_table(table(
            "Fact",
            &["Key", "Amount"],
            vec![vec![Value::Blank, 7.0.into()]],
        ))
        .unwrap();
    model
        .add_relationship(relationship("Fact_Dim", "Fact", "Key", "Dim", "Key"))
        .unwrap();
    model
}

// Customers (3, North has no sales), Products (2), and seven sales. Sale 105 has a blank
// customer and sale 106 references customer 99, which does not exist.
const CUSTOMERS: [(f64, &str); 3] = [(1.0, "East"), (2.0, "West"), (3.0, "North")];
const PRODUCTS: [(f64, &str); 2] = [(10.0, "A"), (11.0, "B")];
const SALES: [(f64, Option<f64>, f64, f64); 7] = [
    (100.0, Some(1.0), 10.0, 10.0),
    (101.0, Some(1.0), 11.0, 5.0),
    (102.0, Some(2.0), 10.0, 7.0),
    (103.0, Some(2.0), 11.0, 3.0),
    (104.0, Some(1.0), 10.0, 2.0),
    (105.0, None, 10.0, 4.0),
    (106.0, Some(99.0), 11.0, 1.0),
];

fn star_relationships_and_measures(model: &mut DataModel) {
    model
        .add_relationship(relationship(
            "Sales_Customers",
            "Sales",
            "CustomerId",
            "Customers",
            "CustomerId",
        ))
        .unwrap();
    model
        .add_relationship(relationship(
            "Sales_Products",
            "Sales",
            "ProductId",
            "Products",
            "ProductId",
        ))
        .unwrap();
    model
        .add_measure("Total Sales", "SUM(Sales[Amount])")
        .unwrap();
    model
        .add_measure("Double Sales", "[Total Sales] * 2")
        .unwrap();
    model.add_measure("Orders", "COUNTROWS(Sales)").unwrap();
    model
        .add_measure("Average Sale", "AVERAGE(Sales[Amount])")
        .unwrap();
    model
        .add_measure("Buyers", "DISTINCTCOUNT(Sales[CustomerId])")
        .unwrap();
}

pub fn star_model() -> DataModel {
    let mut model = DataModel::new();
    model
        .add_table(table(
            "Customers",
            &["CustomerId", "Region"],
            CUSTOMERS
                .iter()
                .map(|&(id, region)| vec![id.into(), region.into()])
                .collect(),
        ))
        .unwrap();
    model
        .add_table(table(
            "Products",
            &["ProductId", "Category"],
            PRODUCTS
                .iter()
                .map(|&(id, category)| vec![id.into(), category.into()])
                .collect(),
        ))
        .unwrap();
    model
        .add_table(table(
            "Sales",
            &["SaleId", "CustomerId", "ProductId", "Amount"],
            SALES
                .iter()
                .map(|&(id, customer, product, amount)| {
                    vec![
                        id.into(),
                        customer.map_or(Value::Blank, Value::from),
                        product.into(),
                        amount.into(),
                    ]
                })
                .collect(),
        ))
        .unwrap();
    star_relationships_and_measures(&mut model);
    model
}

/// [`star_model`] plus `Regions{Region, Manager}` reached from `Customers[Region]`.
pub fn snowflake_model() -> DataModel {
    let mut model = star_model();
    model
        .add_table(table(
            "Regions",
            &["Region", "Manager"],
            vec![
                vec!["East".into(), "Ann".into()],
                vec!["West".into(), "Bob".into()],
                vec!["North".into(), "Cy".into()],
            ],
        ))
        .unwrap();
    model
        .add_relationship(relationship(
            "Customers_Regions",
            "Customers",
            "Region",
            "Regions",
            "Region",
        ))
        .unwrap();
    model
}

fn number(v: f64) -> formula_colstore::Value {
    formula_colstore::Value::Number(v)
}

fn text(s: &str) -> formula_colstore::Value {
    formula_colstore::Value::String(Arc::from(s))
}

/// Same data as [`star_model`], with every table stored in the column store.
pub fn columnar_star_model() -> DataModel {
    let mut model = DataModel::new();

    let mut customers = ColumnarTableBuilder::new(vec![
        ColumnSchema::new("CustomerId", ColumnType::Number),
        ColumnSchema::new("Region", ColumnType::String),
    ]);
    for (id, region) in CUSTOMERS {
        customers.append_row(&[number(id), text(region)]).unwrap();
    }
    model
        .add_table(Table::from_columnar("Customers", customers.finalize()))
        .unwrap();

    let mut products = ColumnarTableBuilder::new(vec![
        ColumnSchema::new("ProductId", ColumnType::Number),
        ColumnSchema::new("Category", ColumnType::String),
    ]);
    for (id, category) in PRODUCTS {
        products.append_row(&[number(id), text(category)]).unwrap();
    }
    model
        .add_table(Table::from_columnar("Products", products.finalize()))
        .unwrap();

    let mut sales = ColumnarTableBuilder::new(vec![
        ColumnSchema::new("SaleId", ColumnType::Number),
        ColumnSchema::new("CustomerId", ColumnType::Number),
        ColumnSchema::new("ProductId", ColumnType::Number),
        ColumnSchema::new("Amount", ColumnType::Number),
    ]);
    for (id, customer, product, amount) in SALES {
        let customer = customer.map_or(formula_colstore::Value::Null, number);
        sales
            .append_row(&[number(id), customer, number(product), number(amount)])
            .unwrap();
    }
    model
        .add_table(Table::from_columnar("Sales", sales.finalize()))
        .unwrap();

    star_relationships_and_measures(&mut model);
    model
}

pub fn num(v: f64) -> Value {
    Value::from(v)
}
