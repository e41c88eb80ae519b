mod common;

use common::{columnar_star_model, num, star_model};
use formula_tabular::{
    pivot, DataModel, FilterContext, GroupByColumn, PivotMeasure, RowContext, TabularEngine,
};
use pretty_assertions::assert_eq;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn model_and_engine_are_shareable() {
    assert_send_sync::<DataModel>();
    assert_send_sync::<TabularEngine>();
    assert_send_sync::<FilterContext>();
}

#[test]
fn concurrent_readers_see_the_same_results() {
    for model in [star_model(), columnar_star_model()] {
        let regions = ["East", "West", "North"];
        let expected = [num(17.0), num(10.0), formula_tabular::Value::Blank];

        std::thread::scope(|scope| {
            let handles: Vec<_> = regions
                .iter()
                .map(|region| {
                    let model = &model;
                    scope.spawn(move || {
                        let engine = TabularEngine::new();
                        let filter = FilterContext::empty().with_column_equals(
                            "Customers",
                            "Region",
                            (*region).into(),
                        );
                        (0..50)
                            .map(|_| {
                                engine
                                    .evaluate(model, "[Total Sales]", &filter, &RowContext::new())
                                    .unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            for (handle, expected) in handles.into_iter().zip(&expected) {
                for value in handle.join().unwrap() {
                    assert_eq!(&value, expected);
                }
            }
        });

        let group_by = [GroupByColumn::new("Customers", "Region")];
        let measures = [PivotMeasure::new("Total", "[Total Sales]").unwrap()];
        let serial = pivot(&model, "Sales", &group_by, &measures, &FilterContext::empty()).unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        pivot(&model, "Sales", &group_by, &measures, &FilterContext::empty())
                            .unwrap()
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), serial);
            }
        });
    }
}
