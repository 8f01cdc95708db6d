//! Join-order optimization against live tables.

use std::sync::Arc;

use parking_lot::RwLock;
use tessera::engine::{Column, Database, DbSettings, Table};
use tessera::index::mask;
use tessera::optimizer::{Optimizer, TableFilter};
use tessera::types::{Row, SqlType, Value};

fn scan_table(db: &Database, name: &str, rows: u64) -> Arc<RwLock<Table>> {
    let table = db
        .create_temporary_table(name, vec![Column::new("id", SqlType::Long)])
        .unwrap();
    {
        let mut guard = table.write();
        for i in 0..rows {
            let mut sink = NoUndo;
            guard
                .add_row::<tessera::store::OffHeapStore>(
                    None,
                    &mut sink,
                    Row::new(vec![Value::Long(i as i64)], 0),
                )
                .unwrap();
        }
    }
    table
}

struct NoUndo;

impl tessera::store::UndoSink for NoUndo {
    fn log_row(&mut self, _table_id: u32, _row: &Row, _insert: bool) -> eyre::Result<()> {
        Ok(())
    }

    fn log_truncate(&mut self, _table_id: u32) -> eyre::Result<()> {
        Ok(())
    }

    fn remove_at_commit_stop(&mut self, _index_id: u32, _value: Value) {}
}

fn filters_for(tables: &[Arc<RwLock<Table>>]) -> Vec<TableFilter> {
    tables
        .iter()
        .enumerate()
        .map(|(i, t)| TableFilter::new(i, Arc::clone(t), vec![0]))
        .collect()
}

#[test]
fn brute_force_orders_filters_by_ascending_cost() {
    let db = Database::open(DbSettings::in_memory("opt")).unwrap();
    // scan costs are row_count + 1000
    let a = scan_table(&db, "a", 10);
    let b = scan_table(&db, "b", 100);
    let c = scan_table(&db, "c", 1000);

    // worst input order on purpose
    let mut filters = filters_for(&[c, b, a]);
    let mut optimizer = Optimizer::new(&mut filters, false);
    let plan = optimizer.optimize(false).unwrap();

    // filters 2 (a), 1 (b), 0 (c) by ascending cost
    assert_eq!(plan.order(), &[2, 1, 0]);

    // cost matches the compounding formula by hand
    let costs = [1010.0, 1100.0, 2000.0];
    let mut expected = 1.0;
    for c in costs {
        expected += expected * c;
    }
    assert!((plan.cost() - expected).abs() < 1e-6, "{}", plan.cost());

    // join chain and plan items are wired onto the filters
    assert_eq!(filters[2].join(), Some(1));
    assert_eq!(filters[1].join(), Some(0));
    assert_eq!(filters[0].join(), None);
    assert!(filters.iter().all(|f| f.plan_item().is_some()));
}

#[test]
fn forced_join_order_keeps_the_input_order() {
    let db = Database::open(DbSettings::in_memory("opt")).unwrap();
    let a = scan_table(&db, "a", 10);
    let b = scan_table(&db, "b", 1000);

    let mut filters = filters_for(&[b, a]);
    let mut optimizer = Optimizer::new(&mut filters, true);
    let plan = optimizer.optimize(false).unwrap();

    assert_eq!(plan.order(), &[0, 1]);
}

#[test]
fn equality_predicate_with_hash_index_never_raises_cost() {
    let db = Database::open(DbSettings::in_memory("opt")).unwrap();
    let a = scan_table(&db, "a", 500);
    a.write().add_hash_index(99, 0);
    let b = scan_table(&db, "b", 100);

    let unrestricted = {
        let mut filters = vec![
            TableFilter::new(0, Arc::clone(&a), vec![0]),
            TableFilter::new(1, Arc::clone(&b), vec![0]),
        ];
        Optimizer::new(&mut filters, false)
            .optimize(false)
            .unwrap()
            .cost()
    };

    let restricted = {
        let mut filters = vec![
            TableFilter::new(0, Arc::clone(&a), vec![mask::EQUALITY]),
            TableFilter::new(1, Arc::clone(&b), vec![0]),
        ];
        Optimizer::new(&mut filters, false)
            .optimize(false)
            .unwrap()
            .cost()
    };

    assert!(
        restricted <= unrestricted,
        "adding a restricting predicate raised the cost: {restricted} > {unrestricted}"
    );
}

#[test]
fn genetic_search_is_deterministic_for_identical_input() {
    let db = Database::open(DbSettings::in_memory("opt")).unwrap();
    let tables: Vec<_> = (0..9)
        .map(|i| scan_table(&db, &format!("t{i}"), 10 + 97 * i as u64))
        .collect();

    let run = || {
        let mut filters = filters_for(&tables);
        Optimizer::new(&mut filters, false)
            .optimize(false)
            .unwrap()
            .cost()
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn parse_only_mode_builds_a_plan_without_searching() {
    let db = Database::open(DbSettings::in_memory("opt")).unwrap();
    let a = scan_table(&db, "a", 10);
    let b = scan_table(&db, "b", 1000);

    let mut filters = filters_for(&[b, a]);
    let plan = Optimizer::new(&mut filters, false).optimize(true).unwrap();

    assert_eq!(plan.order(), &[0, 1]);
    assert_eq!(plan.cost(), -1.0);
    assert!(filters.iter().all(|f| f.plan_item().is_some()));
}

#[test]
fn hash_chosen_plan_prunes_non_equality_conditions() {
    let db = Database::open(DbSettings::in_memory("opt")).unwrap();
    let a = scan_table(&db, "a", 10_000);
    a.write().add_hash_index(7, 0);

    let mut filters = vec![TableFilter::new(
        0,
        Arc::clone(&a),
        vec![mask::EQUALITY | mask::START],
    )];
    let plan = Optimizer::new(&mut filters, false).optimize(false).unwrap();

    let item = filters[0].plan_item().unwrap();
    assert_eq!(item.index_id, 7, "hash index should win at cost 2");
    assert_eq!(plan.item_for(0).unwrap().index_id, 7);
    // the surviving mask is pure equality, the range bound is unusable
    assert_eq!(filters[0].masks(), &[mask::EQUALITY]);
}
