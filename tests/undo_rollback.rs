//! Undo-log reversibility across sessions, including the spill path.

use tempfile::tempdir;
use tessera::engine::{Column, ConnectionInfo, Engine};
use tessera::types::{Row, SqlType, Value};

fn row(id: i64, name: &str) -> Row {
    Row::new(
        vec![Value::Long(id), Value::Text(name.to_string())],
        0,
    )
}

fn open_engine_session(
    dir: &std::path::Path,
    max_memory_undo: usize,
) -> (Engine, tessera::Session) {
    let engine = Engine::with_timings(1, 4, 100);
    let mut ci = ConnectionInfo::new("undo_db", "admin", b"pw".to_vec()).persistent(dir);
    ci.max_memory_undo = max_memory_undo;
    let session = engine.open_session(ci).unwrap();
    (engine, session)
}

#[test]
fn rollback_restores_the_pre_transaction_state() {
    let dir = tempdir().unwrap();
    let (_engine, mut session) = open_engine_session(dir.path(), 1000);
    let db = session.database().clone();
    let table = db
        .create_table(
            "people",
            vec![
                Column::new("id", SqlType::Long),
                Column::new("name", SqlType::Text),
            ],
        )
        .unwrap();
    let table_id = table.read().id();

    // committed baseline
    let mut baseline_keys = Vec::new();
    for i in 1..=5 {
        baseline_keys.push(db.add_row(&mut session, table_id, row(i, "base")).unwrap());
    }
    session.commit().unwrap();

    // a transaction that inserts and deletes, then rolls back
    for i in 100..110 {
        db.add_row(&mut session, table_id, row(i, "txn")).unwrap();
    }
    let victim = db.all_rows(table_id).unwrap()[0].clone();
    db.remove_row(&mut session, table_id, &victim).unwrap();
    session.rollback().unwrap();

    let rows = db.all_rows(table_id).unwrap();
    let keys: Vec<i64> = rows.iter().map(Row::key).collect();
    assert_eq!(keys, baseline_keys);
    assert!(rows.iter().all(|r| r.values()[1] == Value::Text("base".into())));
}

#[test]
fn rollback_applies_records_in_reverse_order() {
    let dir = tempdir().unwrap();
    let (_engine, mut session) = open_engine_session(dir.path(), 1000);
    let db = session.database().clone();
    let table = db
        .create_table(
            "seq",
            vec![Column::new("n", SqlType::Long)],
        )
        .unwrap();
    let table_id = table.read().id();

    // insert then delete the same row inside one transaction: reverse-order
    // apply must re-insert before trying to remove
    let key = db
        .add_row(&mut session, table_id, Row::new(vec![Value::Long(1)], 0))
        .unwrap();
    let inserted = db.all_rows(table_id).unwrap()[0].clone();
    assert_eq!(inserted.key(), key);
    db.remove_row(&mut session, table_id, &inserted).unwrap();

    session.rollback().unwrap();

    assert!(db.all_rows(table_id).unwrap().is_empty());
}

#[test]
fn spill_thresholds_do_not_change_rollback_semantics() {
    for max_memory_undo in [1usize, 2, 1000] {
        let dir = tempdir().unwrap();
        let (_engine, mut session) = open_engine_session(dir.path(), max_memory_undo);
        let db = session.database().clone();
        let table = db
            .create_table(
                "spilled",
                vec![
                    Column::new("id", SqlType::Long),
                    Column::new("payload", SqlType::Text),
                ],
            )
            .unwrap();
        let table_id = table.read().id();

        for i in 1..=10 {
            db.add_row(&mut session, table_id, row(i, "spill me"))
                .unwrap();
        }
        if max_memory_undo < 10 {
            assert!(
                session.undo_log().has_spill_file(),
                "expected a spill at threshold {max_memory_undo}"
            );
        }

        session.rollback().unwrap();

        assert!(
            db.all_rows(table_id).unwrap().is_empty(),
            "rollback must empty the table at threshold {max_memory_undo}"
        );
        assert!(!session.undo_log().has_spill_file());
        assert_eq!(session.undo_log().size(), 0);
    }
}

#[test]
fn commit_clears_the_undo_log_and_spill_file() {
    let dir = tempdir().unwrap();
    let (_engine, mut session) = open_engine_session(dir.path(), 2);
    let db = session.database().clone();
    let table = db
        .create_table("committed", vec![Column::new("id", SqlType::Long)])
        .unwrap();
    let table_id = table.read().id();

    for i in 1..=10 {
        db.add_row(&mut session, table_id, Row::new(vec![Value::Long(i)], 0))
            .unwrap();
    }
    assert!(session.undo_log().has_spill_file());

    session.commit().unwrap();

    assert_eq!(session.undo_log().size(), 0);
    assert!(!session.undo_log().has_spill_file());
    assert_eq!(db.all_rows(table_id).unwrap().len(), 10);
}

#[test]
fn oversized_values_register_for_cleanup_until_commit() {
    let dir = tempdir().unwrap();
    let (_engine, mut session) = open_engine_session(dir.path(), 1000);
    let db = session.database().clone();
    let table = db
        .create_table("blobs", vec![Column::new("data", SqlType::Bytes)])
        .unwrap();
    let table_id = table.read().id();

    let big = vec![0xEEu8; 8192];
    db.add_row(
        &mut session,
        table_id,
        Row::new(vec![Value::Bytes(big)], 0),
    )
    .unwrap();
    assert_eq!(session.pending_lob_cleanups().len(), 1);

    session.commit().unwrap();
    assert!(session.pending_lob_cleanups().is_empty());
}

#[test]
fn rollback_keeps_hash_indexes_consistent() {
    let dir = tempdir().unwrap();
    let (_engine, mut session) = open_engine_session(dir.path(), 1000);
    let db = session.database().clone();
    let table = db
        .create_table(
            "indexed",
            vec![
                Column::new("id", SqlType::Long),
                Column::new("name", SqlType::Text),
            ],
        )
        .unwrap();
    let table_id = table.read().id();
    let hash_id = db.allocate_object_id();
    table.write().add_hash_index(hash_id, 1);

    db.add_row(&mut session, table_id, row(1, "keep")).unwrap();
    session.commit().unwrap();
    db.add_row(&mut session, table_id, row(2, "drop")).unwrap();
    session.rollback().unwrap();

    let table_guard = table.read();
    let store_lock = db.store().unwrap();
    let mut store = store_lock.write();
    let kept = table_guard
        .find_by_hash(Some(&mut *store), hash_id, &Value::Text("keep".into()))
        .unwrap();
    let dropped = table_guard
        .find_by_hash(Some(&mut *store), hash_id, &Value::Text("drop".into()))
        .unwrap();
    assert_eq!(kept.len(), 1);
    assert!(dropped.is_empty());
}
