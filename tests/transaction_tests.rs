/// Transaction tests
///
/// Completion futures, auto-commit and the active window of a transaction.
/// Run with: cargo test --test transaction_tests
use awaitdb::{
    Database, DbError, Engine, Factory, Key, OpenOptions, Query, StoreParams, TransactionMode,
    TransactionState, Value,
};

fn open_app(engine: &Engine, factory: &Factory) -> Database {
    let open = factory
        .open(
            "tx",
            OpenOptions::new().upgrade(|db, _, _| {
                db.create_object_store("kv", StoreParams::new())?;
                db.create_object_store("log", StoreParams::new().auto_increment(true))?;
                Ok(())
            }),
        )
        .unwrap();
    engine.block_on(open).unwrap()
}

#[test]
fn test_done_resolves_after_commit() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    let store = tx.store().unwrap();
    store.put("one", Some(Key::from(1))).unwrap();
    store.put("two", Some(Key::from(2))).unwrap();
    engine.block_on(tx.done()).unwrap();

    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(
        engine.block_on(db.count("kv", Query::All).unwrap()).unwrap(),
        2
    );
}

#[test]
fn test_done_rejects_with_the_failing_error() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    engine
        .block_on(async {
            let store = tx.object_store("kv")?;
            let first = store.add("a", Some(Key::from("k")))?;
            let second = store.add("b", Some(Key::from("k")))?;
            let done = tx.done();

            assert_eq!(first.await?, Key::from("k"));
            assert!(matches!(second.await, Err(DbError::ConstraintViolation(_))));
            assert!(matches!(done.await, Err(DbError::ConstraintViolation(_))));
            Ok::<_, DbError>(())
        })
        .unwrap();

    assert_eq!(tx.state(), TransactionState::Aborted);
    assert_eq!(tx.error().map(|e| e.name()), Some("ConstraintError"));
    // the first write is reverted with the rest
    assert_eq!(engine.block_on(db.get("kv", "k").unwrap()).unwrap(), None);
}

#[test]
fn test_done_observed_late_still_settles() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    tx.store().unwrap().put(1, Some(Key::from("x"))).unwrap();
    engine.settle().unwrap();

    assert_eq!(tx.state(), TransactionState::Committed);
    engine.block_on(tx.done()).unwrap();
    engine.block_on(tx.done()).unwrap();
}

#[test]
fn test_explicit_abort_reverts_and_rejects() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    let write = tx.store().unwrap().put("v", Some(Key::from("gone"))).unwrap();
    tx.abort().unwrap();

    assert!(matches!(engine.block_on(write), Err(DbError::Aborted(_))));
    assert!(matches!(engine.block_on(tx.done()), Err(DbError::Aborted(_))));
    assert!(matches!(tx.abort(), Err(DbError::InvalidState(_))));
    assert_eq!(engine.block_on(db.get("kv", "gone").unwrap()).unwrap(), None);
}

#[test]
fn test_transaction_inactive_after_unrelated_await() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    engine
        .block_on(async {
            let tx = db.transaction(&["kv"], TransactionMode::ReadWrite)?;
            let store = tx.object_store("kv")?;

            // a read in another transaction takes at least one turn
            db.get("log", 1)?.await?;

            let late = store.put(1, Some(Key::from("late")));
            assert!(matches!(late, Err(DbError::TransactionInactive(_))));
            tx.done().await
        })
        .unwrap();
}

#[test]
fn test_awaiting_own_requests_keeps_transaction_alive() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let total = engine
        .block_on(async {
            let tx = db.transaction(&["kv", "log"], TransactionMode::ReadWrite)?;
            let kv = tx.object_store("kv")?;
            let log = tx.object_store("log")?;

            kv.put(1, Some(Key::from("n")))?.await?;
            let current = kv.get("n")?.await?.and_then(|v| v.as_i64()).unwrap_or(0);
            kv.put(current + 1, Some(Key::from("n")))?.await?;
            let entry = log.add("incremented", None)?.await?;
            assert_eq!(entry, Key::from(1));

            tx.done().await?;
            Ok::<_, DbError>(current + 1)
        })
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(
        engine.block_on(db.get("kv", "n").unwrap()).unwrap(),
        Some(Value::from(2))
    );
}

#[test]
fn test_read_only_write_fails_synchronously() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
    let store = tx.store().unwrap();
    assert!(matches!(
        store.put(1, Some(Key::from("k"))),
        Err(DbError::ReadOnly(_))
    ));
    assert!(matches!(store.clear(), Err(DbError::ReadOnly(_))));
    engine.block_on(tx.done()).unwrap();
}

#[test]
fn test_commit_stops_new_requests() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    let store = tx.store().unwrap();
    let write = store.put("kept", Some(Key::from("k"))).unwrap();
    tx.commit().unwrap();
    assert!(matches!(
        store.put("dropped", Some(Key::from("j"))),
        Err(DbError::TransactionInactive(_))
    ));

    engine.block_on(write).unwrap();
    engine.block_on(tx.done()).unwrap();
    assert_eq!(
        engine.block_on(db.get_all_keys("kv", Query::All, None).unwrap()).unwrap(),
        vec![Key::from("k")]
    );
}

#[test]
fn test_overlapping_writers_run_in_creation_order() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let first = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    let second = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    assert_eq!(second.state(), TransactionState::Waiting);

    // issued first, but its transaction waits for the earlier one
    second.store().unwrap().put("second", Some(Key::from("k"))).unwrap();
    first.store().unwrap().put("first", Some(Key::from("k"))).unwrap();

    engine.block_on(second.done()).unwrap();
    assert_eq!(first.state(), TransactionState::Committed);
    assert_eq!(
        engine.block_on(db.get("kv", "k").unwrap()).unwrap(),
        Some(Value::from("second"))
    );
}

#[test]
fn test_store_accessor_and_back_references() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let single = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
    let store = single.store().unwrap();
    assert_eq!(store, single.object_store("kv").unwrap());
    assert_eq!(store.transaction(), single);
    assert_eq!(single.db(), db);

    let pair = db.transaction(&["kv", "log"], TransactionMode::ReadOnly).unwrap();
    assert!(pair.store().is_none());
    assert_eq!(
        pair.object_store_names(),
        vec!["kv".to_string(), "log".to_string()]
    );
    engine.settle().unwrap();
}
