/// Connection lifecycle tests
///
/// Upgrades, version change notifications, deletion and forced closes.
/// Run with: cargo test --test lifecycle_tests
use awaitdb::{
    Database, DbError, DeleteOptions, Engine, Factory, Key, OpenOptions, StoreParams,
    TransactionMode, VersionChange, Value,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn open_v1(engine: &Engine, factory: &Factory) -> Database {
    let open = factory
        .open(
            "app",
            OpenOptions::new().version(1).upgrade(|db, _, _| {
                db.create_object_store("a", StoreParams::new())?;
                Ok(())
            }),
        )
        .unwrap();
    engine.block_on(open).unwrap()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn test_upgrade_sees_old_and_new_versions() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    open_v1(&engine, &factory).close();

    let changes: Rc<RefCell<Vec<VersionChange>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = changes.clone();
    let open = factory
        .open(
            "app",
            OpenOptions::new().version(3).upgrade(move |db, change, tx| {
                seen.borrow_mut().push(change);
                assert_eq!(tx.mode(), TransactionMode::VersionChange);
                db.create_object_store("b", StoreParams::new().auto_increment(true))?;
                tx.object_store("a")?.put("seeded", Some(Key::from("s")))?;
                Ok(())
            }),
        )
        .unwrap();
    let db = engine.block_on(open).unwrap();

    assert_eq!(db.version(), 3);
    assert_eq!(sorted(db.object_store_names()), vec!["a", "b"]);
    let change = changes.borrow()[0];
    assert_eq!(change.old_version, 1);
    assert_eq!(change.new_version, Some(3));
    assert_eq!(
        engine.block_on(db.get("a", "s").unwrap()).unwrap(),
        Some(Value::from("seeded"))
    );
    assert_eq!(factory.databases(), vec![("app".to_string(), 3)]);
}

#[test]
fn test_lower_version_is_rejected() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    open_v1(&engine, &factory).close();
    engine
        .block_on(factory.open("app", OpenOptions::new().version(2)).unwrap())
        .unwrap()
        .close();

    let older = engine.block_on(factory.open("app", OpenOptions::new().version(1)).unwrap());
    assert!(matches!(older, Err(DbError::VersionError(_))));
}

#[test]
fn test_failed_upgrade_keeps_previous_schema() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    open_v1(&engine, &factory).close();

    let open = factory
        .open(
            "app",
            OpenOptions::new().version(2).upgrade(|db, _, _| {
                db.delete_object_store("a")?;
                Err(DbError::DataError("migration failed".into()))
            }),
        )
        .unwrap();
    assert!(matches!(engine.block_on(open), Err(DbError::Aborted(_))));
    assert_eq!(factory.databases(), vec![("app".to_string(), 1)]);

    let db = engine
        .block_on(factory.open("app", OpenOptions::new()).unwrap())
        .unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.object_store_names(), vec!["a".to_string()]);
}

#[test]
fn test_failed_first_open_leaves_no_database() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);

    let open = factory
        .open(
            "ghost",
            OpenOptions::new().upgrade(|db, _, _| {
                db.create_object_store("a", StoreParams::new())?;
                Err(DbError::DataError("never mind".into()))
            }),
        )
        .unwrap();
    assert!(matches!(engine.block_on(open), Err(DbError::Aborted(_))));
    assert!(factory.databases().is_empty());

    // a later open creates it from scratch
    let db = engine
        .block_on(factory.open("ghost", OpenOptions::new()).unwrap())
        .unwrap();
    assert_eq!(db.version(), 1);
    assert!(db.object_store_names().is_empty());
}

#[test]
fn test_upgrade_waits_for_open_connections() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let log = events.clone();
    let open = factory
        .open(
            "app",
            OpenOptions::new()
                .upgrade(|db, _, _| {
                    db.create_object_store("a", StoreParams::new())?;
                    Ok(())
                })
                .blocking(move |change| {
                    log.borrow_mut()
                        .push(format!("blocking {}->{:?}", change.old_version, change.new_version))
                }),
        )
        .unwrap();
    let first = engine.block_on(open).unwrap();

    let log = events.clone();
    let upgrade = factory
        .open(
            "app",
            OpenOptions::new().version(2).blocked(move |change| {
                log.borrow_mut()
                    .push(format!("blocked {}->{:?}", change.old_version, change.new_version))
            }),
        )
        .unwrap();
    engine.settle().unwrap();
    assert_eq!(
        *events.borrow(),
        vec!["blocking 1->Some(2)".to_string(), "blocked 1->Some(2)".to_string()]
    );

    first.close();
    let second = engine.block_on(upgrade).unwrap();
    assert_eq!(second.version(), 2);
    assert_eq!(events.borrow().len(), 2);
}

#[test]
fn test_blocking_callback_can_close_to_unblock() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let slot: Rc<RefCell<Option<Database>>> = Rc::new(RefCell::new(None));
    let blocked = Rc::new(Cell::new(false));

    let holder = slot.clone();
    let open = factory
        .open(
            "app",
            OpenOptions::new().blocking(move |_| {
                if let Some(db) = holder.borrow_mut().take() {
                    db.close();
                }
            }),
        )
        .unwrap();
    *slot.borrow_mut() = Some(engine.block_on(open).unwrap());

    let flag = blocked.clone();
    let upgrade = factory
        .open("app", OpenOptions::new().version(2).blocked(move |_| flag.set(true)))
        .unwrap();
    let db = engine.block_on(upgrade).unwrap();
    assert_eq!(db.version(), 2);
    assert!(!blocked.get());
}

#[test]
fn test_delete_waits_then_removes() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_v1(&engine, &factory);
    engine
        .block_on(db.put("a", 1, Some(Key::from("k"))).unwrap())
        .unwrap();

    let blocked = Rc::new(Cell::new(0));
    let count = blocked.clone();
    let delete = factory
        .delete(
            "app",
            DeleteOptions::new().blocked(move |change| {
                assert_eq!(change.new_version, None);
                count.set(count.get() + 1);
            }),
        )
        .unwrap();
    engine.settle().unwrap();
    assert_eq!(blocked.get(), 1);
    assert_eq!(factory.databases().len(), 1);

    db.close();
    engine.block_on(delete).unwrap();
    assert!(factory.databases().is_empty());

    // deleting what does not exist succeeds
    engine
        .block_on(factory.delete("app", DeleteOptions::new()).unwrap())
        .unwrap();
}

#[test]
fn test_terminate_aborts_work_and_notifies() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let terminated = Rc::new(Cell::new(false));

    let flag = terminated.clone();
    let open = factory
        .open(
            "app",
            OpenOptions::new()
                .upgrade(|db, _, _| {
                    db.create_object_store("a", StoreParams::new())?;
                    Ok(())
                })
                .terminated(move || flag.set(true)),
        )
        .unwrap();
    let db = engine.block_on(open).unwrap();
    let cache = factory.cache_for(&db.native());

    let tx = db.transaction(&["a"], TransactionMode::ReadWrite).unwrap();
    let write = tx.store().unwrap().put(1, Some(Key::from("k"))).unwrap();
    engine.terminate("app");

    assert!(terminated.get());
    assert!(cache.is_torn_down());
    assert!(matches!(engine.block_on(write), Err(DbError::Aborted(_))));
    assert!(matches!(engine.block_on(tx.done()), Err(DbError::Aborted(_))));
    assert!(matches!(
        db.transaction(&["a"], TransactionMode::ReadOnly),
        Err(DbError::InvalidState(_))
    ));
}

#[test]
fn test_close_waits_for_running_transactions() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_v1(&engine, &factory);

    let write = db.put("a", "last", Some(Key::from("k"))).unwrap();
    db.close();
    engine.block_on(write).unwrap();

    let again = engine
        .block_on(factory.open("app", OpenOptions::new()).unwrap())
        .unwrap();
    assert_eq!(
        engine.block_on(again.get("a", "k").unwrap()).unwrap(),
        Some(Value::from("last"))
    );
}
