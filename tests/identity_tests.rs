/// Identity tests
///
/// One wrapper per native handle, and wrap/unwrap through the factory.
/// Run with: cargo test --test identity_tests
use awaitdb::{
    CacheConfig, Database, DbError, Engine, Factory, IndexParams, Key, NativeHandle, OpenOptions,
    Resolved, StoreParams, TransactionMode, Value, Wrapped,
};
use awaitdb::engine::ReadyState;

fn open_app(engine: &Engine, factory: &Factory) -> Database {
    let open = factory
        .open(
            "ids",
            OpenOptions::new().upgrade(|db, _, _| {
                let store = db.create_object_store("kv", StoreParams::new())?;
                store.create_index("by_value", "v", IndexParams::new())?;
                Ok(())
            }),
        )
        .unwrap();
    engine.block_on(open).unwrap()
}

#[test]
fn test_wrap_is_stable_for_every_kind() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("kv").unwrap();
    let index = store.index("by_value").unwrap();

    let natives = [
        NativeHandle::Database(db.native()),
        NativeHandle::Transaction(tx.native()),
        NativeHandle::ObjectStore(store.native()),
        NativeHandle::Index(index.native()),
    ];
    for native in natives {
        let first = factory.wrap(native.clone());
        let second = factory.wrap(native.clone());
        assert_eq!(first, second);
        assert_eq!(factory.unwrap(&first), native);
    }

    assert_eq!(factory.wrap(NativeHandle::Database(db.native())), Wrapped::Database(db.clone()));
    assert_eq!(tx.object_store("kv").unwrap(), store);
    assert_eq!(store.index("by_value").unwrap(), index);
    assert_eq!(index.object_store(), store);
    engine.settle().unwrap();
}

#[test]
fn test_distinct_natives_get_distinct_wrappers() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let a = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
    let b = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
    assert_ne!(a, b);
    assert_ne!(a.object_store("kv").unwrap(), b.object_store("kv").unwrap());
    engine.settle().unwrap();
}

#[test]
fn test_wrapped_request_is_shared_and_stable() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);
    engine
        .block_on(db.put("kv", "stored", Some(Key::from("k"))).unwrap())
        .unwrap();

    let tx = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
    let store = tx.store().unwrap();
    let read = store.get("k").unwrap();

    let wrapped = factory.wrap(NativeHandle::Request(read.request()));
    assert_eq!(wrapped, factory.wrap(NativeHandle::Request(read.request())));
    let Wrapped::Request(request) = wrapped else {
        panic!("expected a request wrapper");
    };
    assert_eq!(request.ready_state(), ReadyState::Pending);
    assert_eq!(request.source(), Some(Wrapped::ObjectStore(store.clone())));
    assert_eq!(request.transaction(), Some(tx.clone()));

    let expected = Resolved::Value(Some(Value::from("stored")));
    assert_eq!(engine.block_on(request.clone()).unwrap(), expected);
    assert_eq!(engine.block_on(request.clone()).unwrap(), expected);
    assert_eq!(engine.block_on(read).unwrap(), Some(Value::from("stored")));
    assert_eq!(request.result(), Some(expected));
    assert_eq!(request.error(), None);
}

#[test]
fn test_open_request_resolves_to_the_connection_wrapper() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let open = factory.open("ids", OpenOptions::new()).unwrap();
    let request = factory.wrap(NativeHandle::Request(open.request()));
    assert_eq!(request, factory.wrap(NativeHandle::Request(open.request())));

    let db = engine.block_on(open).unwrap();
    let Wrapped::Request(request) = request else {
        panic!("expected a request wrapper");
    };
    assert_eq!(request.source(), None);
    assert_eq!(request.result(), Some(Resolved::Database(db)));
}

#[test]
fn test_failed_request_exposes_error() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let tx = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
    let store = tx.store().unwrap();
    store.add(1, Some(Key::from("dup"))).unwrap();
    let second = store.add(2, Some(Key::from("dup"))).unwrap();
    let Wrapped::Request(request) = factory.wrap(NativeHandle::Request(second.request())) else {
        panic!("expected a request wrapper");
    };

    assert!(matches!(engine.block_on(second), Err(DbError::ConstraintViolation(_))));
    assert!(matches!(engine.block_on(request.clone()), Err(DbError::ConstraintViolation(_))));
    assert_eq!(request.result(), None);
    assert_eq!(request.error().map(|e| e.name()), Some("ConstraintError"));
}

#[test]
fn test_dropped_wrappers_are_swept() {
    let engine = Engine::new();
    let factory = Factory::with_config(&engine, CacheConfig::new().sweep_threshold(4));
    let db = open_app(&engine, &factory);
    let cache = factory.cache_for(&db.native());

    for _ in 0..10 {
        let tx = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
        drop(tx);
    }
    engine.settle().unwrap();
    cache.sweep();
    // only the connection wrapper is still held
    assert_eq!(cache.live_len(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_closing_tears_down_the_cache() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);
    let cache = factory.cache_for(&db.native());
    assert!(!cache.is_empty());

    db.close();
    engine.settle().unwrap();
    assert!(cache.is_torn_down());
    assert!(cache.is_empty());

    // a new connection gets a fresh cache
    let again = engine.block_on(factory.open("ids", OpenOptions::new()).unwrap()).unwrap();
    let fresh = factory.cache_for(&again.native());
    assert!(!fresh.is_torn_down());
    assert_ne!(fresh.connection(), cache.connection());
}

#[test]
fn test_wrapping_after_close_builds_a_fresh_wrapper() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);
    let native = NativeHandle::Database(db.native());
    assert_eq!(factory.wrap(native.clone()), Wrapped::Database(db.clone()));

    db.close();
    engine.settle().unwrap();

    let after = factory.wrap(native.clone());
    assert_ne!(after, Wrapped::Database(db.clone()));
    assert_eq!(factory.unwrap(&after), native);
}
