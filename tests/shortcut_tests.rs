/// Connection shortcut tests
///
/// One-call reads and writes issued straight on a connection.
/// Run with: cargo test --test shortcut_tests
use awaitdb::{
    Database, DbError, Engine, Factory, IndexParams, Key, KeyRange, OpenOptions, Query,
    StoreParams, Value,
};

fn open_app(engine: &Engine, factory: &Factory) -> Database {
    let open = factory
        .open(
            "app",
            OpenOptions::new().upgrade(|db, _, _| {
                db.create_object_store("kv", StoreParams::new())?;
                let people = db.create_object_store("people", StoreParams::new().key_path("id"))?;
                people.create_index("by_email", "email", IndexParams::new().unique(true))?;
                people.create_index("by_city", "city", IndexParams::new())?;
                Ok(())
            }),
        )
        .unwrap();
    engine.block_on(open).unwrap()
}

fn person(id: i64, email: &str, city: &str) -> Value {
    Value::object([
        ("id", Value::from(id)),
        ("email", Value::from(email)),
        ("city", Value::from(city)),
    ])
}

fn seed_people(engine: &Engine, db: &Database) {
    for (id, email, city) in [(1, "ann@x", "Oslo"), (2, "bob@x", "Rome"), (3, "cid@x", "Oslo")] {
        engine
            .block_on(db.put("people", person(id, email, city), None).unwrap())
            .unwrap();
    }
}

#[test]
fn test_put_then_get_round_trip() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let key = engine
        .block_on(db.put("kv", 42, Some(Key::from("answer"))).unwrap())
        .unwrap();
    assert_eq!(key, Key::from("answer"));

    let value = engine.block_on(db.get("kv", "answer").unwrap()).unwrap();
    assert_eq!(value, Some(Value::from(42)));
}

#[test]
fn test_get_of_missing_key_is_none() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    let value = engine.block_on(db.get("kv", "nothing").unwrap()).unwrap();
    assert_eq!(value, None);
}

#[test]
fn test_get_all_keys_in_key_order() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    engine
        .block_on(db.put("kv", "second", Some(Key::from("b"))).unwrap())
        .unwrap();
    engine
        .block_on(db.put("kv", "first", Some(Key::from("a"))).unwrap())
        .unwrap();

    let keys = engine
        .block_on(db.get_all_keys("kv", Query::All, None).unwrap())
        .unwrap();
    assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);

    let values = engine
        .block_on(db.get_all("kv", Query::All, Some(1)).unwrap())
        .unwrap();
    assert_eq!(values, vec![Value::from("first")]);
}

#[test]
fn test_count_delete_and_clear() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    for i in 1..=4 {
        engine
            .block_on(db.put("kv", i, Some(Key::from(i))).unwrap())
            .unwrap();
    }
    let range = KeyRange::bound(2, 3, false, false).unwrap();
    assert_eq!(engine.block_on(db.count("kv", range).unwrap()).unwrap(), 2);

    engine.block_on(db.delete("kv", 1).unwrap()).unwrap();
    assert_eq!(engine.block_on(db.count("kv", Query::All).unwrap()).unwrap(), 3);

    engine.block_on(db.clear("kv").unwrap()).unwrap();
    assert_eq!(engine.block_on(db.count("kv", Query::All).unwrap()).unwrap(), 0);
}

#[test]
fn test_get_key_returns_first_match_in_range() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    for key in ["apple", "banana", "cherry"] {
        engine
            .block_on(db.put("kv", key, Some(Key::from(key))).unwrap())
            .unwrap();
    }
    let range = KeyRange::lower_bound("b", false).unwrap();
    let key = engine.block_on(db.get_key("kv", range).unwrap()).unwrap();
    assert_eq!(key, Some(Key::from("banana")));
}

#[test]
fn test_index_shortcuts() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);
    seed_people(&engine, &db);

    let bob = engine
        .block_on(db.get_from_index("people", "by_email", "bob@x").unwrap())
        .unwrap();
    assert_eq!(bob, Some(person(2, "bob@x", "Rome")));

    let key = engine
        .block_on(db.get_key_from_index("people", "by_email", "cid@x").unwrap())
        .unwrap();
    assert_eq!(key, Some(Key::from(3)));

    let oslo = engine
        .block_on(db.get_all_keys_from_index("people", "by_city", "Oslo", None).unwrap())
        .unwrap();
    assert_eq!(oslo, vec![Key::from(1), Key::from(3)]);

    let everyone = engine
        .block_on(db.get_all_from_index("people", "by_city", Query::All, None).unwrap())
        .unwrap();
    assert_eq!(everyone.len(), 3);
    assert_eq!(everyone[2], person(2, "bob@x", "Rome"));

    let count = engine
        .block_on(db.count_from_index("people", "by_city", "Oslo").unwrap())
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn test_add_of_existing_key_rejects_and_keeps_data() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    engine
        .block_on(db.add("kv", "original", Some(Key::from("k"))).unwrap())
        .unwrap();
    let duplicate = engine.block_on(db.add("kv", "other", Some(Key::from("k"))).unwrap());
    assert!(matches!(duplicate, Err(DbError::ConstraintViolation(_))));

    let value = engine.block_on(db.get("kv", "k").unwrap()).unwrap();
    assert_eq!(value, Some(Value::from("original")));
}

#[test]
fn test_unique_index_violation_rejects_write() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);
    seed_people(&engine, &db);

    let clash = engine.block_on(db.put("people", person(4, "ann@x", "Oslo"), None).unwrap());
    assert!(matches!(clash, Err(DbError::ConstraintViolation(_))));
    assert_eq!(
        engine.block_on(db.count("people", Query::All).unwrap()).unwrap(),
        3
    );
}

#[test]
fn test_shortcut_on_missing_store_fails_synchronously() {
    let engine = Engine::new();
    let factory = Factory::new(&engine);
    let db = open_app(&engine, &factory);

    assert!(matches!(db.get("nope", "k"), Err(DbError::NotFound(_))));
    assert!(matches!(
        db.get_from_index("people", "by_age", 3),
        Err(DbError::NotFound(_))
    ));
}
