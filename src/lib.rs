// ============================================================================
// awaitdb Library
// ============================================================================
//
// A future-based layer over an event-driven object store engine. Native
// handles fire success/error notifications on request objects; the wrapped
// handles in `facade` return futures instead, keep a stable one-to-one
// identity with their native counterparts, and expose cursors as pull-based
// iterators.
//
// ============================================================================

pub mod connection;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod facade;
pub mod identity;
pub mod promise;

pub use connection::{
    CacheConfig, DeleteOptions, Factory, IndexParams, OpenOptions, StoreParams, VersionChange,
};
pub use core::{DbError, Key, KeyPath, KeyRange, Query, Result, Value};
pub use dispatch::{classify, invoke, Arg, OpClass, Outcome};
pub use engine::{CursorDirection, Engine, TransactionMode, TransactionState};
pub use facade::{
    Cursor, CursorIterator, CursorPosition, Database, Done, Index, ObjectStore, Pending, Resolved,
    Transaction, WrappedRequest,
};
pub use identity::{HandleKind, IdentityCache, NativeHandle, Wrapped};
pub use promise::{promisify, promisify_call, Promised};

#[cfg(test)]
mod tests {
    use super::*;

    fn open_kv(engine: &Engine, factory: &Factory) -> Database {
        let open = factory
            .open(
                "app",
                OpenOptions::new().upgrade(|db, _, _| {
                    db.create_object_store("kv", StoreParams::new())?;
                    Ok(())
                }),
            )
            .unwrap();
        engine.block_on(open).unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let db = open_kv(&engine, &factory);

        let key = engine
            .block_on(db.put("kv", 1, Some(Key::from("counter"))).unwrap())
            .unwrap();
        assert_eq!(key, Key::from("counter"));

        let value = engine.block_on(db.get("kv", "counter").unwrap()).unwrap();
        assert_eq!(value, Some(Value::from(1)));
    }

    #[test]
    fn test_get_all_keys_ascending() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let db = open_kv(&engine, &factory);

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
    }
}
