pub mod config;

pub use config::{
    CacheConfig, DeleteOptions, IndexParams, OpenOptions, StoreParams, TerminatedCallback,
    UpgradeCallback, VersionChange, VersionChangeCallback,
};

use crate::core::{DbError, Result};
use crate::engine::{Engine, HandleId, NativeDatabase, NativeRequest, RequestResult, RequestSource};
use crate::facade::{Database, Transaction};
use crate::identity::{IdentityCache, NativeHandle, Wrapped};
use crate::promise::{self, promisify, Promised};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Entry point of the wrapping layer.
///
/// Opens and deletes databases with future-returning calls and owns one
/// identity cache per connection. A connection's cache is torn down when the
/// connection closes.
///
/// ```ignore
/// let engine = Engine::new();
/// let factory = Factory::new(&engine);
/// let db = engine.block_on(factory.open("app", OpenOptions::new().upgrade(|db, _, _| {
///     db.create_object_store("kv", StoreParams::new())?;
///     Ok(())
/// }))?)?;
/// engine.block_on(db.put("kv", 1, Some("counter".into()))?)?;
/// ```
#[derive(Clone)]
pub struct Factory {
    inner: Rc<FactoryInner>,
}

struct FactoryInner {
    engine: Engine,
    config: CacheConfig,
    caches: RefCell<HashMap<HandleId, Weak<IdentityCache>>>,
    /// Holds factory-level requests, which belong to no connection.
    detached: Rc<IdentityCache>,
}

impl Factory {
    pub fn new(engine: &Engine) -> Self {
        Self::with_config(engine, CacheConfig::default())
    }

    pub fn with_config(engine: &Engine, config: CacheConfig) -> Self {
        let inner = Rc::new(FactoryInner {
            engine: engine.clone(),
            detached: Rc::new(IdentityCache::new(None, config.clone())),
            config,
            caches: RefCell::new(HashMap::new()),
        });
        let owner = Rc::downgrade(&inner);
        inner.detached.set_router(Box::new(move |connection| {
            owner
                .upgrade()
                .map(|inner| Factory { inner }.cache_for(connection))
        }));
        Self { inner }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Open a connection, upgrading the database first when `options.version`
    /// is above the current one.
    pub fn open(&self, name: &str, options: OpenOptions) -> Result<Promised<Database>> {
        options.validate().map_err(DbError::TypeMismatch)?;
        let OpenOptions {
            version,
            upgrade,
            blocked,
            blocking,
            terminated,
        } = options;

        let request = self.inner.engine.open(name, version)?;
        if let Some(upgrade) = upgrade {
            let factory = self.clone();
            let weak = Rc::downgrade(&request);
            request.add_upgrade_listener(Box::new(move |event| {
                if let Some(request) = weak.upgrade() {
                    factory.run_upgrade(&request, *event, upgrade);
                }
            }));
        }
        if let Some(mut blocked) = blocked {
            request.add_blocked_listener(Box::new(move |event| blocked(*event)));
        }

        let factory = self.clone();
        Ok(promisify(request, move |result| match result {
            RequestResult::Database(native) => Ok(factory.connect(native.clone(), blocking, terminated)),
            other => Err(DbError::TypeMismatch(format!(
                "expected a connection, got {:?}",
                other
            ))),
        }))
    }

    /// Delete a database once every connection to it has closed.
    pub fn delete(&self, name: &str, options: DeleteOptions) -> Result<Promised<()>> {
        let request = self.inner.engine.delete_database(name)?;
        if let Some(mut blocked) = options.blocked {
            request.add_blocked_listener(Box::new(move |event| blocked(*event)));
        }
        Ok(promisify(request, promise::decode_unit))
    }

    /// Names and versions of every existing database.
    pub fn databases(&self) -> Vec<(String, u32)> {
        self.inner.engine.databases()
    }

    /// The wrapper of `native`, the same one for as long as it lives.
    ///
    /// Once a connection has closed its cache is gone: wrapping one of its
    /// handles builds a fresh, unregistered wrapper, so after `close()`
    /// `wrap(unwrap(db))` no longer equals `db`.
    pub fn wrap(&self, native: NativeHandle) -> Wrapped {
        let cache = match &native {
            NativeHandle::Request(request) if matches!(request.source(), RequestSource::Factory) => {
                self.inner.detached.clone()
            }
            _ => match native.connection() {
                Some(connection) => self.cache_for(&connection),
                None => self.inner.detached.clone(),
            },
        };
        cache.wrap_native(native)
    }

    /// The native handle behind `wrapped`.
    pub fn unwrap(&self, wrapped: &Wrapped) -> NativeHandle {
        wrapped.unwrap_native()
    }

    /// The identity cache of `connection`, created on first use.
    pub fn cache_for(&self, connection: &Rc<NativeDatabase>) -> Rc<IdentityCache> {
        let id = connection.id();
        if let Some(cache) = self.inner.caches.borrow().get(&id).and_then(Weak::upgrade) {
            return cache;
        }

        let cache = Rc::new(IdentityCache::new(Some(id), self.inner.config.clone()));
        {
            let mut caches = self.inner.caches.borrow_mut();
            caches.retain(|_, cache| cache.strong_count() > 0);
            caches.insert(id, Rc::downgrade(&cache));
        }
        debug!(connection = %id, "identity cache created");

        let weak_cache = Rc::downgrade(&cache);
        let registry = Rc::downgrade(&self.inner);
        connection.add_closed_hook(Box::new(move || {
            if let Some(cache) = weak_cache.upgrade() {
                cache.teardown();
            }
            if let Some(inner) = registry.upgrade() {
                inner.caches.borrow_mut().remove(&id);
            }
        }));
        cache
    }

    fn connect(
        &self,
        native: Rc<NativeDatabase>,
        blocking: Option<VersionChangeCallback>,
        terminated: Option<TerminatedCallback>,
    ) -> Database {
        if let Some(mut blocking) = blocking {
            native.add_versionchange_listener(Box::new(move |event| blocking(*event)));
        }
        if let Some(terminated) = terminated {
            native.add_close_listener(terminated);
        }
        self.cache_for(&native).wrap(native)
    }

    fn run_upgrade(&self, request: &Rc<NativeRequest>, change: VersionChange, upgrade: UpgradeCallback) {
        let (Some(RequestResult::Database(native)), Some(tx)) = (request.result(), request.transaction())
        else {
            return;
        };
        let cache = self.cache_for(&native);
        let db: Database = cache.wrap(native);
        let wrapped: Transaction = cache.wrap(tx.clone());
        if let Err(error) = upgrade(&db, change, &wrapped) {
            warn!(name = %db.name(), error = %error, "upgrade callback failed");
            tx.abort_with(Some(error));
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("caches", &self.inner.caches.borrow().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransactionMode;

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
    fn test_open_runs_upgrade() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let db = open_kv(&engine, &factory);
        assert_eq!(db.version(), 1);
        assert_eq!(db.object_store_names(), vec!["kv".to_string()]);
    }

    #[test]
    fn test_wrap_returns_same_wrapper() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let db = open_kv(&engine, &factory);
        let native = NativeHandle::Database(db.native());
        assert_eq!(factory.wrap(native.clone()), Wrapped::Database(db.clone()));
        assert_eq!(factory.unwrap(&factory.wrap(native.clone())), native);
    }

    #[test]
    fn test_failed_upgrade_aborts_open() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let open = factory
            .open(
                "app",
                OpenOptions::new().upgrade(|_, _, _| Err(DbError::DataError("nope".into()))),
            )
            .unwrap();
        assert!(matches!(engine.block_on(open), Err(DbError::Aborted(_))));
    }

    #[test]
    fn test_version_zero_is_rejected() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let result = factory.open("app", OpenOptions::new().version(0));
        assert!(matches!(result, Err(DbError::TypeMismatch(_))));
    }

    #[test]
    fn test_cache_torn_down_on_close() {
        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let db = open_kv(&engine, &factory);
        let cache = factory.cache_for(&db.native());
        let tx = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
        assert!(cache.live_len() >= 2);
        drop(tx);
        db.close();
        engine.settle().unwrap();
        assert!(cache.is_torn_down());
        assert!(cache.is_empty());
    }
}
