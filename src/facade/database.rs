use super::index::Index;
use super::request::Pending;
use super::store::ObjectStore;
use super::transactions::Transaction;
use crate::connection::StoreParams;
use crate::core::{Key, Query, Result, Value};
use crate::engine::{HandleId, NativeDatabase, TransactionMode};
use crate::identity::{IdentityCache, Wrapper};
use crate::promise::Promised;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Wrapped connection.
///
/// Besides the native operations it carries one-call shortcuts that open a
/// transaction over a single store, run one operation and return its future.
/// Write shortcuts resolve only once that transaction has committed.
#[derive(Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    native: Rc<NativeDatabase>,
    cache: Rc<IdentityCache>,
}

impl Wrapper for Database {
    type Native = NativeDatabase;
    type Inner = DatabaseInner;

    fn native_id(native: &NativeDatabase) -> HandleId {
        native.id()
    }

    fn build(native: Rc<NativeDatabase>, cache: &Rc<IdentityCache>) -> Rc<DatabaseInner> {
        Rc::new(DatabaseInner {
            native,
            cache: cache.clone(),
        })
    }

    fn from_inner(inner: Rc<DatabaseInner>) -> Self {
        Self { inner }
    }
}

impl Database {
    pub fn native(&self) -> Rc<NativeDatabase> {
        self.inner.native.clone()
    }

    pub fn name(&self) -> String {
        self.inner.native.name().to_string()
    }

    pub fn version(&self) -> u32 {
        self.inner.native.version()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.native.object_store_names()
    }

    pub fn transaction(&self, names: &[&str], mode: TransactionMode) -> Result<Transaction> {
        let tx = self.inner.native.transaction(names, mode)?;
        Ok(self.inner.cache.wrap(tx))
    }

    /// Only inside an upgrade.
    pub fn create_object_store(&self, name: &str, params: StoreParams) -> Result<ObjectStore> {
        let store = self
            .inner
            .native
            .create_object_store(name, params.key_path, params.auto_increment)?;
        Ok(self.inner.cache.wrap(store))
    }

    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        self.inner.native.delete_object_store(name)
    }

    /// Close once every transaction of this connection has finished.
    pub fn close(&self) {
        self.inner.native.close()
    }

    // ------------------------------------------------------------------
    // Shortcuts
    // ------------------------------------------------------------------

    pub fn get(&self, store: &str, query: impl Into<Query>) -> Result<Pending<Option<Value>>> {
        self.on_store(store, TransactionMode::ReadOnly, |s| s.get(query))
    }

    pub fn get_key(&self, store: &str, query: impl Into<Query>) -> Result<Pending<Option<Key>>> {
        self.on_store(store, TransactionMode::ReadOnly, |s| s.get_key(query))
    }

    pub fn get_all(&self, store: &str, query: impl Into<Query>, count: Option<u32>) -> Result<Pending<Vec<Value>>> {
        self.on_store(store, TransactionMode::ReadOnly, |s| s.get_all(query, count))
    }

    pub fn get_all_keys(&self, store: &str, query: impl Into<Query>, count: Option<u32>) -> Result<Pending<Vec<Key>>> {
        self.on_store(store, TransactionMode::ReadOnly, |s| {
            s.get_all_keys(query, count)
        })
    }

    pub fn count(&self, store: &str, query: impl Into<Query>) -> Result<Pending<u64>> {
        self.on_store(store, TransactionMode::ReadOnly, |s| s.count(query))
    }

    pub fn put(&self, store: &str, value: impl Into<Value>, key: Option<Key>) -> Result<Pending<Key>> {
        self.on_store(store, TransactionMode::ReadWrite, |s| s.put(value, key))
    }

    pub fn add(&self, store: &str, value: impl Into<Value>, key: Option<Key>) -> Result<Pending<Key>> {
        self.on_store(store, TransactionMode::ReadWrite, |s| s.add(value, key))
    }

    pub fn delete(&self, store: &str, query: impl Into<Query>) -> Result<Pending<()>> {
        self.on_store(store, TransactionMode::ReadWrite, |s| s.delete(query))
    }

    pub fn clear(&self, store: &str) -> Result<Pending<()>> {
        self.on_store(store, TransactionMode::ReadWrite, ObjectStore::clear)
    }

    pub fn get_from_index(&self, store: &str, index: &str, query: impl Into<Query>) -> Result<Pending<Option<Value>>> {
        self.on_index(store, index, |i| i.get(query))
    }

    pub fn get_key_from_index(&self, store: &str, index: &str, query: impl Into<Query>) -> Result<Pending<Option<Key>>> {
        self.on_index(store, index, |i| i.get_key(query))
    }

    pub fn get_all_from_index(
        &self,
        store: &str,
        index: &str,
        query: impl Into<Query>,
        count: Option<u32>,
    ) -> Result<Pending<Vec<Value>>> {
        self.on_index(store, index, |i| i.get_all(query, count))
    }

    pub fn get_all_keys_from_index(
        &self,
        store: &str,
        index: &str,
        query: impl Into<Query>,
        count: Option<u32>,
    ) -> Result<Pending<Vec<Key>>> {
        self.on_index(store, index, |i| i.get_all_keys(query, count))
    }

    pub fn count_from_index(&self, store: &str, index: &str, query: impl Into<Query>) -> Result<Pending<u64>> {
        self.on_index(store, index, |i| i.count(query))
    }

    fn on_store<T: 'static>(
        &self,
        store: &str,
        mode: TransactionMode,
        op: impl FnOnce(&ObjectStore) -> Result<Promised<T>>,
    ) -> Result<Pending<T>> {
        let tx = self.transaction(&[store], mode)?;
        let target = tx.object_store(store)?;
        let value = op(&target)?;
        trace!(connection = %self.inner.native.id(), store, mode = %mode, "shortcut issued");
        let done = mode.is_writable().then(|| tx.done());
        Ok(Pending::new(value, done))
    }

    fn on_index<T: 'static>(
        &self,
        store: &str,
        index: &str,
        op: impl FnOnce(&Index) -> Result<Promised<T>>,
    ) -> Result<Pending<T>> {
        self.on_store(store, TransactionMode::ReadOnly, |s| op(&s.index(index)?))
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.native.id())
            .field("name", &self.inner.native.name())
            .field("version", &self.version())
            .finish()
    }
}
