use super::cursor::{decode_cursor, Cursor};
use super::index::Index;
use super::iterate::CursorIterator;
use super::transactions::Transaction;
use crate::connection::IndexParams;
use crate::core::{Key, KeyPath, Query, Result, Value};
use crate::engine::{CursorDirection, HandleId, NativeObjectStore};
use crate::identity::{IdentityCache, Wrapper};
use crate::promise::{self, promisify_call, Promised};
use std::fmt;
use std::rc::Rc;

/// Wrapped object store.
#[derive(Clone)]
pub struct ObjectStore {
    inner: Rc<StoreInner>,
}

pub(crate) struct StoreInner {
    native: Rc<NativeObjectStore>,
    cache: Rc<IdentityCache>,
}

impl Wrapper for ObjectStore {
    type Native = NativeObjectStore;
    type Inner = StoreInner;

    fn native_id(native: &NativeObjectStore) -> HandleId {
        native.id()
    }

    fn build(native: Rc<NativeObjectStore>, cache: &Rc<IdentityCache>) -> Rc<StoreInner> {
        Rc::new(StoreInner {
            native,
            cache: cache.clone(),
        })
    }

    fn from_inner(inner: Rc<StoreInner>) -> Self {
        Self { inner }
    }
}

impl ObjectStore {
    pub fn native(&self) -> Rc<NativeObjectStore> {
        self.inner.native.clone()
    }

    pub fn name(&self) -> String {
        self.inner.native.name().to_string()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.inner.native.key_path()
    }

    pub fn auto_increment(&self) -> bool {
        self.inner.native.auto_increment()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.inner.native.index_names()
    }

    pub fn transaction(&self) -> Transaction {
        self.inner.cache.wrap(self.inner.native.transaction())
    }

    pub fn index(&self, name: &str) -> Result<Index> {
        let index = self.inner.native.index(name)?;
        Ok(self.inner.cache.wrap(index))
    }

    /// Only inside an upgrade.
    pub fn create_index(&self, name: &str, key_path: impl Into<KeyPath>, params: IndexParams) -> Result<Index> {
        let index = self
            .inner
            .native
            .create_index(name, key_path.into(), params.unique, params.multi_entry)?;
        Ok(self.inner.cache.wrap(index))
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.inner.native.delete_index(name)
    }

    pub fn get(&self, query: impl Into<Query>) -> Result<Promised<Option<Value>>> {
        promisify_call(|| self.inner.native.get(query.into()), promise::decode_value)
    }

    pub fn get_key(&self, query: impl Into<Query>) -> Result<Promised<Option<Key>>> {
        promisify_call(|| self.inner.native.get_key(query.into()), promise::decode_key)
    }

    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> Result<Promised<Vec<Value>>> {
        promisify_call(
            || self.inner.native.get_all(query.into(), count),
            promise::decode_values,
        )
    }

    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> Result<Promised<Vec<Key>>> {
        promisify_call(
            || self.inner.native.get_all_keys(query.into(), count),
            promise::decode_keys,
        )
    }

    pub fn count(&self, query: impl Into<Query>) -> Result<Promised<u64>> {
        promisify_call(|| self.inner.native.count(query.into()), promise::decode_count)
    }

    pub fn put(&self, value: impl Into<Value>, key: Option<Key>) -> Result<Promised<Key>> {
        promisify_call(
            || self.inner.native.put(value.into(), key),
            promise::decode_written_key,
        )
    }

    pub fn add(&self, value: impl Into<Value>, key: Option<Key>) -> Result<Promised<Key>> {
        promisify_call(
            || self.inner.native.add(value.into(), key),
            promise::decode_written_key,
        )
    }

    pub fn delete(&self, query: impl Into<Query>) -> Result<Promised<()>> {
        promisify_call(|| self.inner.native.delete(query.into()), promise::decode_unit)
    }

    pub fn clear(&self) -> Result<Promised<()>> {
        promisify_call(|| self.inner.native.clear(), promise::decode_unit)
    }

    pub fn open_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<Promised<Option<Cursor>>> {
        promisify_call(
            || self.inner.native.open_cursor(query.into(), direction),
            decode_cursor(self.inner.cache.clone()),
        )
    }

    pub fn open_key_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<Promised<Option<Cursor>>> {
        promisify_call(
            || self.inner.native.open_key_cursor(query.into(), direction),
            decode_cursor(self.inner.cache.clone()),
        )
    }

    /// Open a cursor and iterate over it.
    pub fn iterate(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<CursorIterator> {
        self.open_cursor(query, direction).map(CursorIterator::opening)
    }

    /// Open a key cursor and iterate over it.
    pub fn iterate_keys(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<CursorIterator> {
        self.open_key_cursor(query, direction)
            .map(CursorIterator::opening)
    }
}

impl PartialEq for ObjectStore {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("id", &self.inner.native.id())
            .field("name", &self.inner.native.name())
            .finish()
    }
}
