use super::cursor::{decode_cursor, Cursor};
use super::iterate::CursorIterator;
use super::store::ObjectStore;
use crate::core::{Key, KeyPath, Query, Result, Value};
use crate::engine::{CursorDirection, HandleId, NativeIndex};
use crate::identity::{IdentityCache, Wrapper};
use crate::promise::{self, promisify_call, Promised};
use std::fmt;
use std::rc::Rc;

/// Wrapped index.
#[derive(Clone)]
pub struct Index {
    inner: Rc<IndexInner>,
}

pub(crate) struct IndexInner {
    native: Rc<NativeIndex>,
    cache: Rc<IdentityCache>,
}

impl Wrapper for Index {
    type Native = NativeIndex;
    type Inner = IndexInner;

    fn native_id(native: &NativeIndex) -> HandleId {
        native.id()
    }

    fn build(native: Rc<NativeIndex>, cache: &Rc<IdentityCache>) -> Rc<IndexInner> {
        Rc::new(IndexInner {
            native,
            cache: cache.clone(),
        })
    }

    fn from_inner(inner: Rc<IndexInner>) -> Self {
        Self { inner }
    }
}

impl Index {
    pub fn native(&self) -> Rc<NativeIndex> {
        self.inner.native.clone()
    }

    pub fn name(&self) -> String {
        self.inner.native.name().to_string()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.inner.native.key_path()
    }

    pub fn unique(&self) -> bool {
        self.inner.native.unique()
    }

    pub fn multi_entry(&self) -> bool {
        self.inner.native.multi_entry()
    }

    pub fn object_store(&self) -> ObjectStore {
        self.inner.cache.wrap(self.inner.native.object_store())
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

    pub fn iterate(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<CursorIterator> {
        self.open_cursor(query, direction).map(CursorIterator::opening)
    }

    pub fn iterate_keys(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<CursorIterator> {
        self.open_key_cursor(query, direction)
            .map(CursorIterator::opening)
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("id", &self.inner.native.id())
            .field("name", &self.inner.native.name())
            .finish()
    }
}
