use super::cursor::{CursorDirection, CursorSource, NativeCursor};
use super::records::IndexData;
use super::request::{NativeRequest, RequestResult, RequestSource};
use super::store::NativeObjectStore;
use super::HandleId;
use crate::core::{DbError, KeyPath, KeyRange, Query, Result};
use crate::engine::records::StoreData;
use std::fmt;
use std::rc::Rc;

/// An index of one object store, as seen through one transaction.
pub struct NativeIndex {
    id: HandleId,
    store: Rc<NativeObjectStore>,
    name: String,
}

impl NativeIndex {
    pub(crate) fn new(store: Rc<NativeObjectStore>, name: &str) -> Rc<Self> {
        Rc::new(Self {
            id: HandleId::next(),
            store,
            name: name.to_string(),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_store(&self) -> Rc<NativeObjectStore> {
        self.store.clone()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.with_index(|index| index.key_path().clone()).ok()
    }

    pub fn unique(&self) -> bool {
        self.with_index(IndexData::unique).unwrap_or(false)
    }

    pub fn multi_entry(&self) -> bool {
        self.with_index(IndexData::multi_entry).unwrap_or(false)
    }

    pub fn get(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.read(query, |store, index, range| {
            store.index_get(index, &range).map(RequestResult::Value)
        })
    }

    pub fn get_key(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.read(query, |store, index, range| {
            store.index_get_key(index, &range).map(RequestResult::Key)
        })
    }

    pub fn get_all(self: &Rc<Self>, query: Query, count: Option<u32>) -> Result<Rc<NativeRequest>> {
        self.read(query, move |store, index, range| {
            store.index_get_all(index, &range, count).map(RequestResult::Values)
        })
    }

    pub fn get_all_keys(self: &Rc<Self>, query: Query, count: Option<u32>) -> Result<Rc<NativeRequest>> {
        self.read(query, move |store, index, range| {
            store
                .index_get_all_keys(index, &range, count)
                .map(RequestResult::Keys)
        })
    }

    pub fn count(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.read(query, |store, index, range| {
            store.index_count(index, &range).map(RequestResult::Count)
        })
    }

    pub fn open_cursor(self: &Rc<Self>, query: Query, direction: CursorDirection) -> Result<Rc<NativeRequest>> {
        NativeCursor::open(CursorSource::Index(self.clone()), query, direction, false)
    }

    pub fn open_key_cursor(self: &Rc<Self>, query: Query, direction: CursorDirection) -> Result<Rc<NativeRequest>> {
        NativeCursor::open(CursorSource::Index(self.clone()), query, direction, true)
    }

    pub(crate) fn with_index<T>(&self, f: impl FnOnce(&IndexData) -> T) -> Result<T> {
        self.store
            .with_data(|store| store.index(&self.name).map(f))?
            .map_err(|_| DbError::InvalidState(format!("index '{}' has been deleted", self.name)))
    }

    fn read<F>(self: &Rc<Self>, query: Query, exec: F) -> Result<Rc<NativeRequest>>
    where
        F: FnOnce(&StoreData, &str, KeyRange) -> Result<RequestResult> + 'static,
    {
        self.with_index(|_| ())?;
        self.store.check(false)?;
        query.validate()?;
        let range = query.to_range();
        let name = self.name.clone();
        self.store
            .enqueue(RequestSource::Index(self.clone()), move |store| {
                exec(store, &name, range)
            })
    }
}

impl fmt::Debug for NativeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeIndex")
            .field("id", &self.id)
            .field("store", &self.store.name())
            .field("name", &self.name)
            .finish()
    }
}
