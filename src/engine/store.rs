use super::cursor::{CursorDirection, CursorSource, NativeCursor};
use super::index::NativeIndex;
use super::records::StoreData;
use super::request::{NativeRequest, RequestResult, RequestSource};
use super::transaction::NativeTransaction;
use super::HandleId;
use crate::core::{DbError, Key, KeyPath, Query, Result, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// An object store as seen through one transaction.
pub struct NativeObjectStore {
    id: HandleId,
    transaction: Rc<NativeTransaction>,
    name: String,
    indexes: RefCell<HashMap<String, Weak<NativeIndex>>>,
}

impl NativeObjectStore {
    pub(crate) fn new(transaction: Rc<NativeTransaction>, name: &str) -> Rc<Self> {
        Rc::new(Self {
            id: HandleId::next(),
            transaction,
            name: name.to_string(),
            indexes: RefCell::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transaction(&self) -> Rc<NativeTransaction> {
        self.transaction.clone()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.with_data(|store| store.key_path().cloned()).ok().flatten()
    }

    pub fn auto_increment(&self) -> bool {
        self.with_data(StoreData::auto_increment).unwrap_or(false)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.with_data(StoreData::index_names).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.read(query, |store, range| Ok(RequestResult::Value(store.get(&range))))
    }

    pub fn get_key(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.read(query, |store, range| Ok(RequestResult::Key(store.get_key(&range))))
    }

    pub fn get_all(self: &Rc<Self>, query: Query, count: Option<u32>) -> Result<Rc<NativeRequest>> {
        self.read(query, move |store, range| {
            Ok(RequestResult::Values(store.get_all(&range, count)))
        })
    }

    pub fn get_all_keys(self: &Rc<Self>, query: Query, count: Option<u32>) -> Result<Rc<NativeRequest>> {
        self.read(query, move |store, range| {
            Ok(RequestResult::Keys(store.get_all_keys(&range, count)))
        })
    }

    pub fn count(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.read(query, |store, range| Ok(RequestResult::Count(store.count(&range))))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert or replace a record.
    pub fn put(self: &Rc<Self>, value: Value, key: Option<Key>) -> Result<Rc<NativeRequest>> {
        self.write_record(value, key, false)
    }

    /// Insert a record; fails with a constraint error if the key exists.
    pub fn add(self: &Rc<Self>, value: Value, key: Option<Key>) -> Result<Rc<NativeRequest>> {
        self.write_record(value, key, true)
    }

    pub fn delete(self: &Rc<Self>, query: Query) -> Result<Rc<NativeRequest>> {
        self.check(true)?;
        query.validate()?;
        let range = query.to_range();
        self.enqueue(self.request_source(), move |store| {
            store.delete_range(&range);
            Ok(RequestResult::Undefined)
        })
    }

    pub fn clear(self: &Rc<Self>) -> Result<Rc<NativeRequest>> {
        self.check(true)?;
        self.enqueue(self.request_source(), |store| {
            store.clear();
            Ok(RequestResult::Undefined)
        })
    }

    fn write_record(self: &Rc<Self>, value: Value, key: Option<Key>, no_overwrite: bool) -> Result<Rc<NativeRequest>> {
        self.check(true)?;
        if let Some(key) = &key {
            key.validate()?;
        }
        self.with_data(|store| store.validate_write(&value, key.as_ref()))??;
        self.enqueue(self.request_source(), move |store| {
            store
                .store_record(value, key, no_overwrite)
                .map(|key| RequestResult::Key(Some(key)))
        })
    }

    // ------------------------------------------------------------------
    // Cursors
    // ------------------------------------------------------------------

    pub fn open_cursor(self: &Rc<Self>, query: Query, direction: CursorDirection) -> Result<Rc<NativeRequest>> {
        NativeCursor::open(CursorSource::ObjectStore(self.clone()), query, direction, false)
    }

    pub fn open_key_cursor(self: &Rc<Self>, query: Query, direction: CursorDirection) -> Result<Rc<NativeRequest>> {
        NativeCursor::open(CursorSource::ObjectStore(self.clone()), query, direction, true)
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    pub fn index(self: &Rc<Self>, name: &str) -> Result<Rc<NativeIndex>> {
        if self.transaction.is_finished() {
            return Err(DbError::InvalidState("transaction has finished".into()));
        }
        self.with_data(|store| store.index(name).map(|_| ()))??;
        if let Some(index) = self.indexes.borrow().get(name).and_then(Weak::upgrade) {
            return Ok(index);
        }
        let index = NativeIndex::new(self.clone(), name);
        self.indexes
            .borrow_mut()
            .insert(name.to_string(), Rc::downgrade(&index));
        Ok(index)
    }

    pub fn create_index(
        self: &Rc<Self>,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<Rc<NativeIndex>> {
        self.transaction.ensure_version_change()?;
        self.transaction.ensure_active()?;
        let violation = {
            let data = self.transaction.db().data();
            let mut data = data.borrow_mut();
            data.store_mut(&self.name)
                .map_err(|_| self.deleted())?
                .create_index(name, key_path, unique, multi_entry)?
        };
        debug!(store = %self.name, index = name, unique, multi_entry, "index created");
        if let Some(error) = violation {
            let tx = self.transaction.clone();
            self.transaction
                .engine()
                .queue(Box::new(move || tx.abort_with(Some(error))));
        }
        self.index(name)
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.transaction.ensure_version_change()?;
        self.transaction.ensure_active()?;
        {
            let data = self.transaction.db().data();
            let mut data = data.borrow_mut();
            data.store_mut(&self.name)
                .map_err(|_| self.deleted())?
                .delete_index(name)?;
        }
        self.indexes.borrow_mut().remove(name);
        debug!(store = %self.name, index = name, "index deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Plumbing shared with indexes and cursors
    // ------------------------------------------------------------------

    fn request_source(self: &Rc<Self>) -> RequestSource {
        RequestSource::ObjectStore(self.clone())
    }

    fn deleted(&self) -> DbError {
        DbError::InvalidState(format!("object store '{}' has been deleted", self.name))
    }

    pub(crate) fn with_data<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T> {
        let data = self.transaction.db().data();
        let data = data.borrow();
        data.store(&self.name).map(f).map_err(|_| self.deleted())
    }

    /// Checks every request makes before it is queued.
    pub(crate) fn check(&self, write: bool) -> Result<()> {
        self.with_data(|_| ())?;
        self.transaction.ensure_active()?;
        if write {
            self.transaction.ensure_writable()?;
        }
        Ok(())
    }

    pub(crate) fn enqueue<F>(&self, source: RequestSource, exec: F) -> Result<Rc<NativeRequest>>
    where
        F: FnOnce(&mut StoreData) -> Result<RequestResult> + 'static,
    {
        let request = NativeRequest::new(source, Some(self.transaction.clone()));
        let name = self.name.clone();
        self.transaction.issue(
            request.clone(),
            Box::new(move |data| exec(data.store_mut(&name)?)),
        )?;
        Ok(request)
    }

    fn read<F>(self: &Rc<Self>, query: Query, exec: F) -> Result<Rc<NativeRequest>>
    where
        F: FnOnce(&StoreData, crate::core::KeyRange) -> Result<RequestResult> + 'static,
    {
        self.check(false)?;
        query.validate()?;
        let range = query.to_range();
        self.enqueue(self.request_source(), move |store| exec(store, range))
    }
}

impl fmt::Debug for NativeObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObjectStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
