use super::index::NativeIndex;
use super::records::{DatabaseData, Position, StepTarget};
use super::request::{NativeRequest, RequestResult, RequestSource};
use super::store::NativeObjectStore;
use super::transaction::NativeTransaction;
use super::HandleId;
use crate::core::{DbError, Key, KeyRange, Query, Result, Value};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Next | Self::NextUnique)
    }

    /// Unique directions visit one entry per distinct key.
    pub fn is_unique(&self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::NextUnique => "nextunique",
            Self::Prev => "prev",
            Self::PrevUnique => "prevunique",
        }
    }
}

impl fmt::Display for CursorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub enum CursorSource {
    ObjectStore(Rc<NativeObjectStore>),
    Index(Rc<NativeIndex>),
}

impl CursorSource {
    pub fn object_store(&self) -> Rc<NativeObjectStore> {
        match self {
            Self::ObjectStore(store) => store.clone(),
            Self::Index(index) => index.object_store(),
        }
    }

    fn request_source(&self) -> RequestSource {
        match self {
            Self::ObjectStore(store) => RequestSource::ObjectStore(store.clone()),
            Self::Index(index) => RequestSource::Index(index.clone()),
        }
    }

    fn ensure_exists(&self) -> Result<()> {
        match self {
            Self::ObjectStore(store) => store.with_data(|_| ()),
            Self::Index(index) => index.with_index(|_| ()),
        }
    }
}

#[derive(Default)]
struct CursorState {
    position: Option<Position>,
    value: Option<Value>,
    /// Set when the cursor lands on an entry; cleared while a step is queued.
    got_value: bool,
    exhausted: bool,
}

/// A traversal position over a store or an index.
///
/// The cursor owns its request. Each step resets that request to pending and
/// fires it again with either the cursor itself or no result.
pub struct NativeCursor {
    id: HandleId,
    source: CursorSource,
    direction: CursorDirection,
    range: KeyRange,
    key_only: bool,
    request: Rc<NativeRequest>,
    state: RefCell<CursorState>,
}

impl NativeCursor {
    pub(crate) fn open(
        source: CursorSource,
        query: Query,
        direction: CursorDirection,
        key_only: bool,
    ) -> Result<Rc<NativeRequest>> {
        source.ensure_exists()?;
        let store = source.object_store();
        store.check(false)?;
        query.validate()?;
        let tx = store.transaction();
        let request = NativeRequest::new(source.request_source(), Some(tx.clone()));
        let cursor = Rc::new(Self {
            id: HandleId::next(),
            source,
            direction,
            range: query.to_range(),
            key_only,
            request: request.clone(),
            state: RefCell::new(CursorState::default()),
        });
        tx.register_cursor(&cursor);
        let stepping = cursor.clone();
        tx.issue(
            request.clone(),
            Box::new(move |data| stepping.step(data, 1, StepTarget::default())),
        )?;
        Ok(request)
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn source(&self) -> CursorSource {
        self.source.clone()
    }

    pub fn direction(&self) -> CursorDirection {
        self.direction
    }

    pub fn request(&self) -> Rc<NativeRequest> {
        self.request.clone()
    }

    pub fn transaction(&self) -> Rc<NativeTransaction> {
        self.source.object_store().transaction()
    }

    /// Whether the cursor only carries keys (opened by `open_key_cursor`).
    pub fn is_key_cursor(&self) -> bool {
        self.key_only
    }

    pub fn key(&self) -> Option<Key> {
        self.state.borrow().position.as_ref().map(|p| p.key.clone())
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.state
            .borrow()
            .position
            .as_ref()
            .map(|p| p.primary_key.clone())
    }

    pub fn value(&self) -> Option<Value> {
        self.state.borrow().value.clone()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.borrow().exhausted
    }

    /// Skip `count` entries.
    pub fn advance(self: &Rc<Self>, count: u32) -> Result<()> {
        if count == 0 {
            return Err(DbError::TypeMismatch(
                "advance count must be greater than zero".into(),
            ));
        }
        self.prepare_step()?;
        self.issue_step(count, StepTarget::default())
    }

    /// Step to the next entry, or to the first entry at or beyond `key`.
    pub fn continue_(self: &Rc<Self>, key: Option<Key>) -> Result<()> {
        self.prepare_step()?;
        if let Some(key) = &key {
            key.validate()?;
            if let Some(current) = self.key() {
                let behind = if self.direction.is_forward() {
                    *key <= current
                } else {
                    *key >= current
                };
                if behind {
                    return Err(DbError::DataError(format!(
                        "key {} is not beyond the cursor position {}",
                        key, current
                    )));
                }
            }
        }
        self.issue_step(
            1,
            StepTarget {
                key,
                primary_key: None,
            },
        )
    }

    /// Step to the entry at `key` whose primary key is at or beyond `primary_key`.
    pub fn continue_primary_key(self: &Rc<Self>, key: Key, primary_key: Key) -> Result<()> {
        if !matches!(self.source, CursorSource::Index(_)) {
            return Err(DbError::InvalidAccess(
                "continuePrimaryKey needs an index cursor".into(),
            ));
        }
        if self.direction.is_unique() {
            return Err(DbError::InvalidAccess(
                "continuePrimaryKey cannot be used with a unique direction".into(),
            ));
        }
        self.prepare_step()?;
        key.validate()?;
        primary_key.validate()?;
        if let Some(current) = self.state.borrow().position.as_ref() {
            let target = (&key, &primary_key);
            let here = (&current.key, &current.primary_key);
            let behind = if self.direction.is_forward() {
                target <= here
            } else {
                target >= here
            };
            if behind {
                return Err(DbError::DataError(format!(
                    "({}, {}) is not beyond the cursor position",
                    key, primary_key
                )));
            }
        }
        self.issue_step(
            1,
            StepTarget {
                key: Some(key),
                primary_key: Some(primary_key),
            },
        )
    }

    /// Replace the record under the cursor.
    pub fn update(self: &Rc<Self>, value: Value) -> Result<Rc<NativeRequest>> {
        let store = self.source.object_store();
        let primary_key = self.prepare_write()?;
        let key = match store.key_path() {
            Some(path) => {
                if path.evaluate(&value).as_ref() != Some(&primary_key) {
                    return Err(DbError::DataError(
                        "the new value's key does not match the cursor position".into(),
                    ));
                }
                None
            }
            None => Some(primary_key),
        };
        store.enqueue(RequestSource::Cursor(Rc::downgrade(self)), move |data| {
            data.store_record(value, key, false)
                .map(|key| RequestResult::Key(Some(key)))
        })
    }

    /// Delete the record under the cursor.
    pub fn delete(self: &Rc<Self>) -> Result<Rc<NativeRequest>> {
        let store = self.source.object_store();
        let primary_key = self.prepare_write()?;
        let range = Query::Key(primary_key).to_range();
        store.enqueue(RequestSource::Cursor(Rc::downgrade(self)), move |data| {
            data.delete_range(&range);
            Ok(RequestResult::Undefined)
        })
    }

    fn prepare_step(&self) -> Result<()> {
        self.transaction().ensure_active()?;
        self.source.ensure_exists()?;
        let state = self.state.borrow();
        if !state.got_value {
            return Err(DbError::InvalidState(if state.exhausted {
                "the cursor has reached its end".into()
            } else {
                "the cursor is already being advanced".into()
            }));
        }
        Ok(())
    }

    fn prepare_write(&self) -> Result<Key> {
        let tx = self.transaction();
        tx.ensure_active()?;
        tx.ensure_writable()?;
        self.source.ensure_exists()?;
        let state = self.state.borrow();
        if !state.got_value {
            return Err(DbError::InvalidState(
                "the cursor is not positioned on a record".into(),
            ));
        }
        if self.key_only {
            return Err(DbError::InvalidState("a key cursor cannot modify records".into()));
        }
        state
            .position
            .as_ref()
            .map(|p| p.primary_key.clone())
            .ok_or_else(|| DbError::InvalidState("the cursor is not positioned".into()))
    }

    fn issue_step(self: &Rc<Self>, count: u32, target: StepTarget) -> Result<()> {
        let stepping = self.clone();
        self.transaction().issue(
            self.request.clone(),
            Box::new(move |data| stepping.step(data, count, target)),
        )?;
        self.request.reset();
        self.state.borrow_mut().got_value = false;
        Ok(())
    }

    fn step(self: &Rc<Self>, data: &mut DatabaseData, count: u32, target: StepTarget) -> Result<RequestResult> {
        let store_name = self.source.object_store().name().to_string();
        let store = data.store(&store_name)?;
        let mut position = self.state.borrow().position.clone();
        let none = StepTarget::default();
        for i in 0..count {
            let target = if i + 1 == count { &target } else { &none };
            position = match &self.source {
                CursorSource::ObjectStore(_) => store.step_store(
                    &self.range,
                    self.direction,
                    position.as_ref().map(|p| &p.key),
                    target.key.as_ref(),
                ),
                CursorSource::Index(index) => store.step_index(
                    index.name(),
                    &self.range,
                    self.direction,
                    position.as_ref(),
                    target,
                )?,
            };
            if position.is_none() {
                break;
            }
        }

        let mut state = self.state.borrow_mut();
        match position {
            Some(position) => {
                state.value = if self.key_only {
                    None
                } else {
                    store.record(&position.primary_key).cloned()
                };
                state.position = Some(position);
                state.got_value = true;
                Ok(RequestResult::Cursor(Some(self.clone())))
            }
            None => {
                state.position = None;
                state.value = None;
                state.got_value = false;
                state.exhausted = true;
                Ok(RequestResult::Cursor(None))
            }
        }
    }
}

impl fmt::Debug for NativeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCursor")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("key", &self.key())
            .field("primary_key", &self.primary_key())
            .finish()
    }
}
