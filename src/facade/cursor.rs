use super::iterate::CursorIterator;
use crate::core::{Key, Result, Value};
use crate::engine::{CursorDirection, CursorSource, HandleId, NativeCursor, RequestResult};
use crate::identity::{IdentityCache, Wrapped, Wrapper};
use crate::promise::{self, promisify, promisify_call, Promised};
use serde::Serialize;
use std::fmt;
use std::rc::Rc;

/// Snapshot of where a cursor stood when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorPosition {
    pub key: Option<Key>,
    pub primary_key: Option<Key>,
    pub value: Option<Value>,
    pub exhausted: bool,
}

impl CursorPosition {
    pub fn to_value(&self) -> Value {
        Value::object([
            ("key", self.key.as_ref().map(Key::to_value).unwrap_or_default()),
            (
                "primaryKey",
                self.primary_key.as_ref().map(Key::to_value).unwrap_or_default(),
            ),
            ("value", self.value.clone().unwrap_or_default()),
        ])
    }
}

/// Decode a cursor request result into the wrapped cursor or `None`.
pub(crate) fn decode_cursor(
    cache: Rc<IdentityCache>,
) -> impl FnOnce(&RequestResult) -> Result<Option<Cursor>> + 'static {
    move |result| match result {
        RequestResult::Cursor(cursor) => Ok(cursor.clone().map(|c| cache.wrap(c))),
        other => Err(crate::core::DbError::TypeMismatch(format!(
            "expected cursor result, got {:?}",
            other
        ))),
    }
}

/// Wrapped cursor.
///
/// Advancing resolves to this same wrapper while entries remain, then to
/// `None`. Only one advance may be outstanding: a second one before the first
/// settles fails with `InvalidState` at the call site.
#[derive(Clone)]
pub struct Cursor {
    inner: Rc<CursorInner>,
}

pub(crate) struct CursorInner {
    native: Rc<NativeCursor>,
    cache: Rc<IdentityCache>,
}

impl Wrapper for Cursor {
    type Native = NativeCursor;
    type Inner = CursorInner;

    fn native_id(native: &NativeCursor) -> HandleId {
        native.id()
    }

    fn build(native: Rc<NativeCursor>, cache: &Rc<IdentityCache>) -> Rc<CursorInner> {
        Rc::new(CursorInner {
            native,
            cache: cache.clone(),
        })
    }

    fn from_inner(inner: Rc<CursorInner>) -> Self {
        Self { inner }
    }
}

impl Cursor {
    pub fn native(&self) -> Rc<NativeCursor> {
        self.inner.native.clone()
    }

    pub fn key(&self) -> Option<Key> {
        self.inner.native.key()
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.inner.native.primary_key()
    }

    pub fn value(&self) -> Option<Value> {
        self.inner.native.value()
    }

    pub fn direction(&self) -> CursorDirection {
        self.inner.native.direction()
    }

    /// The wrapped store or index the cursor walks.
    pub fn source(&self) -> Wrapped {
        match self.inner.native.source() {
            CursorSource::ObjectStore(store) => Wrapped::ObjectStore(self.inner.cache.wrap(store)),
            CursorSource::Index(index) => Wrapped::Index(self.inner.cache.wrap(index)),
        }
    }

    pub fn position(&self) -> CursorPosition {
        let native = &self.inner.native;
        CursorPosition {
            key: native.key(),
            primary_key: native.primary_key(),
            value: native.value(),
            exhausted: native.is_exhausted(),
        }
    }

    pub fn advance(&self, count: u32) -> Result<Promised<Option<Cursor>>> {
        self.step(|native| native.advance(count))
    }

    /// Move to the next entry, or to the first at or beyond `key`.
    pub fn continue_to(&self, key: Option<Key>) -> Result<Promised<Option<Cursor>>> {
        self.step(|native| native.continue_(key))
    }

    pub fn continue_primary_key(&self, key: impl Into<Key>, primary_key: impl Into<Key>) -> Result<Promised<Option<Cursor>>> {
        let (key, primary_key) = (key.into(), primary_key.into());
        self.step(|native| native.continue_primary_key(key, primary_key))
    }

    pub fn update(&self, value: impl Into<Value>) -> Result<Promised<Key>> {
        promisify_call(
            || self.inner.native.update(value.into()),
            promise::decode_written_key,
        )
    }

    pub fn delete(&self) -> Result<Promised<()>> {
        promisify_call(|| self.inner.native.delete(), promise::decode_unit)
    }

    /// Iterate from the current position; the first pull yields this cursor.
    pub fn iterate(&self) -> CursorIterator {
        CursorIterator::from_cursor(self.clone())
    }

    fn step(&self, advance: impl FnOnce(&Rc<NativeCursor>) -> Result<()>) -> Result<Promised<Option<Cursor>>> {
        let native = &self.inner.native;
        advance(native)?;
        Ok(promisify(native.request(), decode_cursor(self.inner.cache.clone())))
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.inner.native.id())
            .field("direction", &self.direction())
            .field("key", &self.key())
            .field("primary_key", &self.primary_key())
            .finish()
    }
}
