use super::cursor::Cursor;
use super::database::Database;
use super::transactions::{Done, Transaction};
use crate::core::{DbError, Key, Result, Value};
use crate::engine::{HandleId, NativeRequest, ReadyState, RequestResult, RequestSource};
use crate::identity::{IdentityCache, Wrapped, Wrapper};
use crate::promise::{promisify, Promised};
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A request result with every handle in it wrapped.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Undefined,
    Value(Option<Value>),
    Key(Option<Key>),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(Option<Cursor>),
    Database(Database),
}

impl Resolved {
    pub(crate) fn wrap(result: &RequestResult, cache: &Rc<IdentityCache>) -> Self {
        match result {
            RequestResult::Undefined => Self::Undefined,
            RequestResult::Value(value) => Self::Value(value.clone()),
            RequestResult::Key(key) => Self::Key(key.clone()),
            RequestResult::Values(values) => Self::Values(values.clone()),
            RequestResult::Keys(keys) => Self::Keys(keys.clone()),
            RequestResult::Count(count) => Self::Count(*count),
            RequestResult::Cursor(cursor) => Self::Cursor(cursor.clone().map(|c| cache.wrap(c))),
            RequestResult::Database(db) => Self::Database(cache.for_connection(db).wrap(db.clone())),
        }
    }

    pub(crate) fn decoder(
        cache: Rc<IdentityCache>,
    ) -> impl FnOnce(&RequestResult) -> Result<Resolved> + 'static {
        move |result| Ok(Self::wrap(result, &cache))
    }

    /// Plain data view; handles become a short description.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Undefined => Value::Null,
            Self::Value(value) => value.clone().unwrap_or_default(),
            Self::Key(key) => key.as_ref().map(Key::to_value).unwrap_or_default(),
            Self::Values(values) => Value::Array(values.clone()),
            Self::Keys(keys) => Value::Array(keys.iter().map(Key::to_value).collect()),
            Self::Count(count) => Value::Integer(*count as i64),
            Self::Cursor(None) => Value::Null,
            Self::Cursor(Some(cursor)) => cursor.position().to_value(),
            Self::Database(db) => Value::object([
                ("name", Value::from(db.name())),
                ("version", Value::from(db.version() as i64)),
            ]),
        }
    }
}

/// Future returned by shortcuts and reflective calls.
///
/// Resolves with the request's value; for writes, only once the owning
/// transaction has committed as well.
pub struct Pending<T> {
    request: Rc<NativeRequest>,
    future: LocalBoxFuture<'static, Result<T>>,
}

impl<T: 'static> Pending<T> {
    pub(crate) fn new(value: Promised<T>, done: Option<Done>) -> Self {
        let request = value.request();
        let future = match done {
            None => value.boxed_local(),
            Some(done) => futures::future::try_join(value, done)
                .map(|joined| joined.map(|(value, ())| value))
                .boxed_local(),
        };
        Self { request, future }
    }

    pub(crate) fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Pending<U> {
        Pending {
            request: self.request,
            future: self.future.map(|outcome| outcome.map(f)).boxed_local(),
        }
    }

    /// The native request behind this future.
    pub fn request(&self) -> Rc<NativeRequest> {
        self.request.clone()
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().future.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("request", &self.request.id())
            .finish()
    }
}

/// A wrapped request: a cloneable future of its resolved result that still
/// knows its native request.
#[derive(Clone)]
pub struct WrappedRequest {
    inner: Rc<RequestInner>,
    result: Shared<Promised<Resolved>>,
}

pub(crate) struct RequestInner {
    native: Rc<NativeRequest>,
    cache: Rc<IdentityCache>,
    result: Shared<Promised<Resolved>>,
}

impl Wrapper for WrappedRequest {
    type Native = NativeRequest;
    type Inner = RequestInner;

    fn native_id(native: &NativeRequest) -> HandleId {
        native.id()
    }

    fn build(native: Rc<NativeRequest>, cache: &Rc<IdentityCache>) -> Rc<RequestInner> {
        let result = promisify(native.clone(), Resolved::decoder(cache.clone())).shared();
        Rc::new(RequestInner {
            native,
            cache: cache.clone(),
            result,
        })
    }

    fn from_inner(inner: Rc<RequestInner>) -> Self {
        let result = inner.result.clone();
        Self { inner, result }
    }
}

impl WrappedRequest {
    pub fn native(&self) -> Rc<NativeRequest> {
        self.inner.native.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.native.ready_state()
    }

    /// Current result, wrapped; `None` while pending or after an error.
    pub fn result(&self) -> Option<Resolved> {
        self.inner
            .native
            .result()
            .map(|result| Resolved::wrap(&result, &self.inner.cache))
    }

    pub fn error(&self) -> Option<DbError> {
        self.inner.native.error()
    }

    /// The wrapped handle the request was issued against.
    pub fn source(&self) -> Option<Wrapped> {
        let cache = &self.inner.cache;
        match self.inner.native.source() {
            RequestSource::Factory => None,
            RequestSource::ObjectStore(store) => Some(Wrapped::ObjectStore(cache.wrap(store))),
            RequestSource::Index(index) => Some(Wrapped::Index(cache.wrap(index))),
            RequestSource::Cursor(cursor) => cursor
                .upgrade()
                .map(|cursor| Wrapped::Cursor(cache.wrap(cursor))),
        }
    }

    pub fn transaction(&self) -> Option<Transaction> {
        self.inner
            .native
            .transaction()
            .map(|tx| self.inner.cache.wrap(tx))
    }
}

impl Future for WrappedRequest {
    type Output = Result<Resolved>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().result).poll(cx)
    }
}

impl PartialEq for WrappedRequest {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WrappedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedRequest")
            .field("id", &self.inner.native.id())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
