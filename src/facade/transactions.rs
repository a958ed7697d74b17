use super::database::Database;
use super::store::ObjectStore;
use crate::core::{DbError, Result};
use crate::engine::{HandleId, NativeTransaction, TransactionMode, TransactionState};
use crate::identity::{IdentityCache, Wrapper};
use crate::promise::{settle, Slot};
use futures::channel::oneshot;
use futures::future::Shared;
use futures::FutureExt;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Completion of one transaction: `Ok` on commit, the abort error otherwise.
pub struct Completion {
    receiver: oneshot::Receiver<Result<()>>,
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(DbError::aborted())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cloneable completion future of a transaction.
pub type Done = Shared<Completion>;

fn completion(native: &NativeTransaction) -> Done {
    let (sender, receiver) = oneshot::channel();
    let slot: Slot<()> = Rc::new(RefCell::new(Some(sender)));
    match native.outcome() {
        Some(outcome) => settle(&slot, outcome),
        None => {
            let on_abort = slot.clone();
            native.add_complete_listener(Box::new(move || settle(&slot, Ok(()))));
            native.add_abort_listener(Box::new(move |error| {
                settle(&on_abort, Err(error.cloned().unwrap_or_else(DbError::aborted)))
            }));
        }
    }
    Completion { receiver }.shared()
}

/// Wrapped transaction.
///
/// `done` is created together with the wrapper, so it observes the
/// transaction's whole lifetime no matter when it is first awaited.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionInner>,
}

pub(crate) struct TransactionInner {
    native: Rc<NativeTransaction>,
    cache: Rc<IdentityCache>,
    done: Done,
    store: Option<ObjectStore>,
}

impl Wrapper for Transaction {
    type Native = NativeTransaction;
    type Inner = TransactionInner;

    fn native_id(native: &NativeTransaction) -> HandleId {
        native.id()
    }

    fn build(native: Rc<NativeTransaction>, cache: &Rc<IdentityCache>) -> Rc<TransactionInner> {
        let done = completion(&native);
        let store = match native.mode() {
            TransactionMode::VersionChange => None,
            _ => single_store(&native, cache),
        };
        Rc::new(TransactionInner {
            native,
            cache: cache.clone(),
            done,
            store,
        })
    }

    fn from_inner(inner: Rc<TransactionInner>) -> Self {
        Self { inner }
    }
}

fn single_store(native: &Rc<NativeTransaction>, cache: &Rc<IdentityCache>) -> Option<ObjectStore> {
    match native.object_store_names().as_slice() {
        [name] => native.object_store(name).ok().map(|store| cache.wrap(store)),
        _ => None,
    }
}

impl Transaction {
    pub fn native(&self) -> Rc<NativeTransaction> {
        self.inner.native.clone()
    }

    pub fn mode(&self) -> TransactionMode {
        self.inner.native.mode()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.native.state()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.native.object_store_names()
    }

    pub fn db(&self) -> Database {
        self.inner.cache.wrap(self.inner.native.db())
    }

    pub fn error(&self) -> Option<DbError> {
        self.inner.native.error()
    }

    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        let store = self.inner.native.object_store(name)?;
        Ok(self.inner.cache.wrap(store))
    }

    /// The only store in scope, or `None` when the scope has several.
    pub fn store(&self) -> Option<ObjectStore> {
        match self.mode() {
            TransactionMode::VersionChange => single_store(&self.inner.native, &self.inner.cache),
            _ => self.inner.store.clone(),
        }
    }

    /// Resolves on commit; rejects with the error that aborted the transaction.
    pub fn done(&self) -> Done {
        self.inner.done.clone()
    }

    pub fn abort(&self) -> Result<()> {
        self.inner.native.abort()
    }

    pub fn commit(&self) -> Result<()> {
        self.inner.native.commit()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.native.id())
            .field("mode", &self.mode())
            .field("scope", &self.object_store_names())
            .finish()
    }
}
