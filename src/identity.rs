// ============================================================================
// Identity Cache
// ============================================================================
//
// One cache per connection maps a native handle's id to its wrapper. Entries
// are weak: the cache never keeps a wrapper (and through it, the native
// handle) alive. Dead entries are swept lazily once enough inserts have
// accumulated, and the whole cache is torn down when its connection closes.
//
// The reverse direction needs no table: every wrapper owns its native handle.
//
// ============================================================================

use crate::connection::CacheConfig;
use crate::engine::{
    HandleId, NativeCursor, NativeDatabase, NativeIndex, NativeObjectStore, NativeRequest,
    NativeTransaction, RequestResult, RequestSource,
};
use crate::facade::{Cursor, Database, Index, ObjectStore, Transaction, WrappedRequest};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// The kinds of handle the engine hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Database,
    Transaction,
    ObjectStore,
    Index,
    Cursor,
    Request,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Database => "database",
            Self::Transaction => "transaction",
            Self::ObjectStore => "objectStore",
            Self::Index => "index",
            Self::Cursor => "cursor",
            Self::Request => "request",
        };
        f.write_str(name)
    }
}

/// Any native handle.
#[derive(Clone)]
pub enum NativeHandle {
    Database(Rc<NativeDatabase>),
    Transaction(Rc<NativeTransaction>),
    ObjectStore(Rc<NativeObjectStore>),
    Index(Rc<NativeIndex>),
    Cursor(Rc<NativeCursor>),
    Request(Rc<NativeRequest>),
}

impl NativeHandle {
    pub fn id(&self) -> HandleId {
        match self {
            Self::Database(h) => h.id(),
            Self::Transaction(h) => h.id(),
            Self::ObjectStore(h) => h.id(),
            Self::Index(h) => h.id(),
            Self::Cursor(h) => h.id(),
            Self::Request(h) => h.id(),
        }
    }

    pub fn kind(&self) -> HandleKind {
        match self {
            Self::Database(_) => HandleKind::Database,
            Self::Transaction(_) => HandleKind::Transaction,
            Self::ObjectStore(_) => HandleKind::ObjectStore,
            Self::Index(_) => HandleKind::Index,
            Self::Cursor(_) => HandleKind::Cursor,
            Self::Request(_) => HandleKind::Request,
        }
    }

    /// The connection this handle belongs to, if any.
    pub fn connection(&self) -> Option<Rc<NativeDatabase>> {
        match self {
            Self::Database(db) => Some(db.clone()),
            Self::Transaction(tx) => Some(tx.db()),
            Self::ObjectStore(store) => Some(store.transaction().db()),
            Self::Index(index) => Some(index.object_store().transaction().db()),
            Self::Cursor(cursor) => Some(cursor.transaction().db()),
            Self::Request(request) => {
                if let Some(tx) = request.transaction() {
                    return Some(tx.db());
                }
                match (request.source(), request.result()) {
                    (RequestSource::ObjectStore(store), _) => Some(store.transaction().db()),
                    (RequestSource::Index(index), _) => Some(index.object_store().transaction().db()),
                    (RequestSource::Cursor(cursor), _) => cursor.upgrade().map(|c| c.transaction().db()),
                    (RequestSource::Factory, Some(RequestResult::Database(db))) => Some(db),
                    (RequestSource::Factory, _) => None,
                }
            }
        }
    }
}

impl PartialEq for NativeHandle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Database(a), Self::Database(b)) => Rc::ptr_eq(a, b),
            (Self::Transaction(a), Self::Transaction(b)) => Rc::ptr_eq(a, b),
            (Self::ObjectStore(a), Self::ObjectStore(b)) => Rc::ptr_eq(a, b),
            (Self::Index(a), Self::Index(b)) => Rc::ptr_eq(a, b),
            (Self::Cursor(a), Self::Cursor(b)) => Rc::ptr_eq(a, b),
            (Self::Request(a), Self::Request(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({} {})", self.kind(), self.id())
    }
}

/// Any wrapped handle.
#[derive(Clone, PartialEq)]
pub enum Wrapped {
    Database(Database),
    Transaction(Transaction),
    ObjectStore(ObjectStore),
    Index(Index),
    Cursor(Cursor),
    Request(WrappedRequest),
}

impl Wrapped {
    pub fn kind(&self) -> HandleKind {
        match self {
            Self::Database(_) => HandleKind::Database,
            Self::Transaction(_) => HandleKind::Transaction,
            Self::ObjectStore(_) => HandleKind::ObjectStore,
            Self::Index(_) => HandleKind::Index,
            Self::Cursor(_) => HandleKind::Cursor,
            Self::Request(_) => HandleKind::Request,
        }
    }

    /// The native handle this wrapper stands for.
    pub fn unwrap_native(&self) -> NativeHandle {
        match self {
            Self::Database(w) => NativeHandle::Database(w.native()),
            Self::Transaction(w) => NativeHandle::Transaction(w.native()),
            Self::ObjectStore(w) => NativeHandle::ObjectStore(w.native()),
            Self::Index(w) => NativeHandle::Index(w.native()),
            Self::Cursor(w) => NativeHandle::Cursor(w.native()),
            Self::Request(w) => NativeHandle::Request(w.native()),
        }
    }
}

impl fmt::Debug for Wrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wrapped({} {})", self.kind(), self.unwrap_native().id())
    }
}

/// How a wrapper type is built from, and stored for, its native handle.
pub(crate) trait Wrapper: Sized {
    type Native;
    type Inner: 'static;

    fn native_id(native: &Self::Native) -> HandleId;
    fn build(native: Rc<Self::Native>, cache: &Rc<IdentityCache>) -> Rc<Self::Inner>;
    fn from_inner(inner: Rc<Self::Inner>) -> Self;
}

/// Finds the cache of a connection; `None` once its owner is gone.
pub(crate) type Router = Box<dyn Fn(&Rc<NativeDatabase>) -> Option<Rc<IdentityCache>>>;

pub struct IdentityCache {
    connection: Option<HandleId>,
    config: CacheConfig,
    entries: RefCell<HashMap<HandleId, Weak<dyn Any>>>,
    inserts_since_sweep: Cell<usize>,
    torn_down: Cell<bool>,
    router: RefCell<Option<Router>>,
}

impl IdentityCache {
    pub fn new(connection: Option<HandleId>, config: CacheConfig) -> Self {
        Self {
            connection,
            config,
            entries: RefCell::new(HashMap::new()),
            inserts_since_sweep: Cell::new(0),
            torn_down: Cell::new(false),
            router: RefCell::new(None),
        }
    }

    pub fn connection(&self) -> Option<HandleId> {
        self.connection
    }

    pub(crate) fn set_router(&self, router: Router) {
        *self.router.borrow_mut() = Some(router);
    }

    /// The cache that owns wrappers of `connection`.
    ///
    /// A connection's own cache answers for itself; a detached cache asks its
    /// router, so a connection reached through a factory request still gets
    /// its single wrapper.
    pub(crate) fn for_connection(self: &Rc<Self>, connection: &Rc<NativeDatabase>) -> Rc<IdentityCache> {
        if self.connection.is_some() {
            return self.clone();
        }
        self.router
            .borrow()
            .as_ref()
            .and_then(|route| route(connection))
            .unwrap_or_else(|| self.clone())
    }

    /// Return the wrapper registered for `native`, creating it if needed.
    pub(crate) fn wrap<W: Wrapper>(self: &Rc<Self>, native: Rc<W::Native>) -> W {
        let id = W::native_id(&native);
        if let Some(inner) = self.lookup::<W::Inner>(id) {
            return W::from_inner(inner);
        }
        let inner = W::build(native, self);
        // building may have wrapped the same handle re-entrantly
        if let Some(existing) = self.lookup::<W::Inner>(id) {
            return W::from_inner(existing);
        }
        if !self.torn_down.get() {
            let erased: Rc<dyn Any> = inner.clone();
            self.entries.borrow_mut().insert(id, Rc::downgrade(&erased));
            self.note_insert();
        }
        W::from_inner(inner)
    }

    /// Wrap any native handle.
    pub fn wrap_native(self: &Rc<Self>, native: NativeHandle) -> Wrapped {
        match native {
            NativeHandle::Database(h) => Wrapped::Database(self.wrap(h)),
            NativeHandle::Transaction(h) => Wrapped::Transaction(self.wrap(h)),
            NativeHandle::ObjectStore(h) => Wrapped::ObjectStore(self.wrap(h)),
            NativeHandle::Index(h) => Wrapped::Index(self.wrap(h)),
            NativeHandle::Cursor(h) => Wrapped::Cursor(self.wrap(h)),
            NativeHandle::Request(h) => Wrapped::Request(self.wrap(h)),
        }
    }

    fn lookup<I: 'static>(&self, id: HandleId) -> Option<Rc<I>> {
        let weak = self.entries.borrow().get(&id)?.clone();
        weak.upgrade()?.downcast::<I>().ok()
    }

    fn note_insert(&self) {
        let inserts = self.inserts_since_sweep.get() + 1;
        if inserts >= self.config.threshold() {
            self.sweep();
        } else {
            self.inserts_since_sweep.set(inserts);
        }
    }

    /// Drop entries whose wrapper is gone.
    pub fn sweep(&self) {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        self.inserts_since_sweep.set(0);
        trace!(
            connection = ?self.connection,
            removed = before - entries.len(),
            kept = entries.len(),
            "identity cache swept"
        );
    }

    /// Forget every entry; later wraps are not registered.
    pub fn teardown(&self) {
        self.torn_down.set(true);
        self.entries.borrow_mut().clear();
        trace!(connection = ?self.connection, "identity cache torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// Number of entries, dead ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Number of entries whose wrapper is still alive.
    pub fn live_len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("connection", &self.connection)
            .field("entries", &self.len())
            .field("torn_down", &self.torn_down.get())
            .finish()
    }
}
