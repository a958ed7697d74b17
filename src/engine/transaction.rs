// ============================================================================
// Native Transactions
// ============================================================================
//
// State machine:
//
//   Waiting ──start──▶ Running ──idle──▶ Committing ──task──▶ Committed
//      │                  │
//      └──────abort───────┴──────────────abort───────────────▶ Aborted
//
// A transaction is active while the engine dispatches one of its requests
// and during the turn that created it. Requests may only be issued while it
// is active. Once it is inactive with nothing pending it commits.
//
// Writes go straight to the shared database data. A readwrite transaction
// keeps a snapshot of the stores in its scope (persistent maps, so this is a
// pointer copy) and restores it on abort.
//
// ============================================================================

use super::cursor::NativeCursor;
use super::database::NativeDatabase;
use super::records::{DatabaseData, StoreData};
use super::request::{NativeRequest, RequestResult};
use super::store::NativeObjectStore;
use super::{EngineCore, HandleId};
use crate::core::{DbError, Result};
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    #[default]
    ReadOnly,
    ReadWrite,
    VersionChange,
}

impl TransactionMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::ReadWrite => "readwrite",
            Self::VersionChange => "versionchange",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Waiting,
    Running,
    Committing,
    Committed,
    Aborted,
}

pub(crate) type Exec = Box<dyn FnOnce(&mut DatabaseData) -> Result<RequestResult>>;

struct Operation {
    request: Rc<NativeRequest>,
    exec: Exec,
}

enum Snapshot {
    Stores(Vec<(String, Option<StoreData>)>),
    Database {
        version: u32,
        stores: OrdMap<String, StoreData>,
    },
}

struct TxInner {
    state: TransactionState,
    active: bool,
    pending: usize,
    queued: VecDeque<Operation>,
    error: Option<DbError>,
    commit_requested: bool,
    snapshot: Option<Snapshot>,
    outcome: Option<Result<()>>,
}

pub type CompleteListener = Box<dyn FnOnce()>;
pub type AbortListener = Box<dyn FnOnce(Option<&DbError>)>;

pub struct NativeTransaction {
    id: HandleId,
    engine: Rc<EngineCore>,
    db: Rc<NativeDatabase>,
    mode: TransactionMode,
    scope: Vec<String>,
    inner: RefCell<TxInner>,
    stores: RefCell<HashMap<String, Weak<NativeObjectStore>>>,
    cursors: RefCell<Vec<Weak<NativeCursor>>>,
    complete_listeners: RefCell<Vec<CompleteListener>>,
    abort_listeners: RefCell<Vec<AbortListener>>,
}

impl NativeTransaction {
    pub(crate) fn new(
        engine: Rc<EngineCore>,
        db: Rc<NativeDatabase>,
        scope: Vec<String>,
        mode: TransactionMode,
    ) -> Rc<Self> {
        let tx = Rc::new(Self {
            id: HandleId::next(),
            engine: engine.clone(),
            db,
            mode,
            scope,
            inner: RefCell::new(TxInner {
                state: TransactionState::Waiting,
                active: true,
                pending: 0,
                queued: VecDeque::new(),
                error: None,
                commit_requested: false,
                snapshot: None,
                outcome: None,
            }),
            stores: RefCell::new(HashMap::new()),
            cursors: RefCell::new(Vec::new()),
            complete_listeners: RefCell::new(Vec::new()),
            abort_listeners: RefCell::new(Vec::new()),
        });
        debug!(tx = %tx.id, mode = %mode, scope = ?tx.scope, "transaction created");
        engine.register_transaction(&tx);
        engine.activated(&tx);
        engine.start_ready_transactions();
        tx
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn db(&self) -> Rc<NativeDatabase> {
        self.db.clone()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.borrow().state
    }

    pub fn is_active(&self) -> bool {
        let inner = self.inner.borrow();
        inner.active && matches!(inner.state, TransactionState::Waiting | TransactionState::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            TransactionState::Committed | TransactionState::Aborted
        )
    }

    pub fn error(&self) -> Option<DbError> {
        self.inner.borrow().error.clone()
    }

    /// `Ok` once committed, `Err` once the abort notification fired.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.inner.borrow().outcome.clone()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        match self.mode {
            TransactionMode::VersionChange => self.db.object_store_names(),
            _ => self.scope.clone(),
        }
    }

    pub fn object_store(self: &Rc<Self>, name: &str) -> Result<Rc<NativeObjectStore>> {
        if self.is_finished() {
            return Err(DbError::InvalidState("transaction has finished".into()));
        }
        let exists = self.db.data().borrow().stores.contains_key(name);
        let in_scope = match self.mode {
            TransactionMode::VersionChange => exists,
            _ => exists && self.scope.iter().any(|s| s == name),
        };
        if !in_scope {
            return Err(DbError::NotFound(format!(
                "object store '{}' is not in the transaction scope",
                name
            )));
        }
        if let Some(store) = self.stores.borrow().get(name).and_then(Weak::upgrade) {
            return Ok(store);
        }
        let store = NativeObjectStore::new(self.clone(), name);
        self.stores
            .borrow_mut()
            .insert(name.to_string(), Rc::downgrade(&store));
        Ok(store)
    }

    pub fn abort(self: &Rc<Self>) -> Result<()> {
        if !matches!(
            self.state(),
            TransactionState::Waiting | TransactionState::Running
        ) {
            return Err(DbError::InvalidState("transaction has already finished".into()));
        }
        self.abort_with(None);
        Ok(())
    }

    /// Stop accepting requests and commit once the pending ones drain.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !matches!(
            inner.state,
            TransactionState::Waiting | TransactionState::Running
        ) {
            return Err(DbError::InvalidState("transaction has already finished".into()));
        }
        if !inner.active {
            return Err(DbError::InvalidState("transaction is not active".into()));
        }
        inner.commit_requested = true;
        Ok(())
    }

    pub fn add_complete_listener(&self, listener: CompleteListener) {
        self.complete_listeners.borrow_mut().push(listener);
    }

    pub fn add_abort_listener(&self, listener: AbortListener) {
        self.abort_listeners.borrow_mut().push(listener);
    }

    // ------------------------------------------------------------------
    // Engine side
    // ------------------------------------------------------------------

    pub(crate) fn engine(&self) -> &Rc<EngineCore> {
        &self.engine
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        let inner = self.inner.borrow();
        match inner.state {
            TransactionState::Waiting | TransactionState::Running => {}
            _ => {
                return Err(DbError::TransactionInactive(
                    "transaction has finished".into(),
                ));
            }
        }
        if !inner.active {
            return Err(DbError::TransactionInactive(
                "transaction is not active".into(),
            ));
        }
        if inner.commit_requested {
            return Err(DbError::TransactionInactive(
                "transaction is committing".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(DbError::ReadOnly("transaction is read-only".into()))
        }
    }

    pub(crate) fn ensure_version_change(&self) -> Result<()> {
        if self.mode == TransactionMode::VersionChange {
            Ok(())
        } else {
            Err(DbError::InvalidState(
                "schema changes need a version change transaction".into(),
            ))
        }
    }

    /// Queue `exec` to run against the database and settle `request`.
    pub(crate) fn issue(self: &Rc<Self>, request: Rc<NativeRequest>, exec: Exec) -> Result<()> {
        self.ensure_active()?;
        trace!(tx = %self.id, request = %request.id(), "request issued");
        let op = Operation { request, exec };
        let mut inner = self.inner.borrow_mut();
        inner.pending += 1;
        if inner.state == TransactionState::Waiting {
            inner.queued.push_back(op);
        } else {
            drop(inner);
            self.schedule(op);
        }
        Ok(())
    }

    fn schedule(self: &Rc<Self>, op: Operation) {
        let tx = self.clone();
        self.engine.queue(Box::new(move || tx.execute(op)));
    }

    fn execute(self: &Rc<Self>, op: Operation) {
        let Operation { request, exec } = op;
        {
            let mut inner = self.inner.borrow_mut();
            inner.pending = inner.pending.saturating_sub(1);
        }
        if self.state() == TransactionState::Aborted {
            request.fail(DbError::aborted());
            return;
        }

        let result = {
            let data = self.db.data();
            let mut data = data.borrow_mut();
            exec(&mut data)
        };
        self.activate();
        match result {
            Ok(value) => request.succeed(value),
            Err(error) => {
                request.fail(error.clone());
                if !self.is_finished() {
                    self.abort_with(Some(error));
                }
            }
        }
    }

    pub(crate) fn start(self: &Rc<Self>) {
        let queued = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != TransactionState::Waiting {
                return;
            }
            inner.state = TransactionState::Running;
            inner.snapshot = self.take_snapshot();
            std::mem::take(&mut inner.queued)
        };
        debug!(tx = %self.id, "transaction started");
        for op in queued {
            self.schedule(op);
        }
    }

    fn take_snapshot(&self) -> Option<Snapshot> {
        let data = self.db.data();
        let data = data.borrow();
        match self.mode {
            TransactionMode::ReadOnly => None,
            TransactionMode::ReadWrite => Some(Snapshot::Stores(
                self.scope
                    .iter()
                    .map(|name| (name.clone(), data.stores.get(name).cloned()))
                    .collect(),
            )),
            TransactionMode::VersionChange => Some(Snapshot::Database {
                version: data.version,
                stores: data.stores.clone(),
            }),
        }
    }

    fn restore(&self, snapshot: Snapshot) {
        let data = self.db.data();
        let mut data = data.borrow_mut();
        match snapshot {
            Snapshot::Stores(stores) => {
                for (name, store) in stores {
                    match store {
                        Some(store) => {
                            data.stores.insert(name, store);
                        }
                        None => {
                            data.stores.remove(&name);
                        }
                    }
                }
            }
            Snapshot::Database { version, stores } => {
                data.version = version;
                data.stores = stores;
            }
        }
    }

    pub(crate) fn activate(self: &Rc<Self>) {
        self.inner.borrow_mut().active = true;
        self.engine.activated(self);
    }

    pub(crate) fn deactivate(&self) {
        self.inner.borrow_mut().active = false;
    }

    /// Schedule the commit if the transaction is idle.
    pub(crate) fn maybe_commit(self: &Rc<Self>) {
        {
            let mut inner = self.inner.borrow_mut();
            let idle = !inner.active || inner.commit_requested;
            if inner.state != TransactionState::Running || inner.pending > 0 || !idle {
                return;
            }
            inner.state = TransactionState::Committing;
        }
        let tx = self.clone();
        self.engine.queue(Box::new(move || tx.finish_commit()));
    }

    fn finish_commit(self: &Rc<Self>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != TransactionState::Committing {
                return;
            }
            inner.state = TransactionState::Committed;
            inner.snapshot = None;
            inner.outcome = Some(Ok(()));
        }
        debug!(tx = %self.id, "transaction committed");
        self.release();
        let listeners = std::mem::take(&mut *self.complete_listeners.borrow_mut());
        self.abort_listeners.borrow_mut().clear();
        for listener in listeners {
            listener();
        }
        self.engine.start_ready_transactions();
        self.db.transaction_finished();
    }

    /// Abort now: revert writes, fail what has not run, notify later.
    pub(crate) fn abort_with(self: &Rc<Self>, error: Option<DbError>) {
        let (snapshot, queued) = {
            let mut inner = self.inner.borrow_mut();
            if matches!(
                inner.state,
                TransactionState::Committed | TransactionState::Aborted
            ) {
                return;
            }
            inner.state = TransactionState::Aborted;
            inner.active = false;
            inner.error = error;
            (inner.snapshot.take(), std::mem::take(&mut inner.queued))
        };
        debug!(tx = %self.id, error = ?self.error(), "transaction aborting");
        if let Some(snapshot) = snapshot {
            self.restore(snapshot);
        }
        for op in queued {
            self.schedule(op);
        }
        let tx = self.clone();
        self.engine.queue(Box::new(move || tx.finish_abort()));
    }

    fn finish_abort(self: &Rc<Self>) {
        let error = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return;
            }
            let error = inner.error.clone();
            inner.outcome = Some(Err(error.clone().unwrap_or_else(DbError::aborted)));
            error
        };
        debug!(tx = %self.id, "transaction aborted");
        self.release();
        let listeners = std::mem::take(&mut *self.abort_listeners.borrow_mut());
        self.complete_listeners.borrow_mut().clear();
        for listener in listeners {
            listener(error.as_ref());
        }
        self.engine.start_ready_transactions();
        self.db.transaction_finished();
    }

    fn release(&self) {
        for cursor in self.cursors.borrow().iter().filter_map(Weak::upgrade) {
            cursor.request().clear_result();
        }
        self.cursors.borrow_mut().clear();
        self.engine.unregister_transaction(self);
    }

    pub(crate) fn register_cursor(&self, cursor: &Rc<NativeCursor>) {
        self.cursors.borrow_mut().push(Rc::downgrade(cursor));
    }

    pub(crate) fn forget_store(&self, name: &str) {
        self.stores.borrow_mut().remove(name);
    }

    /// Whether `other` must wait for this transaction.
    pub(crate) fn conflicts_with(&self, other: &NativeTransaction) -> bool {
        if !Rc::ptr_eq(&self.db.data(), &other.db.data()) {
            return false;
        }
        if !self.mode.is_writable() && !other.mode.is_writable() {
            return false;
        }
        if self.mode == TransactionMode::VersionChange || other.mode == TransactionMode::VersionChange {
            return true;
        }
        self.scope.iter().any(|name| other.scope.contains(name))
    }
}

impl fmt::Debug for NativeTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTransaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("scope", &self.scope)
            .field("state", &self.state())
            .finish()
    }
}
