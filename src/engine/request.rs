use super::cursor::NativeCursor;
use super::database::{NativeDatabase, VersionChangeEvent};
use super::index::NativeIndex;
use super::store::NativeObjectStore;
use super::transaction::NativeTransaction;
use super::HandleId;
use crate::core::{DbError, Key, Result, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::trace;

/// What a request produced when it succeeded.
#[derive(Clone)]
pub enum RequestResult {
    Undefined,
    Value(Option<Value>),
    Key(Option<Key>),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(Option<Rc<NativeCursor>>),
    Database(Rc<NativeDatabase>),
}

impl std::fmt::Debug for RequestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "Undefined"),
            Self::Value(v) => write!(f, "Value({:?})", v),
            Self::Key(k) => write!(f, "Key({:?})", k),
            Self::Values(v) => write!(f, "Values({} items)", v.len()),
            Self::Keys(k) => write!(f, "Keys({} items)", k.len()),
            Self::Count(n) => write!(f, "Count({})", n),
            Self::Cursor(Some(c)) => write!(f, "Cursor({})", c.id()),
            Self::Cursor(None) => write!(f, "Cursor(none)"),
            Self::Database(db) => write!(f, "Database({})", db.name()),
        }
    }
}

/// The handle a request was issued against.
#[derive(Clone)]
pub enum RequestSource {
    Factory,
    ObjectStore(Rc<NativeObjectStore>),
    Index(Rc<NativeIndex>),
    Cursor(Weak<NativeCursor>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Done,
}

enum RequestState {
    Pending,
    Done(Result<RequestResult>),
}

pub type SuccessListener = Box<dyn FnOnce(&RequestResult)>;
pub type ErrorListener = Box<dyn FnOnce(&DbError)>;
pub type VersionChangeListener = Box<dyn FnOnce(&VersionChangeEvent)>;

/// One in-flight operation.
///
/// Every firing drains both listener lists, so a listener runs at most once.
/// Cursor requests are reset to pending on each advance and fire again.
pub struct NativeRequest {
    id: HandleId,
    source: RequestSource,
    transaction: RefCell<Option<Rc<NativeTransaction>>>,
    state: RefCell<RequestState>,
    success_listeners: RefCell<Vec<SuccessListener>>,
    error_listeners: RefCell<Vec<ErrorListener>>,
    upgrade_listeners: RefCell<Vec<VersionChangeListener>>,
    blocked_listeners: RefCell<Vec<VersionChangeListener>>,
}

impl NativeRequest {
    pub(crate) fn new(source: RequestSource, transaction: Option<Rc<NativeTransaction>>) -> Rc<Self> {
        Rc::new(Self {
            id: HandleId::next(),
            source,
            transaction: RefCell::new(transaction),
            state: RefCell::new(RequestState::Pending),
            success_listeners: RefCell::new(Vec::new()),
            error_listeners: RefCell::new(Vec::new()),
            upgrade_listeners: RefCell::new(Vec::new()),
            blocked_listeners: RefCell::new(Vec::new()),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn source(&self) -> RequestSource {
        self.source.clone()
    }

    pub fn transaction(&self) -> Option<Rc<NativeTransaction>> {
        self.transaction.borrow().clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        match &*self.state.borrow() {
            RequestState::Pending => ReadyState::Pending,
            RequestState::Done(_) => ReadyState::Done,
        }
    }

    pub fn result(&self) -> Option<RequestResult> {
        match &*self.state.borrow() {
            RequestState::Done(Ok(result)) => Some(result.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<DbError> {
        match &*self.state.borrow() {
            RequestState::Done(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<RequestResult>> {
        match &*self.state.borrow() {
            RequestState::Pending => None,
            RequestState::Done(outcome) => Some(outcome.clone()),
        }
    }

    pub fn add_success_listener(&self, listener: SuccessListener) {
        self.success_listeners.borrow_mut().push(listener);
    }

    pub fn add_error_listener(&self, listener: ErrorListener) {
        self.error_listeners.borrow_mut().push(listener);
    }

    /// Open requests only: runs when the database needs an upgrade.
    pub fn add_upgrade_listener(&self, listener: VersionChangeListener) {
        self.upgrade_listeners.borrow_mut().push(listener);
    }

    /// Open and delete requests only: runs when other connections stay open.
    pub fn add_blocked_listener(&self, listener: VersionChangeListener) {
        self.blocked_listeners.borrow_mut().push(listener);
    }

    // ------------------------------------------------------------------
    // Engine side
    // ------------------------------------------------------------------

    pub(crate) fn succeed(&self, result: RequestResult) {
        trace!(request = %self.id, result = ?result, "request succeeded");
        *self.state.borrow_mut() = RequestState::Done(Ok(result.clone()));
        let listeners = std::mem::take(&mut *self.success_listeners.borrow_mut());
        let stale = std::mem::take(&mut *self.error_listeners.borrow_mut());
        drop(stale);
        for listener in listeners {
            listener(&result);
        }
    }

    pub(crate) fn fail(&self, error: DbError) {
        trace!(request = %self.id, error = %error, "request failed");
        *self.state.borrow_mut() = RequestState::Done(Err(error.clone()));
        let listeners = std::mem::take(&mut *self.error_listeners.borrow_mut());
        let stale = std::mem::take(&mut *self.success_listeners.borrow_mut());
        drop(stale);
        for listener in listeners {
            listener(&error);
        }
    }

    /// Record a result without notifying; used while an upgrade runs.
    pub(crate) fn set_result(&self, result: RequestResult) {
        *self.state.borrow_mut() = RequestState::Done(Ok(result));
    }

    /// Back to pending before a cursor fires again.
    pub(crate) fn reset(&self) {
        *self.state.borrow_mut() = RequestState::Pending;
    }

    /// Drop a held result; breaks the cursor/request cycle.
    pub(crate) fn clear_result(&self) {
        let mut state = self.state.borrow_mut();
        if matches!(&*state, RequestState::Done(Ok(RequestResult::Cursor(Some(_))))) {
            *state = RequestState::Done(Ok(RequestResult::Cursor(None)));
        }
    }

    pub(crate) fn set_transaction(&self, transaction: Option<Rc<NativeTransaction>>) {
        *self.transaction.borrow_mut() = transaction;
    }

    pub(crate) fn fire_upgrade(&self, event: &VersionChangeEvent) {
        let listeners = std::mem::take(&mut *self.upgrade_listeners.borrow_mut());
        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn fire_blocked(&self, event: &VersionChangeEvent) {
        let listeners = std::mem::take(&mut *self.blocked_listeners.borrow_mut());
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_request_fires_listeners_once() {
        let request = NativeRequest::new(RequestSource::Factory, None);
        let hits = Rc::new(Cell::new(0));
        let errors = Rc::new(Cell::new(0));
        {
            let hits = hits.clone();
            request.add_success_listener(Box::new(move |_| hits.set(hits.get() + 1)));
            let errors = errors.clone();
            request.add_error_listener(Box::new(move |_| errors.set(errors.get() + 1)));
        }
        assert_eq!(request.ready_state(), ReadyState::Pending);
        request.succeed(RequestResult::Count(3));
        request.fail(DbError::aborted());
        assert_eq!(hits.get(), 1);
        assert_eq!(errors.get(), 0);
        assert_eq!(request.ready_state(), ReadyState::Done);
    }

    #[test]
    fn test_outcome_reflects_error() {
        let request = NativeRequest::new(RequestSource::Factory, None);
        assert!(request.outcome().is_none());
        request.fail(DbError::ConstraintViolation("dup".into()));
        assert_eq!(request.error().map(|e| e.name()), Some("ConstraintError"));
        assert!(request.result().is_none());
    }
}
