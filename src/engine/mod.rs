//! In-process storage engine driven by a cooperative event loop.
//!
//! Every handle here is a native handle: operations that touch data return a
//! [`NativeRequest`] that fires exactly one success or error notification from
//! a later task. The future-based layer in [`crate::facade`] wraps these.

pub mod cursor;
pub mod database;
mod factory;
pub mod index;
pub(crate) mod records;
pub mod request;
mod scheduler;
pub mod store;
pub mod transaction;

pub use cursor::{CursorDirection, CursorSource, NativeCursor};
pub use database::{ConnectionState, NativeDatabase, VersionChangeEvent};
pub use index::NativeIndex;
pub use request::{ReadyState, NativeRequest, RequestResult, RequestSource};
pub use store::NativeObjectStore;
pub use transaction::{NativeTransaction, TransactionMode, TransactionState};

use crate::core::{DbError, Result};
use factory::PendingVersionChange;
use futures::future::RemoteHandle;
use records::DatabaseData;
use scheduler::{Scheduler, Task, WakeFlag};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tracing::info_span;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a native handle, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The storage engine: database factory plus the event loop.
///
/// Cloning is cheap and yields a handle to the same engine.
#[derive(Clone)]
pub struct Engine {
    core: Rc<EngineCore>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            core: Rc::new(EngineCore {
                id: HandleId::next(),
                scheduler: Scheduler::new(),
                databases: RefCell::new(HashMap::new()),
                connections: RefCell::new(Vec::new()),
                transactions: RefCell::new(Vec::new()),
                activated: RefCell::new(Vec::new()),
                pending: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Request a connection; `version` defaults to the current one (or 1).
    pub fn open(&self, name: &str, version: Option<u32>) -> Result<Rc<NativeRequest>> {
        self.core.open(name, version)
    }

    pub fn delete_database(&self, name: &str) -> Result<Rc<NativeRequest>> {
        self.core.delete_database(name)
    }

    /// Names and versions of every existing database, sorted by name.
    pub fn databases(&self) -> Vec<(String, u32)> {
        let mut list: Vec<(String, u32)> = self
            .core
            .databases
            .borrow()
            .iter()
            .map(|(name, data)| (name.clone(), data.borrow().version))
            .collect();
        list.sort();
        list
    }

    /// Force-close every connection to `name`, aborting their transactions.
    pub fn terminate(&self, name: &str) {
        self.core.terminate(name)
    }

    /// Drive the event loop until `future` resolves.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.core.block_on(future)
    }

    /// Run `future` concurrently with whatever is being driven.
    pub fn spawn<F>(&self, future: F) -> Result<RemoteHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.core.scheduler.spawn(future)
    }

    /// Run every queued task and woken future to completion.
    pub fn settle(&self) -> Result<()> {
        self.core.block_on(futures::future::pending::<Result<()>>())
            .or_else(|e| match e {
                DbError::Stalled(_) => Ok(()),
                other => Err(other),
            })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.core.id)
            .field("databases", &self.databases())
            .finish()
    }
}

pub(crate) struct EngineCore {
    id: HandleId,
    scheduler: Scheduler,
    databases: RefCell<HashMap<String, Rc<RefCell<DatabaseData>>>>,
    connections: RefCell<Vec<Weak<NativeDatabase>>>,
    /// Unfinished transactions in creation order.
    transactions: RefCell<Vec<Rc<NativeTransaction>>>,
    /// Transactions made active during the current turn.
    activated: RefCell<Vec<Rc<NativeTransaction>>>,
    pending: RefCell<Vec<PendingVersionChange>>,
}

impl EngineCore {
    pub(crate) fn queue(&self, task: Task) {
        self.scheduler.queue(task);
    }

    fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.scheduler.enter()?;
        let span = info_span!("event_loop", engine = %self.id);
        let _enter = span.enter();

        let flag = WakeFlag::new();
        let waker = futures::task::waker(flag.clone());
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);

        loop {
            // microtask checkpoint
            loop {
                if flag.take()
                    && let Poll::Ready(output) = future.as_mut().poll(&mut cx)
                {
                    self.end_turn();
                    return output;
                }
                self.scheduler.run_microtasks();
                if !flag.is_set() {
                    break;
                }
            }
            self.end_turn();

            match self.scheduler.pop() {
                Some(task) => task(),
                None if flag.is_set() => continue,
                None => {
                    return Err(DbError::Stalled(
                        "future is pending but no engine work remains".into(),
                    ));
                }
            }
        }
    }

    /// Deactivate this turn's transactions and commit the idle ones.
    fn end_turn(&self) {
        let activated = std::mem::take(&mut *self.activated.borrow_mut());
        for tx in activated {
            tx.deactivate();
        }
        let running = self.transactions.borrow().clone();
        for tx in running {
            tx.maybe_commit();
        }
    }

    pub(crate) fn activated(&self, tx: &Rc<NativeTransaction>) {
        self.activated.borrow_mut().push(tx.clone());
    }

    pub(crate) fn register_transaction(&self, tx: &Rc<NativeTransaction>) {
        self.transactions.borrow_mut().push(tx.clone());
    }

    pub(crate) fn unregister_transaction(&self, tx: &NativeTransaction) {
        self.transactions
            .borrow_mut()
            .retain(|t| !std::ptr::eq(Rc::as_ptr(t), tx));
    }

    /// Start every waiting transaction that no earlier one blocks.
    pub(crate) fn start_ready_transactions(&self) {
        let transactions = self.transactions.borrow().clone();
        for (i, tx) in transactions.iter().enumerate() {
            if tx.state() != TransactionState::Waiting {
                continue;
            }
            let blocked = transactions[..i]
                .iter()
                .any(|earlier| !earlier.is_finished() && earlier.conflicts_with(tx));
            if !blocked {
                tx.start();
            }
        }
    }

    pub(crate) fn register_connection(&self, connection: &Rc<NativeDatabase>) {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|c| c.strong_count() > 0);
        connections.push(Rc::downgrade(connection));
    }

    /// Open or closing connections to `name`.
    pub(crate) fn connections_to(&self, name: &str) -> Vec<Rc<NativeDatabase>> {
        self.connections
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.name() == name && c.state() != ConnectionState::Closed)
            .collect()
    }

    pub(crate) fn database_data(&self, name: &str) -> Option<Rc<RefCell<DatabaseData>>> {
        self.databases.borrow().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_ready_future() {
        let engine = Engine::new();
        assert_eq!(engine.block_on(async { Ok(7) }).unwrap(), 7);
    }

    #[test]
    fn test_block_on_reports_stall() {
        let engine = Engine::new();
        let result = engine.block_on(futures::future::pending::<Result<()>>());
        assert!(matches!(result, Err(DbError::Stalled(_))));
    }

    #[test]
    fn test_spawned_futures_run_to_completion() {
        let engine = Engine::new();
        let handle = engine.spawn(async { 5 }).unwrap();
        assert_eq!(engine.block_on(async move { Ok(handle.await) }).unwrap(), 5);
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
