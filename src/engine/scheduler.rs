// ============================================================================
// Cooperative Scheduler
// ============================================================================
//
// Two queues drive the engine:
// - tasks: engine events (request execution and dispatch, transaction
//   completion, open/delete progress), run one at a time in FIFO order;
// - microtasks: every woken future, polled until nothing can progress.
//
// A turn is one task followed by a microtask checkpoint. Transactions are
// deactivated at the end of every turn.
//
// ============================================================================

use crate::core::{DbError, Result};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::RemoteHandle;
use futures::task::{ArcWake, LocalSpawnExt};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) type Task = Box<dyn FnOnce()>;

pub(crate) struct Scheduler {
    tasks: RefCell<VecDeque<Task>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    driving: Cell<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            tasks: RefCell::new(VecDeque::new()),
            pool: RefCell::new(pool),
            spawner,
            driving: Cell::new(false),
        }
    }

    pub fn queue(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    pub fn pop(&self) -> Option<Task> {
        self.tasks.borrow_mut().pop_front()
    }

    pub fn spawn<F>(&self, future: F) -> Result<RemoteHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.spawner
            .spawn_local_with_handle(future)
            .map_err(|e| DbError::InvalidState(format!("cannot spawn task: {}", e)))
    }

    /// Poll spawned futures until none of them is woken.
    pub fn run_microtasks(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Mark the scheduler as driven; fails if it already is.
    pub fn enter(&self) -> Result<DriveGuard<'_>> {
        if self.driving.replace(true) {
            return Err(DbError::InvalidState(
                "the event loop is already being driven".into(),
            ));
        }
        Ok(DriveGuard {
            driving: &self.driving,
        })
    }
}

pub(crate) struct DriveGuard<'a> {
    driving: &'a Cell<bool>,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.driving.set(false);
    }
}

/// Waker of the future passed to `block_on`.
pub(crate) struct WakeFlag(AtomicBool);

impl WakeFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(true)))
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_tasks_run_fifo() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            scheduler.queue(Box::new(move || log.borrow_mut().push(i)));
        }
        while let Some(task) = scheduler.pop() {
            task();
        }
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_enter_is_exclusive() {
        let scheduler = Scheduler::new();
        let guard = scheduler.enter().unwrap();
        assert!(scheduler.enter().is_err());
        drop(guard);
        assert!(scheduler.enter().is_ok());
    }

    #[test]
    fn test_microtasks_run_until_stalled() {
        let scheduler = Scheduler::new();
        let handle = scheduler.spawn(async { 40 + 2 }).unwrap();
        scheduler.run_microtasks();
        let mut handle = Box::pin(handle);
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        assert_eq!(handle.as_mut().poll(&mut cx), std::task::Poll::Ready(42));
    }
}
