// ============================================================================
// Open / Delete Protocol
// ============================================================================
//
// Opening at a higher version and deleting both need every other connection
// to the database closed:
//
// 1. fire `versionchange` on each other open connection;
// 2. if any is still open, fire `blocked` on the request (once) and park it;
// 3. every time a connection to that database closes, retry parked requests;
// 4. run the upgrade (or the deletion).
//
// An upgrade creates the connection and its versionchange transaction, fires
// `upgradeneeded` with the transaction active, and settles the open request
// when that transaction commits or aborts.
//
// ============================================================================

use super::database::{NativeDatabase, VersionChangeEvent};
use super::records::DatabaseData;
use super::request::{NativeRequest, RequestResult, RequestSource};
use super::transaction::{NativeTransaction, TransactionMode};
use super::EngineCore;
use crate::core::{DbError, Result};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

pub(crate) struct PendingVersionChange {
    request: Rc<NativeRequest>,
    name: String,
    /// `None` for a deletion.
    version: Option<u32>,
}

impl EngineCore {
    pub(crate) fn open(self: &Rc<Self>, name: &str, version: Option<u32>) -> Result<Rc<NativeRequest>> {
        if version == Some(0) {
            return Err(DbError::TypeMismatch("version must be at least 1".into()));
        }
        let request = NativeRequest::new(RequestSource::Factory, None);
        let pending = PendingVersionChange {
            request: request.clone(),
            name: name.to_string(),
            version,
        };
        let engine = self.clone();
        self.queue(Box::new(move || engine.begin_open(pending)));
        Ok(request)
    }

    pub(crate) fn delete_database(self: &Rc<Self>, name: &str) -> Result<Rc<NativeRequest>> {
        let request = NativeRequest::new(RequestSource::Factory, None);
        let pending = PendingVersionChange {
            request: request.clone(),
            name: name.to_string(),
            version: None,
        };
        let engine = self.clone();
        self.queue(Box::new(move || engine.begin_delete(pending)));
        Ok(request)
    }

    pub(crate) fn terminate(&self, name: &str) {
        for connection in self.connections_to(name) {
            debug!(connection = %connection.id(), name, "connection terminated");
            connection.force_close(true);
        }
    }

    fn begin_open(self: &Rc<Self>, pending: PendingVersionChange) {
        let data = self
            .databases
            .borrow_mut()
            .entry(pending.name.clone())
            .or_insert_with(|| Rc::new(RefCell::new(DatabaseData::new(&pending.name))))
            .clone();
        let current = data.borrow().version;
        let target = pending.version.unwrap_or(current.max(1));

        if target < current {
            pending.request.fail(DbError::VersionError(format!(
                "requested version {} is below the current version {}",
                target, current
            )));
            return;
        }
        if target == current {
            let connection = NativeDatabase::new(self.clone(), data, current);
            pending.request.succeed(RequestResult::Database(connection));
            return;
        }

        let pending = PendingVersionChange {
            version: Some(target),
            ..pending
        };
        self.wait_for_connections(pending, current);
    }

    fn begin_delete(self: &Rc<Self>, pending: PendingVersionChange) {
        let Some(data) = self.database_data(&pending.name) else {
            pending.request.succeed(RequestResult::Undefined);
            return;
        };
        let current = data.borrow().version;
        self.wait_for_connections(pending, current);
    }

    fn wait_for_connections(self: &Rc<Self>, pending: PendingVersionChange, current: u32) {
        let event = VersionChangeEvent {
            old_version: current,
            new_version: pending.version,
        };
        for connection in self.connections_to(&pending.name) {
            if connection.state() == super::ConnectionState::Open {
                connection.fire_versionchange(&event);
            }
        }
        if self.connections_to(&pending.name).is_empty() {
            self.run_version_change(pending);
            return;
        }
        debug!(name = %pending.name, ?event, "version change blocked");
        pending.request.fire_blocked(&event);
        self.pending.borrow_mut().push(pending);
    }

    pub(crate) fn connection_closed(self: &Rc<Self>, name: &str) {
        if self.connections_to(name).is_empty() {
            let ready: Vec<PendingVersionChange> = {
                let mut pending = self.pending.borrow_mut();
                let (ready, waiting) = std::mem::take(&mut *pending)
                    .into_iter()
                    .partition(|p| p.name == name);
                *pending = waiting;
                ready
            };
            let mut ready = ready.into_iter();
            // one at a time: the next may be blocked by the connection the first opens
            if let Some(first) = ready.next() {
                let engine = self.clone();
                self.queue(Box::new(move || engine.run_version_change(first)));
            }
            self.pending.borrow_mut().extend(ready);
        }
    }

    fn run_version_change(self: &Rc<Self>, pending: PendingVersionChange) {
        if !self.connections_to(&pending.name).is_empty() {
            let current = self
                .database_data(&pending.name)
                .map_or(0, |data| data.borrow().version);
            self.wait_for_connections(pending, current);
            return;
        }
        match pending.version {
            None => self.finish_delete(pending),
            Some(version) => self.run_upgrade(pending, version),
        }
    }

    fn finish_delete(self: &Rc<Self>, pending: PendingVersionChange) {
        self.databases.borrow_mut().remove(&pending.name);
        debug!(name = %pending.name, "database deleted");
        pending.request.succeed(RequestResult::Undefined);
        self.retry_pending(&pending.name);
    }

    fn retry_pending(self: &Rc<Self>, name: &str) {
        let next = {
            let mut pending = self.pending.borrow_mut();
            pending
                .iter()
                .position(|p| p.name == name)
                .map(|i| pending.remove(i))
        };
        if let Some(next) = next {
            let engine = self.clone();
            self.queue(Box::new(move || match next.version {
                None => engine.begin_delete(next),
                Some(_) => engine.begin_open(next),
            }));
        }
    }

    fn run_upgrade(self: &Rc<Self>, pending: PendingVersionChange, version: u32) {
        let data = self
            .databases
            .borrow_mut()
            .entry(pending.name.clone())
            .or_insert_with(|| Rc::new(RefCell::new(DatabaseData::new(&pending.name))))
            .clone();
        let old_version = data.borrow().version;
        if version <= old_version {
            // another upgrade won the race while this one was parked
            self.begin_open(pending);
            return;
        }

        let connection = NativeDatabase::new(self.clone(), data.clone(), version);
        let scope = connection.object_store_names();
        let tx = NativeTransaction::new(
            self.clone(),
            connection.clone(),
            scope,
            TransactionMode::VersionChange,
        );
        connection.set_upgrade(&tx);
        data.borrow_mut().version = version;

        let request = pending.request;
        request.set_transaction(Some(tx.clone()));
        request.set_result(RequestResult::Database(connection.clone()));

        {
            let request = request.clone();
            let connection = connection.clone();
            let engine = self.clone();
            tx.add_complete_listener(Box::new(move || {
                request.set_transaction(None);
                engine.retry_pending(connection.name());
                if connection.state() == super::ConnectionState::Open {
                    request.succeed(RequestResult::Database(connection));
                } else {
                    request.fail(DbError::Aborted(
                        "connection was closed before the upgrade finished".into(),
                    ));
                }
            }));
        }
        {
            let request = request.clone();
            let connection = connection.clone();
            let engine = self.clone();
            let data = data.clone();
            tx.add_abort_listener(Box::new(move |_| {
                request.set_transaction(None);
                connection.set_version(old_version);
                if old_version == 0 {
                    // the database never existed
                    let mut databases = engine.databases.borrow_mut();
                    if databases
                        .get(connection.name())
                        .is_some_and(|current| Rc::ptr_eq(current, &data))
                    {
                        databases.remove(connection.name());
                    }
                }
                connection.force_close(false);
                request.fail(DbError::Aborted("version change transaction was aborted".into()));
            }));
        }

        let event = VersionChangeEvent {
            old_version,
            new_version: Some(version),
        };
        debug!(name = %connection.name(), old_version, version, "upgrade needed");
        request.fire_upgrade(&event);
    }
}
