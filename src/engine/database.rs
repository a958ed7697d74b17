use super::records::{DatabaseData, StoreData};
use super::store::NativeObjectStore;
use super::transaction::{NativeTransaction, TransactionMode};
use super::{EngineCore, HandleId};
use crate::core::{DbError, KeyPath, Result};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Old and new version carried by upgrade, blocked and versionchange
/// notifications. `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChangeEvent {
    pub old_version: u32,
    pub new_version: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// `close()` was called; waiting for transactions to finish.
    ClosePending,
    Closed,
}

pub type VersionChangeListener = Box<dyn FnMut(&VersionChangeEvent)>;
pub type CloseListener = Box<dyn FnOnce()>;

/// A connection to one database.
pub struct NativeDatabase {
    id: HandleId,
    engine: Rc<EngineCore>,
    name: String,
    data: Rc<RefCell<DatabaseData>>,
    version: Cell<u32>,
    state: Cell<ConnectionState>,
    transactions: RefCell<Vec<Weak<NativeTransaction>>>,
    upgrade: RefCell<Option<Weak<NativeTransaction>>>,
    versionchange_listeners: RefCell<Vec<VersionChangeListener>>,
    close_listeners: RefCell<Vec<CloseListener>>,
    closed_hooks: RefCell<Vec<CloseListener>>,
}

impl NativeDatabase {
    pub(crate) fn new(
        engine: Rc<EngineCore>,
        data: Rc<RefCell<DatabaseData>>,
        version: u32,
    ) -> Rc<Self> {
        let name = data.borrow().name.clone();
        let db = Rc::new(Self {
            id: HandleId::next(),
            engine: engine.clone(),
            name,
            data,
            version: Cell::new(version),
            state: Cell::new(ConnectionState::Open),
            transactions: RefCell::new(Vec::new()),
            upgrade: RefCell::new(None),
            versionchange_listeners: RefCell::new(Vec::new()),
            close_listeners: RefCell::new(Vec::new()),
            closed_hooks: RefCell::new(Vec::new()),
        });
        debug!(connection = %db.id, name = %db.name, version, "connection opened");
        engine.register_connection(&db);
        db
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.data.borrow().stores.keys().cloned().collect()
    }

    pub fn transaction(
        self: &Rc<Self>,
        names: &[&str],
        mode: TransactionMode,
    ) -> Result<Rc<NativeTransaction>> {
        if self.state.get() != ConnectionState::Open {
            return Err(DbError::InvalidState("connection is closing".into()));
        }
        if self.upgrade_transaction().is_some() {
            return Err(DbError::InvalidState(
                "a version change transaction is running".into(),
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(DbError::TypeMismatch(
                "versionchange transactions are created by open".into(),
            ));
        }
        if names.is_empty() {
            return Err(DbError::InvalidAccess(
                "a transaction needs at least one object store".into(),
            ));
        }
        let mut scope: Vec<String> = Vec::with_capacity(names.len());
        {
            let data = self.data.borrow();
            for name in names {
                if !data.stores.contains_key(*name) {
                    return Err(DbError::NotFound(format!(
                        "object store '{}' not found",
                        name
                    )));
                }
                scope.push(name.to_string());
            }
        }
        scope.sort();
        scope.dedup();
        let tx = NativeTransaction::new(self.engine.clone(), self.clone(), scope, mode);
        self.track(&tx);
        Ok(tx)
    }

    pub fn create_object_store(
        &self,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Result<Rc<NativeObjectStore>> {
        let tx = self.active_upgrade()?;
        if auto_increment && key_path_is_invalid_for_generator(key_path.as_ref()) {
            return Err(DbError::InvalidAccess(
                "a key generator needs a non-empty, non-compound key path".into(),
            ));
        }
        {
            let mut data = self.data.borrow_mut();
            if data.stores.contains_key(name) {
                return Err(DbError::ConstraintViolation(format!(
                    "object store '{}' already exists",
                    name
                )));
            }
            data.stores
                .insert(name.to_string(), StoreData::new(name, key_path, auto_increment));
        }
        debug!(connection = %self.id, store = name, "object store created");
        tx.object_store(name)
    }

    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        let tx = self.active_upgrade()?;
        if self.data.borrow_mut().stores.remove(name).is_none() {
            return Err(DbError::NotFound(format!("object store '{}' not found", name)));
        }
        tx.forget_store(name);
        debug!(connection = %self.id, store = name, "object store deleted");
        Ok(())
    }

    /// Close once every transaction of this connection has finished.
    pub fn close(&self) {
        if self.state.get() == ConnectionState::Open {
            debug!(connection = %self.id, "connection closing");
            self.state.set(ConnectionState::ClosePending);
        }
        self.try_finish_close();
    }

    /// Runs when another connection wants to upgrade or delete the database.
    pub fn add_versionchange_listener(&self, listener: VersionChangeListener) {
        self.versionchange_listeners.borrow_mut().push(listener);
    }

    /// Runs when the engine force-closes this connection.
    pub fn add_close_listener(&self, listener: CloseListener) {
        self.close_listeners.borrow_mut().push(listener);
    }

    // ------------------------------------------------------------------
    // Engine side
    // ------------------------------------------------------------------

    pub(crate) fn data(&self) -> Rc<RefCell<DatabaseData>> {
        self.data.clone()
    }

    pub(crate) fn set_version(&self, version: u32) {
        self.version.set(version);
    }

    /// Runs whenever the connection reaches `Closed`, forced or not.
    pub(crate) fn add_closed_hook(&self, hook: CloseListener) {
        if self.state.get() == ConnectionState::Closed {
            hook();
        } else {
            self.closed_hooks.borrow_mut().push(hook);
        }
    }

    pub(crate) fn set_upgrade(&self, tx: &Rc<NativeTransaction>) {
        *self.upgrade.borrow_mut() = Some(Rc::downgrade(tx));
        self.track(tx);
    }

    fn upgrade_transaction(&self) -> Option<Rc<NativeTransaction>> {
        self.upgrade
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|tx| !tx.is_finished())
    }

    fn active_upgrade(&self) -> Result<Rc<NativeTransaction>> {
        let tx = self.upgrade_transaction().ok_or_else(|| {
            DbError::InvalidState("schema changes need a version change transaction".into())
        })?;
        tx.ensure_active()?;
        Ok(tx)
    }

    fn track(&self, tx: &Rc<NativeTransaction>) {
        let mut transactions = self.transactions.borrow_mut();
        transactions.retain(|t| t.upgrade().is_some_and(|t| !t.is_finished()));
        transactions.push(Rc::downgrade(tx));
    }

    fn has_unfinished_transactions(&self) -> bool {
        self.transactions
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .any(|tx| !tx.is_finished())
    }

    pub(crate) fn transaction_finished(&self) {
        self.try_finish_close();
    }

    fn try_finish_close(&self) {
        if self.state.get() != ConnectionState::ClosePending || self.has_unfinished_transactions() {
            return;
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        self.state.set(ConnectionState::Closed);
        debug!(connection = %self.id, name = %self.name, "connection closed");
        let hooks = std::mem::take(&mut *self.closed_hooks.borrow_mut());
        for hook in hooks {
            hook();
        }
        self.engine.connection_closed(&self.name);
    }

    /// Close immediately, aborting every unfinished transaction.
    pub(crate) fn force_close(&self, notify: bool) {
        if self.state.get() == ConnectionState::Closed {
            return;
        }
        self.state.set(ConnectionState::ClosePending);
        let transactions: Vec<Rc<NativeTransaction>> = self
            .transactions
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for tx in transactions {
            tx.abort_with(Some(DbError::Aborted("connection was closed".into())));
        }
        self.mark_closed();
        if notify {
            let listeners = std::mem::take(&mut *self.close_listeners.borrow_mut());
            for listener in listeners {
                listener();
            }
        }
    }

    pub(crate) fn fire_versionchange(&self, event: &VersionChangeEvent) {
        let mut listeners = std::mem::take(&mut *self.versionchange_listeners.borrow_mut());
        for listener in listeners.iter_mut() {
            listener(event);
        }
        let mut slot = self.versionchange_listeners.borrow_mut();
        listeners.append(&mut slot);
        *slot = listeners;
    }
}

fn key_path_is_invalid_for_generator(key_path: Option<&KeyPath>) -> bool {
    match key_path {
        Some(KeyPath::Single(path)) => path.is_empty(),
        Some(KeyPath::Multi(_)) => true,
        None => false,
    }
}

impl fmt::Debug for NativeDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDatabase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version.get())
            .field("state", &self.state.get())
            .finish()
    }
}
