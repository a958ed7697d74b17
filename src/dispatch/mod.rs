// ============================================================================
// Reflective Dispatch
// ============================================================================
//
// Every operation a wrapped handle answers to is listed in OPERATIONS, keyed
// by (handle kind, camelCase name). The class decides how `invoke` treats the
// native result:
//
//   Passthrough    plain attribute or side effect, returned as is
//   Request        native request, promisified, result wrapped
//   Handle         native handle, wrapped synchronously
//   Synthesized    derived from the handle (done, store, iterate)
//   CursorAdvance  cursor request that resolves to the cursor or absent
//
// ============================================================================

mod invoke;

pub use invoke::{invoke, Arg, Outcome};

use crate::identity::HandleKind;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpClass {
    Passthrough,
    Request,
    Handle,
    Synthesized,
    CursorAdvance,
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Passthrough => "passthrough",
            Self::Request => "request",
            Self::Handle => "handle",
            Self::Synthesized => "synthesized",
            Self::CursorAdvance => "cursor-advance",
        };
        f.write_str(name)
    }
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationSpec {
    pub kind: HandleKind,
    pub name: &'static str,
    pub class: OpClass,
    /// Needs a readwrite transaction.
    pub writes: bool,
}

const fn op(kind: HandleKind, name: &'static str, class: OpClass) -> OperationSpec {
    OperationSpec {
        kind,
        name,
        class,
        writes: false,
    }
}

const fn write(kind: HandleKind, name: &'static str, class: OpClass) -> OperationSpec {
    OperationSpec {
        kind,
        name,
        class,
        writes: true,
    }
}

use HandleKind::{Cursor, Database, Index, ObjectStore, Request, Transaction};
use OpClass::{CursorAdvance, Handle, Passthrough, Synthesized};

pub static OPERATIONS: &[OperationSpec] = &[
    // connection
    op(Database, "name", Passthrough),
    op(Database, "version", Passthrough),
    op(Database, "objectStoreNames", Passthrough),
    op(Database, "close", Passthrough),
    op(Database, "deleteObjectStore", Passthrough),
    op(Database, "transaction", Handle),
    op(Database, "createObjectStore", Handle),
    op(Database, "get", OpClass::Request),
    op(Database, "getKey", OpClass::Request),
    op(Database, "getAll", OpClass::Request),
    op(Database, "getAllKeys", OpClass::Request),
    op(Database, "count", OpClass::Request),
    write(Database, "put", OpClass::Request),
    write(Database, "add", OpClass::Request),
    write(Database, "delete", OpClass::Request),
    write(Database, "clear", OpClass::Request),
    op(Database, "getFromIndex", OpClass::Request),
    op(Database, "getKeyFromIndex", OpClass::Request),
    op(Database, "getAllFromIndex", OpClass::Request),
    op(Database, "getAllKeysFromIndex", OpClass::Request),
    op(Database, "countFromIndex", OpClass::Request),
    // transaction
    op(Transaction, "mode", Passthrough),
    op(Transaction, "objectStoreNames", Passthrough),
    op(Transaction, "error", Passthrough),
    op(Transaction, "abort", Passthrough),
    op(Transaction, "commit", Passthrough),
    op(Transaction, "db", Handle),
    op(Transaction, "objectStore", Handle),
    op(Transaction, "store", Synthesized),
    op(Transaction, "done", Synthesized),
    // object store
    op(ObjectStore, "name", Passthrough),
    op(ObjectStore, "keyPath", Passthrough),
    op(ObjectStore, "autoIncrement", Passthrough),
    op(ObjectStore, "indexNames", Passthrough),
    op(ObjectStore, "deleteIndex", Passthrough),
    op(ObjectStore, "transaction", Handle),
    op(ObjectStore, "index", Handle),
    op(ObjectStore, "createIndex", Handle),
    op(ObjectStore, "get", OpClass::Request),
    op(ObjectStore, "getKey", OpClass::Request),
    op(ObjectStore, "getAll", OpClass::Request),
    op(ObjectStore, "getAllKeys", OpClass::Request),
    op(ObjectStore, "count", OpClass::Request),
    write(ObjectStore, "put", OpClass::Request),
    write(ObjectStore, "add", OpClass::Request),
    write(ObjectStore, "delete", OpClass::Request),
    write(ObjectStore, "clear", OpClass::Request),
    op(ObjectStore, "openCursor", OpClass::Request),
    op(ObjectStore, "openKeyCursor", OpClass::Request),
    op(ObjectStore, "iterate", Synthesized),
    op(ObjectStore, "iterateKeys", Synthesized),
    // index
    op(Index, "name", Passthrough),
    op(Index, "keyPath", Passthrough),
    op(Index, "unique", Passthrough),
    op(Index, "multiEntry", Passthrough),
    op(Index, "objectStore", Handle),
    op(Index, "get", OpClass::Request),
    op(Index, "getKey", OpClass::Request),
    op(Index, "getAll", OpClass::Request),
    op(Index, "getAllKeys", OpClass::Request),
    op(Index, "count", OpClass::Request),
    op(Index, "openCursor", OpClass::Request),
    op(Index, "openKeyCursor", OpClass::Request),
    op(Index, "iterate", Synthesized),
    op(Index, "iterateKeys", Synthesized),
    // cursor
    op(Cursor, "key", Passthrough),
    op(Cursor, "primaryKey", Passthrough),
    op(Cursor, "value", Passthrough),
    op(Cursor, "direction", Passthrough),
    op(Cursor, "source", Handle),
    op(Cursor, "advance", CursorAdvance),
    op(Cursor, "continue", CursorAdvance),
    op(Cursor, "continuePrimaryKey", CursorAdvance),
    write(Cursor, "update", OpClass::Request),
    write(Cursor, "delete", OpClass::Request),
    op(Cursor, "iterate", Synthesized),
    // request
    op(Request, "readyState", Passthrough),
    op(Request, "result", Passthrough),
    op(Request, "error", Passthrough),
    op(Request, "source", Handle),
    op(Request, "transaction", Handle),
];

/// The table row for `name` on a handle of `kind`.
pub fn lookup(kind: HandleKind, name: &str) -> Option<&'static OperationSpec> {
    OPERATIONS
        .iter()
        .find(|spec| spec.kind == kind && spec.name == name)
}

/// How `invoke` treats `name` on a handle of `kind`; `None` if unsupported.
pub fn classify(kind: HandleKind, name: &str) -> Option<OpClass> {
    lookup(kind, name).map(|spec| spec.class)
}

/// Every operation supported on `kind`, in table order.
pub fn operations_of(kind: HandleKind) -> impl Iterator<Item = &'static OperationSpec> {
    OPERATIONS.iter().filter(move |spec| spec.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_classify() {
        assert_eq!(classify(HandleKind::ObjectStore, "get"), Some(OpClass::Request));
        assert_eq!(classify(HandleKind::Database, "transaction"), Some(OpClass::Handle));
        assert_eq!(classify(HandleKind::Transaction, "done"), Some(OpClass::Synthesized));
        assert_eq!(classify(HandleKind::Cursor, "continue"), Some(OpClass::CursorAdvance));
        assert_eq!(classify(HandleKind::Index, "put"), None);
        assert_eq!(classify(HandleKind::ObjectStore, "drop"), None);
    }

    #[test]
    fn test_rows_are_unique() {
        let mut seen = HashSet::new();
        for spec in OPERATIONS {
            assert!(seen.insert((spec.kind, spec.name)), "duplicate {}.{}", spec.kind, spec.name);
        }
    }

    #[test]
    fn test_writes_are_requests() {
        for spec in OPERATIONS.iter().filter(|spec| spec.writes) {
            assert_eq!(spec.class, OpClass::Request, "{}.{}", spec.kind, spec.name);
        }
        assert!(lookup(HandleKind::Database, "put").is_some_and(|spec| spec.writes));
        assert!(lookup(HandleKind::Database, "get").is_some_and(|spec| !spec.writes));
    }

    #[test]
    fn test_operations_of_kind() {
        let cursor_ops: Vec<&str> = operations_of(HandleKind::Cursor).map(|spec| spec.name).collect();
        assert!(cursor_ops.contains(&"advance"));
        assert!(cursor_ops.iter().all(|name| classify(HandleKind::Cursor, name).is_some()));
    }
}
