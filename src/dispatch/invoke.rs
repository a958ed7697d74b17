use super::{lookup, OpClass};
use crate::connection::{IndexParams, StoreParams};
use crate::core::{DbError, Key, KeyPath, KeyRange, Query, Result, Value};
use crate::engine::{CursorDirection, ReadyState, TransactionMode};
use crate::facade::{
    Cursor, CursorIterator, Database, Done, Index, ObjectStore, Pending, Resolved, Transaction,
    WrappedRequest,
};
use crate::identity::{NativeHandle, Wrapped};
use crate::promise::Promised;
use std::fmt;
use tracing::trace;

/// An argument to a reflective call.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Range(KeyRange),
    Names(Vec<String>),
    Mode(TransactionMode),
    Direction(CursorDirection),
    /// Unwrapped before the call; a store or index stands for its name.
    Handle(Wrapped),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Self::Value(Value::from(text))
    }
}

impl From<i64> for Arg {
    fn from(number: i64) -> Self {
        Self::Value(Value::from(number))
    }
}

impl From<Key> for Arg {
    fn from(key: Key) -> Self {
        Self::Value(key.to_value())
    }
}

impl From<KeyRange> for Arg {
    fn from(range: KeyRange) -> Self {
        Self::Range(range)
    }
}

impl From<Vec<&str>> for Arg {
    fn from(names: Vec<&str>) -> Self {
        Self::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl From<TransactionMode> for Arg {
    fn from(mode: TransactionMode) -> Self {
        Self::Mode(mode)
    }
}

impl From<CursorDirection> for Arg {
    fn from(direction: CursorDirection) -> Self {
        Self::Direction(direction)
    }
}

impl From<Wrapped> for Arg {
    fn from(handle: Wrapped) -> Self {
        Self::Handle(handle)
    }
}

/// What a reflective call produced.
pub enum Outcome {
    Value(Value),
    Names(Vec<String>),
    Unit,
    /// An optional attribute that is not there.
    Absent,
    Handle(Wrapped),
    Pending(Pending<Resolved>),
    Done(Done),
    Iterator(CursorIterator),
}

impl Outcome {
    /// Await whatever is pending and reduce the outcome to plain data.
    ///
    /// Iterators are drained into an array of cursor positions.
    pub async fn settle(self) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Names(names) => Ok(Value::Array(names.into_iter().map(Value::from).collect())),
            Self::Unit | Self::Absent => Ok(Value::Null),
            Self::Handle(handle) => Ok(describe(&handle)),
            Self::Pending(pending) => pending.await.map(|resolved| resolved.to_value()),
            Self::Done(done) => done.await.map(|()| Value::Null),
            Self::Iterator(mut iterator) => {
                let mut positions = Vec::new();
                while let Some(cursor) = iterator.next().await? {
                    positions.push(cursor.position().to_value());
                }
                Ok(Value::Array(positions))
            }
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Names(names) => f.debug_tuple("Names").field(names).finish(),
            Self::Unit => f.write_str("Unit"),
            Self::Absent => f.write_str("Absent"),
            Self::Handle(handle) => f.debug_tuple("Handle").field(handle).finish(),
            Self::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
            Self::Done(_) => f.write_str("Done"),
            Self::Iterator(iterator) => f.debug_tuple("Iterator").field(iterator).finish(),
        }
    }
}

fn describe(handle: &Wrapped) -> Value {
    Value::object([
        ("kind", Value::from(handle.kind().to_string())),
        ("id", Value::from(handle.unwrap_native().id().0 as i64)),
    ])
}

/// Call `name` on `target` by its camelCase name.
///
/// Misuse errors are returned synchronously; failures of the operation
/// itself arrive through the returned future.
pub fn invoke(target: &Wrapped, name: &str, args: Vec<Arg>) -> Result<Outcome> {
    let kind = target.kind();
    let spec = lookup(kind, name).ok_or_else(|| {
        DbError::UnsupportedOperation(format!("{} has no operation '{}'", kind, name))
    })?;
    trace!(%kind, op = spec.name, class = %spec.class, "invoke");
    let args = Args {
        op: spec.name,
        items: args,
    };
    let outcome = match target {
        Wrapped::Database(db) => on_database(db, spec.name, &args),
        Wrapped::Transaction(tx) => on_transaction(tx, spec.name, &args),
        Wrapped::ObjectStore(store) => on_store(store, spec.name, &args),
        Wrapped::Index(index) => on_index(index, spec.name, &args),
        Wrapped::Cursor(cursor) => on_cursor(cursor, spec.name, &args),
        Wrapped::Request(request) => on_request(request, spec.name),
    }?;
    debug_assert!(
        spec.class != OpClass::Request || matches!(outcome, Outcome::Pending(_)),
        "{}.{} must produce a future",
        kind,
        spec.name
    );
    Ok(outcome)
}

fn pending<T: 'static>(value: Promised<T>, wrap: impl FnOnce(T) -> Resolved + 'static) -> Outcome {
    Outcome::Pending(Pending::new(value, None).map(wrap))
}

fn shortcut<T: 'static>(value: Pending<T>, wrap: impl FnOnce(T) -> Resolved + 'static) -> Outcome {
    Outcome::Pending(value.map(wrap))
}

fn written(key: Key) -> Resolved {
    Resolved::Key(Some(key))
}

fn unit((): ()) -> Resolved {
    Resolved::Undefined
}

fn optional<T>(value: Option<T>, into: impl FnOnce(T) -> Outcome) -> Outcome {
    value.map_or(Outcome::Absent, into)
}

fn error_outcome(error: Option<DbError>) -> Outcome {
    optional(error, |error| {
        Outcome::Value(Value::object([
            ("name", Value::from(error.name())),
            ("message", Value::from(error.to_string())),
        ]))
    })
}

fn key_path_value(path: KeyPath) -> Value {
    match path {
        KeyPath::Single(path) => Value::from(path),
        KeyPath::Multi(paths) => Value::Array(paths.into_iter().map(Value::from).collect()),
    }
}

fn unsupported(op: &str) -> DbError {
    DbError::UnsupportedOperation(format!("'{}' is not dispatched", op))
}

fn on_database(db: &Database, op: &str, args: &Args) -> Result<Outcome> {
    Ok(match op {
        "name" => Outcome::Value(Value::from(db.name())),
        "version" => Outcome::Value(Value::from(db.version() as i64)),
        "objectStoreNames" => Outcome::Names(db.object_store_names()),
        "close" => {
            db.close();
            Outcome::Unit
        }
        "deleteObjectStore" => {
            db.delete_object_store(&args.string(0)?)?;
            Outcome::Unit
        }
        "transaction" => {
            let names = args.names(0)?;
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            Outcome::Handle(Wrapped::Transaction(db.transaction(&names, args.mode(1)?)?))
        }
        "createObjectStore" => {
            let store = db.create_object_store(&args.string(0)?, args.store_params(1)?)?;
            Outcome::Handle(Wrapped::ObjectStore(store))
        }
        "get" => shortcut(db.get(&args.string(0)?, args.query(1)?)?, Resolved::Value),
        "getKey" => shortcut(db.get_key(&args.string(0)?, args.query(1)?)?, Resolved::Key),
        "getAll" => shortcut(
            db.get_all(&args.string(0)?, args.query(1)?, args.count(2)?)?,
            Resolved::Values,
        ),
        "getAllKeys" => shortcut(
            db.get_all_keys(&args.string(0)?, args.query(1)?, args.count(2)?)?,
            Resolved::Keys,
        ),
        "count" => shortcut(db.count(&args.string(0)?, args.query(1)?)?, Resolved::Count),
        "put" => shortcut(
            db.put(&args.string(0)?, args.value(1)?, args.optional_key(2)?)?,
            written,
        ),
        "add" => shortcut(
            db.add(&args.string(0)?, args.value(1)?, args.optional_key(2)?)?,
            written,
        ),
        "delete" => shortcut(db.delete(&args.string(0)?, args.query(1)?)?, unit),
        "clear" => shortcut(db.clear(&args.string(0)?)?, unit),
        "getFromIndex" => shortcut(
            db.get_from_index(&args.string(0)?, &args.string(1)?, args.query(2)?)?,
            Resolved::Value,
        ),
        "getKeyFromIndex" => shortcut(
            db.get_key_from_index(&args.string(0)?, &args.string(1)?, args.query(2)?)?,
            Resolved::Key,
        ),
        "getAllFromIndex" => shortcut(
            db.get_all_from_index(&args.string(0)?, &args.string(1)?, args.query(2)?, args.count(3)?)?,
            Resolved::Values,
        ),
        "getAllKeysFromIndex" => shortcut(
            db.get_all_keys_from_index(&args.string(0)?, &args.string(1)?, args.query(2)?, args.count(3)?)?,
            Resolved::Keys,
        ),
        "countFromIndex" => shortcut(
            db.count_from_index(&args.string(0)?, &args.string(1)?, args.query(2)?)?,
            Resolved::Count,
        ),
        other => return Err(unsupported(other)),
    })
}

fn on_transaction(tx: &Transaction, op: &str, args: &Args) -> Result<Outcome> {
    Ok(match op {
        "mode" => Outcome::Value(Value::from(tx.mode().as_str())),
        "objectStoreNames" => Outcome::Names(tx.object_store_names()),
        "error" => error_outcome(tx.error()),
        "abort" => {
            tx.abort()?;
            Outcome::Unit
        }
        "commit" => {
            tx.commit()?;
            Outcome::Unit
        }
        "db" => Outcome::Handle(Wrapped::Database(tx.db())),
        "objectStore" => Outcome::Handle(Wrapped::ObjectStore(tx.object_store(&args.string(0)?)?)),
        "store" => optional(tx.store(), |store| Outcome::Handle(Wrapped::ObjectStore(store))),
        "done" => Outcome::Done(tx.done()),
        other => return Err(unsupported(other)),
    })
}

fn on_store(store: &ObjectStore, op: &str, args: &Args) -> Result<Outcome> {
    Ok(match op {
        "name" => Outcome::Value(Value::from(store.name())),
        "keyPath" => optional(store.key_path(), |path| Outcome::Value(key_path_value(path))),
        "autoIncrement" => Outcome::Value(Value::from(store.auto_increment())),
        "indexNames" => Outcome::Names(store.index_names()),
        "deleteIndex" => {
            store.delete_index(&args.string(0)?)?;
            Outcome::Unit
        }
        "transaction" => Outcome::Handle(Wrapped::Transaction(store.transaction())),
        "index" => Outcome::Handle(Wrapped::Index(store.index(&args.string(0)?)?)),
        "createIndex" => {
            let index = store.create_index(&args.string(0)?, args.key_path(1)?, args.index_params(2)?)?;
            Outcome::Handle(Wrapped::Index(index))
        }
        "get" => pending(store.get(args.query(0)?)?, Resolved::Value),
        "getKey" => pending(store.get_key(args.query(0)?)?, Resolved::Key),
        "getAll" => pending(store.get_all(args.query(0)?, args.count(1)?)?, Resolved::Values),
        "getAllKeys" => pending(store.get_all_keys(args.query(0)?, args.count(1)?)?, Resolved::Keys),
        "count" => pending(store.count(args.query(0)?)?, Resolved::Count),
        "put" => pending(store.put(args.value(0)?, args.optional_key(1)?)?, written),
        "add" => pending(store.add(args.value(0)?, args.optional_key(1)?)?, written),
        "delete" => pending(store.delete(args.query(0)?)?, unit),
        "clear" => pending(store.clear()?, unit),
        "openCursor" => pending(store.open_cursor(args.query(0)?, args.direction(1)?)?, Resolved::Cursor),
        "openKeyCursor" => pending(
            store.open_key_cursor(args.query(0)?, args.direction(1)?)?,
            Resolved::Cursor,
        ),
        "iterate" => Outcome::Iterator(store.iterate(args.query(0)?, args.direction(1)?)?),
        "iterateKeys" => Outcome::Iterator(store.iterate_keys(args.query(0)?, args.direction(1)?)?),
        other => return Err(unsupported(other)),
    })
}

fn on_index(index: &Index, op: &str, args: &Args) -> Result<Outcome> {
    Ok(match op {
        "name" => Outcome::Value(Value::from(index.name())),
        "keyPath" => optional(index.key_path(), |path| Outcome::Value(key_path_value(path))),
        "unique" => Outcome::Value(Value::from(index.unique())),
        "multiEntry" => Outcome::Value(Value::from(index.multi_entry())),
        "objectStore" => Outcome::Handle(Wrapped::ObjectStore(index.object_store())),
        "get" => pending(index.get(args.query(0)?)?, Resolved::Value),
        "getKey" => pending(index.get_key(args.query(0)?)?, Resolved::Key),
        "getAll" => pending(index.get_all(args.query(0)?, args.count(1)?)?, Resolved::Values),
        "getAllKeys" => pending(index.get_all_keys(args.query(0)?, args.count(1)?)?, Resolved::Keys),
        "count" => pending(index.count(args.query(0)?)?, Resolved::Count),
        "openCursor" => pending(index.open_cursor(args.query(0)?, args.direction(1)?)?, Resolved::Cursor),
        "openKeyCursor" => pending(
            index.open_key_cursor(args.query(0)?, args.direction(1)?)?,
            Resolved::Cursor,
        ),
        "iterate" => Outcome::Iterator(index.iterate(args.query(0)?, args.direction(1)?)?),
        "iterateKeys" => Outcome::Iterator(index.iterate_keys(args.query(0)?, args.direction(1)?)?),
        other => return Err(unsupported(other)),
    })
}

fn on_cursor(cursor: &Cursor, op: &str, args: &Args) -> Result<Outcome> {
    Ok(match op {
        "key" => optional(cursor.key(), |key| Outcome::Value(key.to_value())),
        "primaryKey" => optional(cursor.primary_key(), |key| Outcome::Value(key.to_value())),
        "value" => optional(cursor.value(), Outcome::Value),
        "direction" => Outcome::Value(Value::from(cursor.direction().as_str())),
        "source" => Outcome::Handle(cursor.source()),
        "advance" => pending(cursor.advance(args.number(0)?)?, Resolved::Cursor),
        "continue" => pending(cursor.continue_to(args.optional_key(0)?)?, Resolved::Cursor),
        "continuePrimaryKey" => pending(
            cursor.continue_primary_key(args.key(0)?, args.key(1)?)?,
            Resolved::Cursor,
        ),
        "update" => pending(cursor.update(args.value(0)?)?, written),
        "delete" => pending(cursor.delete()?, unit),
        "iterate" => Outcome::Iterator(cursor.iterate()),
        other => return Err(unsupported(other)),
    })
}

fn on_request(request: &WrappedRequest, op: &str) -> Result<Outcome> {
    Ok(match op {
        "readyState" => Outcome::Value(Value::from(match request.ready_state() {
            ReadyState::Pending => "pending",
            ReadyState::Done => "done",
        })),
        "result" => optional(request.result(), |result| Outcome::Value(result.to_value())),
        "error" => error_outcome(request.error()),
        "source" => optional(request.source(), Outcome::Handle),
        "transaction" => optional(request.transaction(), |tx| Outcome::Handle(Wrapped::Transaction(tx))),
        other => return Err(unsupported(other)),
    })
}

// ============================================================================
// Argument decoding
// ============================================================================

struct Args {
    op: &'static str,
    items: Vec<Arg>,
}

impl Args {
    fn get(&self, i: usize) -> Option<&Arg> {
        self.items.get(i)
    }

    fn mismatch(&self, i: usize, wanted: &str) -> DbError {
        match self.get(i) {
            Some(found) => DbError::TypeMismatch(format!(
                "{}: argument {} must be {}, got {:?}",
                self.op, i, wanted, found
            )),
            None => DbError::TypeMismatch(format!("{}: missing argument {} ({})", self.op, i, wanted)),
        }
    }

    /// A name; a wrapped store, index or connection stands for its own name.
    fn string(&self, i: usize) -> Result<String> {
        match self.get(i) {
            Some(Arg::Value(Value::Text(text))) => Ok(text.clone()),
            Some(Arg::Handle(handle)) => match handle.unwrap_native() {
                NativeHandle::ObjectStore(store) => Ok(store.name().to_string()),
                NativeHandle::Index(index) => Ok(index.name().to_string()),
                NativeHandle::Database(db) => Ok(db.name().to_string()),
                _ => Err(self.mismatch(i, "a name")),
            },
            _ => Err(self.mismatch(i, "a name")),
        }
    }

    fn names(&self, i: usize) -> Result<Vec<String>> {
        match self.get(i) {
            Some(Arg::Names(names)) => Ok(names.clone()),
            Some(Arg::Value(Value::Array(items))) => items
                .iter()
                .map(|item| match item {
                    Value::Text(text) => Ok(text.clone()),
                    _ => Err(self.mismatch(i, "a list of names")),
                })
                .collect(),
            _ => self.string(i).map(|name| vec![name]),
        }
    }

    fn query(&self, i: usize) -> Result<Query> {
        match self.get(i) {
            None => Ok(Query::All),
            Some(Arg::Value(value)) => Query::from_value(value),
            Some(Arg::Range(range)) => Ok(Query::Range(range.clone())),
            Some(_) => Err(self.mismatch(i, "a key or key range")),
        }
    }

    fn key(&self, i: usize) -> Result<Key> {
        match self.get(i) {
            Some(Arg::Value(value)) => Key::try_from(value),
            _ => Err(self.mismatch(i, "a key")),
        }
    }

    fn optional_key(&self, i: usize) -> Result<Option<Key>> {
        match self.get(i) {
            None | Some(Arg::Value(Value::Null)) => Ok(None),
            _ => self.key(i).map(Some),
        }
    }

    fn value(&self, i: usize) -> Result<Value> {
        match self.get(i) {
            Some(Arg::Value(value)) => Ok(value.clone()),
            _ => Err(self.mismatch(i, "a value")),
        }
    }

    fn number(&self, i: usize) -> Result<u32> {
        match self.get(i) {
            Some(Arg::Value(Value::Integer(n))) => u32::try_from(*n).map_err(|_| self.mismatch(i, "a count")),
            _ => Err(self.mismatch(i, "a count")),
        }
    }

    fn count(&self, i: usize) -> Result<Option<u32>> {
        match self.get(i) {
            None | Some(Arg::Value(Value::Null)) => Ok(None),
            _ => self.number(i).map(Some),
        }
    }

    fn mode(&self, i: usize) -> Result<TransactionMode> {
        const MODES: [TransactionMode; 3] = [
            TransactionMode::ReadOnly,
            TransactionMode::ReadWrite,
            TransactionMode::VersionChange,
        ];
        match self.get(i) {
            None => Ok(TransactionMode::default()),
            Some(Arg::Mode(mode)) => Ok(*mode),
            Some(Arg::Value(Value::Text(text))) => MODES
                .into_iter()
                .find(|mode| mode.as_str() == text.as_str())
                .ok_or_else(|| self.mismatch(i, "a transaction mode")),
            Some(_) => Err(self.mismatch(i, "a transaction mode")),
        }
    }

    fn direction(&self, i: usize) -> Result<CursorDirection> {
        const DIRECTIONS: [CursorDirection; 4] = [
            CursorDirection::Next,
            CursorDirection::NextUnique,
            CursorDirection::Prev,
            CursorDirection::PrevUnique,
        ];
        match self.get(i) {
            None | Some(Arg::Value(Value::Null)) => Ok(CursorDirection::default()),
            Some(Arg::Direction(direction)) => Ok(*direction),
            Some(Arg::Value(Value::Text(text))) => DIRECTIONS
                .into_iter()
                .find(|direction| direction.as_str() == text.as_str())
                .ok_or_else(|| self.mismatch(i, "a cursor direction")),
            Some(_) => Err(self.mismatch(i, "a cursor direction")),
        }
    }

    fn key_path(&self, i: usize) -> Result<KeyPath> {
        match self.get(i) {
            Some(Arg::Value(value)) => {
                parse_key_path(value).ok_or_else(|| self.mismatch(i, "a key path"))
            }
            _ => Err(self.mismatch(i, "a key path")),
        }
    }

    /// `{ keyPath, autoIncrement }`, both optional.
    fn store_params(&self, i: usize) -> Result<StoreParams> {
        let mut params = StoreParams::new();
        let Some(options) = self.options(i)? else {
            return Ok(params);
        };
        match options.field("keyPath") {
            None | Some(Value::Null) => {}
            Some(path) => {
                params.key_path = Some(parse_key_path(path).ok_or_else(|| self.mismatch(i, "a key path"))?);
            }
        }
        params.auto_increment = flag(options, "autoIncrement");
        Ok(params)
    }

    /// `{ unique, multiEntry }`, both optional.
    fn index_params(&self, i: usize) -> Result<IndexParams> {
        Ok(match self.options(i)? {
            Some(options) => IndexParams::new()
                .unique(flag(options, "unique"))
                .multi_entry(flag(options, "multiEntry")),
            None => IndexParams::new(),
        })
    }

    fn options(&self, i: usize) -> Result<Option<&Value>> {
        match self.get(i) {
            None | Some(Arg::Value(Value::Null)) => Ok(None),
            Some(Arg::Value(value @ Value::Object(_))) => Ok(Some(value)),
            Some(_) => Err(self.mismatch(i, "an options object")),
        }
    }
}

fn flag(options: &Value, name: &str) -> bool {
    matches!(options.field(name), Some(Value::Boolean(true)))
}

fn parse_key_path(value: &Value) -> Option<KeyPath> {
    match value {
        Value::Text(path) => Some(KeyPath::Single(path.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(KeyPath::Multi),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: Vec<Arg>) -> Args {
        Args { op: "test", items }
    }

    #[test]
    fn test_missing_query_selects_everything() {
        assert_eq!(args(vec![]).query(0).unwrap(), Query::All);
        assert_eq!(
            args(vec![Arg::from("a")]).query(0).unwrap(),
            Query::Key(Key::from("a"))
        );
    }

    #[test]
    fn test_mode_from_text() {
        let parsed = args(vec![Arg::from("readwrite")]).mode(0).unwrap();
        assert_eq!(parsed, TransactionMode::ReadWrite);
        assert!(args(vec![Arg::from("sideways")]).mode(0).is_err());
        assert_eq!(args(vec![]).mode(0).unwrap(), TransactionMode::ReadOnly);
    }

    #[test]
    fn test_names_accept_single_name() {
        assert_eq!(args(vec![Arg::from("kv")]).names(0).unwrap(), vec!["kv".to_string()]);
        assert_eq!(
            args(vec![Arg::from(vec!["a", "b"])]).names(0).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_store_params() {
        let options = Value::object([
            ("keyPath", Value::from("id")),
            ("autoIncrement", Value::from(true)),
        ]);
        let params = args(vec![Arg::from("s"), Arg::from(options)]).store_params(1).unwrap();
        assert_eq!(params.key_path, Some(KeyPath::from("id")));
        assert!(params.auto_increment);
        assert_eq!(args(vec![]).store_params(0).unwrap(), StoreParams::new());
    }

    #[test]
    fn test_count_rejects_negative() {
        assert!(matches!(
            args(vec![Arg::from(-1_i64)]).count(0),
            Err(DbError::TypeMismatch(_))
        ));
        assert_eq!(args(vec![Arg::from(3_i64)]).count(0).unwrap(), Some(3));
    }
}
