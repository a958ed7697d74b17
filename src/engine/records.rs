// ============================================================================
// Record Storage
// ============================================================================
//
// Object stores keep records in a persistent ordered map so that a
// transaction can take an O(1) snapshot at start and restore it on abort.
// Index entries are (index key, primary key) pairs in a persistent ordered
// set; duplicates of one index key sort by primary key.
//
// ============================================================================

use super::cursor::CursorDirection;
use crate::core::{DbError, Key, KeyPath, KeyRange, Result, Value};
use im::{OrdMap, OrdSet};
use std::ops::Bound;

/// Largest key the generator may produce (2^53).
const MAX_GENERATED_KEY: u64 = 1 << 53;

/// Schema and contents of one named database.
#[derive(Debug, Clone)]
pub(crate) struct DatabaseData {
    pub name: String,
    pub version: u32,
    pub stores: OrdMap<String, StoreData>,
}

impl DatabaseData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            stores: OrdMap::new(),
        }
    }

    pub fn store(&self, name: &str) -> Result<&StoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("object store '{}' not found", name)))
    }

    pub fn store_mut(&mut self, name: &str) -> Result<&mut StoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("object store '{}' not found", name)))
    }
}

/// A cursor position: the key it sits on and the record's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Position {
    pub key: Key,
    pub primary_key: Key,
}

/// Optional destination of a cursor step (`continue` / `continuePrimaryKey`).
#[derive(Debug, Clone, Default)]
pub(crate) struct StepTarget {
    pub key: Option<Key>,
    pub primary_key: Option<Key>,
}

#[derive(Debug, Clone)]
pub struct StoreData {
    name: String,
    key_path: Option<KeyPath>,
    auto_increment: bool,
    current_number: u64,
    records: OrdMap<Key, Value>,
    indexes: OrdMap<String, IndexData>,
}

impl StoreData {
    pub fn new(name: impl Into<String>, key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        Self {
            name: name.into(),
            key_path,
            auto_increment,
            current_number: 1,
            records: OrdMap::new(),
            indexes: OrdMap::new(),
        }
    }

    pub fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub fn index(&self, name: &str) -> Result<&IndexData> {
        self.indexes
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("index '{}' not found on '{}'", name, self.name)))
    }

    /// Check the key arguments of a write before it is queued.
    pub fn validate_write(&self, value: &Value, key: Option<&Key>) -> Result<()> {
        match (&self.key_path, key) {
            (Some(_), Some(_)) => Err(DbError::DataError(format!(
                "'{}' uses in-line keys; an explicit key is not allowed",
                self.name
            ))),
            (Some(path), None) => match path.evaluate(value) {
                Some(key) => key.validate(),
                None if self.auto_increment && path.can_inject(value) => Ok(()),
                None => Err(DbError::DataError(format!(
                    "value has no valid key at path '{}'",
                    path
                ))),
            },
            (None, Some(key)) => key.validate(),
            (None, None) if self.auto_increment => Ok(()),
            (None, None) => Err(DbError::DataError(format!(
                "'{}' uses out-of-line keys and has no key generator; a key is required",
                self.name
            ))),
        }
    }

    /// Insert or overwrite a record. Returns the effective key.
    pub fn store_record(&mut self, mut value: Value, key: Option<Key>, no_overwrite: bool) -> Result<Key> {
        let key = match (self.key_path.clone(), key) {
            (Some(path), _) => match path.evaluate(&value) {
                Some(key) => key,
                None => {
                    let key = self.generate_key()?;
                    path.inject(&mut value, &key)?;
                    key
                }
            },
            (None, Some(key)) => key,
            (None, None) => self.generate_key()?,
        };
        self.bump_generator(&key);

        if no_overwrite && self.records.contains_key(&key) {
            return Err(DbError::ConstraintViolation(format!(
                "a record with key {} already exists in '{}'",
                key, self.name
            )));
        }

        let index_keys: Vec<(String, Vec<Key>)> = self
            .indexes
            .iter()
            .map(|(name, index)| (name.clone(), index.keys_for(&value)))
            .collect();

        for (name, keys) in &index_keys {
            let Some(index) = self.indexes.get(name) else {
                continue;
            };
            if !index.unique {
                continue;
            }
            if let Some(conflict) = keys.iter().find(|k| index.has_other(k, &key)) {
                return Err(DbError::ConstraintViolation(format!(
                    "unique index '{}' already contains key {}",
                    name, conflict
                )));
            }
        }

        self.remove_record(&key);
        for (name, keys) in index_keys {
            if let Some(index) = self.indexes.get_mut(&name) {
                for k in keys {
                    index.entries.insert((k, key.clone()));
                }
            }
        }
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn generate_key(&mut self) -> Result<Key> {
        if !self.auto_increment {
            return Err(DbError::DataError(format!(
                "'{}' has no key generator",
                self.name
            )));
        }
        if self.current_number > MAX_GENERATED_KEY {
            return Err(DbError::ConstraintViolation(format!(
                "key generator of '{}' is exhausted",
                self.name
            )));
        }
        let key = Key::Number(self.current_number as f64);
        self.current_number += 1;
        Ok(key)
    }

    fn bump_generator(&mut self, key: &Key) {
        if !self.auto_increment {
            return;
        }
        if let Some(n) = key.as_number()
            && n >= self.current_number as f64
        {
            let next = n.floor() + 1.0;
            self.current_number = if next > MAX_GENERATED_KEY as f64 {
                MAX_GENERATED_KEY + 1
            } else {
                next as u64
            };
        }
    }

    fn remove_record(&mut self, key: &Key) -> bool {
        let Some(old) = self.records.remove(key) else {
            return false;
        };
        for name in self.index_names() {
            if let Some(index) = self.indexes.get_mut(&name) {
                for k in index.keys_for(&old) {
                    index.entries.remove(&(k, key.clone()));
                }
            }
        }
        true
    }

    pub fn delete_range(&mut self, range: &KeyRange) -> usize {
        let keys: Vec<Key> = self.keys_in(range).cloned().collect();
        keys.iter().filter(|key| self.remove_record(key)).count()
    }

    pub fn clear(&mut self) {
        self.records = OrdMap::new();
        for name in self.index_names() {
            if let Some(index) = self.indexes.get_mut(&name) {
                index.entries = OrdSet::new();
            }
        }
    }

    fn entries_in<'a>(&'a self, range: &'a KeyRange) -> impl Iterator<Item = (&'a Key, &'a Value)> + 'a {
        self.records
            .range((lower_bound(range), upper_bound(range)))
    }

    fn keys_in<'a>(&'a self, range: &'a KeyRange) -> impl Iterator<Item = &'a Key> + 'a {
        self.entries_in(range).map(|(k, _)| k)
    }

    pub fn get(&self, range: &KeyRange) -> Option<Value> {
        self.entries_in(range).next().map(|(_, v)| v.clone())
    }

    pub fn get_key(&self, range: &KeyRange) -> Option<Key> {
        self.keys_in(range).next().cloned()
    }

    pub fn get_all(&self, range: &KeyRange, count: Option<u32>) -> Vec<Value> {
        self.entries_in(range)
            .take(limit(count))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn get_all_keys(&self, range: &KeyRange, count: Option<u32>) -> Vec<Key> {
        self.keys_in(range).take(limit(count)).cloned().collect()
    }

    pub fn count(&self, range: &KeyRange) -> u64 {
        self.entries_in(range).count() as u64
    }

    pub fn record(&self, key: &Key) -> Option<&Value> {
        self.records.get(key)
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Create and populate an index.
    ///
    /// `Err` means the index was not created. `Ok(Some(err))` means it was
    /// created but existing records violate its uniqueness; the owning
    /// transaction must abort with `err`.
    pub fn create_index(
        &mut self,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<Option<DbError>> {
        if self.indexes.contains_key(name) {
            return Err(DbError::ConstraintViolation(format!(
                "index '{}' already exists on '{}'",
                name, self.name
            )));
        }
        if multi_entry && key_path.is_multi() {
            return Err(DbError::InvalidAccess(
                "a multi-entry index cannot use a compound key path".into(),
            ));
        }

        let mut index = IndexData {
            key_path,
            unique,
            multi_entry,
            entries: OrdSet::new(),
        };
        let mut violation = None;
        for (primary_key, value) in self.records.iter() {
            for k in index.keys_for(value) {
                if unique && violation.is_none() && index.has_other(&k, primary_key) {
                    violation = Some(DbError::ConstraintViolation(format!(
                        "existing records violate unique index '{}' at key {}",
                        name, k
                    )));
                }
                index.entries.insert((k, primary_key.clone()));
            }
        }
        self.indexes.insert(name.to_string(), index);
        Ok(violation)
    }

    pub fn delete_index(&mut self, name: &str) -> Result<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("index '{}' not found on '{}'", name, self.name)))
    }

    pub fn index_get(&self, index: &str, range: &KeyRange) -> Result<Option<Value>> {
        let index = self.index(index)?;
        Ok(index
            .entries_in(range)
            .next()
            .and_then(|(_, pk)| self.records.get(pk).cloned()))
    }

    pub fn index_get_key(&self, index: &str, range: &KeyRange) -> Result<Option<Key>> {
        let index = self.index(index)?;
        Ok(index.entries_in(range).next().map(|(_, pk)| pk.clone()))
    }

    pub fn index_get_all(&self, index: &str, range: &KeyRange, count: Option<u32>) -> Result<Vec<Value>> {
        let index = self.index(index)?;
        Ok(index
            .entries_in(range)
            .take(limit(count))
            .filter_map(|(_, pk)| self.records.get(pk).cloned())
            .collect())
    }

    pub fn index_get_all_keys(&self, index: &str, range: &KeyRange, count: Option<u32>) -> Result<Vec<Key>> {
        let index = self.index(index)?;
        Ok(index
            .entries_in(range)
            .take(limit(count))
            .map(|(_, pk)| pk.clone())
            .collect())
    }

    pub fn index_count(&self, index: &str, range: &KeyRange) -> Result<u64> {
        Ok(self.index(index)?.entries_in(range).count() as u64)
    }

    // ------------------------------------------------------------------
    // Cursor stepping
    // ------------------------------------------------------------------

    /// Next record position of a store cursor, if any.
    pub(crate) fn step_store(
        &self,
        range: &KeyRange,
        direction: CursorDirection,
        from: Option<&Key>,
        target: Option<&Key>,
    ) -> Option<Position> {
        let found = if direction.is_forward() {
            let start = match from {
                Some(key) => Bound::Excluded(key.clone()),
                None => lower_bound(range),
            };
            self.records
                .range((start, Bound::Unbounded))
                .map(|(k, _)| k)
                .skip_while(|k| range.is_below(k))
                .take_while(|k| !range.is_above(k))
                .find(|k| target.is_none_or(|t| *k >= t))
                .cloned()
        } else {
            let end = match from {
                Some(key) => Bound::Excluded(key.clone()),
                None => upper_bound(range),
            };
            self.records
                .range((Bound::Unbounded, end))
                .rev()
                .map(|(k, _)| k)
                .skip_while(|k| range.is_above(k))
                .take_while(|k| !range.is_below(k))
                .find(|k| target.is_none_or(|t| *k <= t))
                .cloned()
        };
        found.map(|key| Position {
            primary_key: key.clone(),
            key,
        })
    }

    /// Next entry position of an index cursor, if any.
    pub(crate) fn step_index(
        &self,
        index: &str,
        range: &KeyRange,
        direction: CursorDirection,
        from: Option<&Position>,
        target: &StepTarget,
    ) -> Result<Option<Position>> {
        let index = self.index(index)?;
        let unique = direction.is_unique();

        let found = if direction.is_forward() {
            let start = match from {
                Some(p) => Bound::Excluded((p.key.clone(), p.primary_key.clone())),
                None => match &range.lower {
                    Some(lower) => Bound::Included((lower.clone(), Key::MIN)),
                    None => Bound::Unbounded,
                },
            };
            index
                .entries
                .range((start, Bound::Unbounded))
                .skip_while(|(k, _)| range.is_below(k))
                .skip_while(|(k, _)| unique && from.is_some_and(|p| *k == p.key))
                .take_while(|(k, _)| !range.is_above(k))
                .find(|(k, pk)| match &target.key {
                    None => true,
                    Some(t) => {
                        k > t || (k == t && target.primary_key.as_ref().is_none_or(|tp| pk >= tp))
                    }
                })
                .cloned()
        } else {
            let end = match from {
                Some(p) => Bound::Excluded((p.key.clone(), p.primary_key.clone())),
                None => Bound::Unbounded,
            };
            let last = index
                .entries
                .range((Bound::Unbounded, end))
                .rev()
                .skip_while(|(k, _)| range.is_above(k))
                .skip_while(|(k, _)| unique && from.is_some_and(|p| *k == p.key))
                .take_while(|(k, _)| !range.is_below(k))
                .find(|(k, pk)| match &target.key {
                    None => true,
                    Some(t) => {
                        k < t || (k == t && target.primary_key.as_ref().is_none_or(|tp| pk <= tp))
                    }
                })
                .cloned();
            // prevunique lands on the first duplicate of the key it finds
            match last {
                Some((k, _)) if unique => index
                    .entries
                    .range((Bound::Included((k.clone(), Key::MIN)), Bound::Unbounded))
                    .next()
                    .cloned(),
                other => other,
            }
        };
        Ok(found.map(|(key, primary_key)| Position { key, primary_key }))
    }
}

#[derive(Debug, Clone)]
pub struct IndexData {
    key_path: KeyPath,
    unique: bool,
    multi_entry: bool,
    entries: OrdSet<(Key, Key)>,
}

impl IndexData {
    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn multi_entry(&self) -> bool {
        self.multi_entry
    }

    /// Index keys a record contributes.
    fn keys_for(&self, value: &Value) -> Vec<Key> {
        match self.key_path.evaluate(value) {
            Some(Key::Array(items)) if self.multi_entry => {
                let mut keys: Vec<Key> = Vec::with_capacity(items.len());
                for item in items {
                    if !keys.contains(&item) {
                        keys.push(item);
                    }
                }
                keys
            }
            Some(key) => vec![key],
            None => Vec::new(),
        }
    }

    /// Another record already holds `key` in this index.
    fn has_other(&self, key: &Key, primary_key: &Key) -> bool {
        self.entries
            .range((Bound::Included((key.clone(), Key::MIN)), Bound::Unbounded))
            .take_while(|(k, _)| k == key)
            .any(|(_, pk)| pk != primary_key)
    }

    fn entries_in<'a>(&'a self, range: &'a KeyRange) -> impl Iterator<Item = &'a (Key, Key)> + 'a {
        let start = match &range.lower {
            Some(lower) => Bound::Included((lower.clone(), Key::MIN)),
            None => Bound::Unbounded,
        };
        self.entries
            .range((start, Bound::Unbounded))
            .skip_while(move |(k, _)| range.is_below(k))
            .take_while(move |(k, _)| !range.is_above(k))
    }
}

fn lower_bound(range: &KeyRange) -> Bound<Key> {
    match &range.lower {
        Some(key) if range.lower_open => Bound::Excluded(key.clone()),
        Some(key) => Bound::Included(key.clone()),
        None => Bound::Unbounded,
    }
}

fn upper_bound(range: &KeyRange) -> Bound<Key> {
    match &range.upper {
        Some(key) if range.upper_open => Bound::Excluded(key.clone()),
        Some(key) => Bound::Included(key.clone()),
        None => Bound::Unbounded,
    }
}

fn limit(count: Option<u32>) -> usize {
    match count {
        Some(0) | None => usize::MAX,
        Some(n) => n as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Query;

    fn store_with(keys: &[i64]) -> StoreData {
        let mut store = StoreData::new("s", None, false);
        for k in keys {
            store
                .store_record(Value::Integer(*k * 10), Some(Key::from(*k)), false)
                .unwrap();
        }
        store
    }

    #[test]
    fn test_put_and_get() {
        let store = store_with(&[3, 1, 2]);
        assert_eq!(store.get(&Query::from(2).to_range()), Some(Value::Integer(20)));
        assert_eq!(
            store.get_all_keys(&KeyRange::unbounded(), None),
            vec![Key::from(1), Key::from(2), Key::from(3)]
        );
        assert_eq!(store.count(&KeyRange::lower_bound(2, false).unwrap()), 2);
    }

    #[test]
    fn test_add_rejects_existing_key() {
        let mut store = store_with(&[1]);
        let err = store
            .store_record(Value::Integer(0), Some(Key::from(1)), true)
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
    }

    #[test]
    fn test_key_generator_and_injection() {
        let mut store = StoreData::new("s", Some(KeyPath::from("id")), true);
        let k1 = store
            .store_record(Value::object([("name", "a")]), None, false)
            .unwrap();
        assert_eq!(k1, Key::from(1));
        store
            .store_record(Value::object([("id", Value::Integer(10))]), None, false)
            .unwrap();
        let k3 = store
            .store_record(Value::object([("name", "c")]), None, false)
            .unwrap();
        assert_eq!(k3, Key::from(11));
        let stored = store.record(&k1).unwrap();
        assert_eq!(stored.field("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_unique_index_violation() {
        let mut store = StoreData::new("users", Some(KeyPath::from("id")), false);
        store.create_index("by_email", KeyPath::from("email"), true, false).unwrap();
        store
            .store_record(Value::object([("id", Value::Integer(1)), ("email", Value::from("a@x"))]), None, false)
            .unwrap();
        let err = store
            .store_record(Value::object([("id", Value::Integer(2)), ("email", Value::from("a@x"))]), None, false)
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        // overwriting the same record keeps its own index entry
        store
            .store_record(Value::object([("id", Value::Integer(1)), ("email", Value::from("a@x"))]), None, false)
            .unwrap();
    }

    #[test]
    fn test_multi_entry_index() {
        let mut store = StoreData::new("posts", Some(KeyPath::from("id")), false);
        store.create_index("tags", KeyPath::from("tags"), false, true).unwrap();
        store
            .store_record(
                Value::object([
                    ("id", Value::Integer(1)),
                    ("tags", Value::Array(vec!["a".into(), "b".into(), "a".into()])),
                ]),
                None,
                false,
            )
            .unwrap();
        assert_eq!(store.index_count("tags", &KeyRange::unbounded()).unwrap(), 2);
        assert_eq!(
            store.index_get_key("tags", &Query::from("b").to_range()).unwrap(),
            Some(Key::from(1))
        );
    }

    #[test]
    fn test_step_store_directions() {
        let store = store_with(&[1, 2, 3, 4]);
        let all = KeyRange::unbounded();
        let first = store.step_store(&all, CursorDirection::Next, None, None).unwrap();
        assert_eq!(first.key, Key::from(1));
        let after = store
            .step_store(&all, CursorDirection::Next, Some(&first.key), Some(&Key::from(3)))
            .unwrap();
        assert_eq!(after.key, Key::from(3));
        let last = store.step_store(&all, CursorDirection::Prev, None, None).unwrap();
        assert_eq!(last.key, Key::from(4));
        assert!(store
            .step_store(&all, CursorDirection::Next, Some(&Key::from(4)), None)
            .is_none());
    }

    #[test]
    fn test_step_index_unique_directions() {
        let mut store = StoreData::new("s", None, false);
        store.create_index("by_v", KeyPath::from("v"), false, false).unwrap();
        for (pk, v) in [(1, "a"), (2, "a"), (3, "b"), (4, "b")] {
            store
                .store_record(Value::object([("v", v)]), Some(Key::from(pk)), false)
                .unwrap();
        }
        let all = KeyRange::unbounded();
        let none = StepTarget::default();
        let first = store
            .step_index("by_v", &all, CursorDirection::NextUnique, None, &none)
            .unwrap()
            .unwrap();
        assert_eq!(first.primary_key, Key::from(1));
        let second = store
            .step_index("by_v", &all, CursorDirection::NextUnique, Some(&first), &none)
            .unwrap()
            .unwrap();
        assert_eq!((second.key.clone(), second.primary_key.clone()), (Key::from("b"), Key::from(3)));
        let prev_unique = store
            .step_index("by_v", &all, CursorDirection::PrevUnique, None, &none)
            .unwrap()
            .unwrap();
        assert_eq!(prev_unique.primary_key, Key::from(3));
    }
}
