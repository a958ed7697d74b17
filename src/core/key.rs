use super::{DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A record key.
///
/// Keys are totally ordered: every number sorts before every string, every
/// string before every byte string, every byte string before every array.
/// Arrays compare element by element, then by length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    Number(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    /// The smallest possible key.
    pub const MIN: Key = Key::Number(f64::NEG_INFINITY);

    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::String(_) => 1,
            Self::Binary(_) => 2,
            Self::Array(_) => 3,
        }
    }

    /// Reject keys the engine cannot order (NaN anywhere inside).
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Number(n) if n.is_nan() => Err(DbError::DataError("NaN is not a valid key".into())),
            Self::Array(items) => items.iter().try_for_each(Key::validate),
            _ => Ok(()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => {
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Value::Integer(*n as i64)
                } else {
                    Value::Float(*n)
                }
            }
            Self::String(s) => Value::Text(s.clone()),
            Self::Binary(b) => Value::Bytes(b.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Self::Array(items)
    }
}

impl TryFrom<&Value> for Key {
    type Error = DbError;

    fn try_from(value: &Value) -> Result<Self> {
        value
            .to_key()
            .ok_or_else(|| DbError::DataError(format!("{} value is not a valid key", value.type_name())))
    }
}

/// Where an in-line key lives inside a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A dotted path; the empty path designates the value itself.
    Single(String),
    /// Several paths whose keys form an array key.
    Multi(Vec<String>),
}

impl KeyPath {
    /// Extract the key a value carries under this path.
    pub fn evaluate(&self, value: &Value) -> Option<Key> {
        match self {
            Self::Single(path) => lookup(value, path).and_then(Value::to_key),
            Self::Multi(paths) => paths
                .iter()
                .map(|path| lookup(value, path).and_then(Value::to_key))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Whether a generated key could be injected into `value` under this path.
    pub fn can_inject(&self, value: &Value) -> bool {
        let Self::Single(path) = self else {
            return false;
        };
        let mut current = value;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let Value::Object(map) = current else {
                return false;
            };
            match map.get(*segment) {
                Some(next) if i + 1 < segments.len() => current = next,
                Some(_) => return false,
                None => return true,
            }
        }
        false
    }

    /// Write `key` into `value` under this path, creating intermediate objects.
    pub fn inject(&self, value: &mut Value, key: &Key) -> Result<()> {
        let Self::Single(path) = self else {
            return Err(DbError::DataError("cannot inject into a compound key path".into()));
        };
        let mut current = value;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Value::Object(map) = current else {
                return Err(DbError::DataError(format!(
                    "cannot inject key at '{}': not an object",
                    path
                )));
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), key.to_value());
                return Ok(());
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(BTreeMap::new()));
        }
        Ok(())
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::Single(path.to_string())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        Self::Multi(paths.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(path) => write!(f, "{}", path),
            Self::Multi(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.field(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_across_types() {
        assert!(Key::from(100) < Key::from("a"));
        assert!(Key::from("z") < Key::Binary(vec![0]));
        assert!(Key::Binary(vec![255]) < Key::Array(vec![]));
        assert!(Key::MIN < Key::from(-1e300));
    }

    #[test]
    fn test_array_keys_compare_elementwise() {
        let a = Key::from(vec![Key::from(1), Key::from("b")]);
        let b = Key::from(vec![Key::from(1), Key::from("c")]);
        let c = Key::from(vec![Key::from(1)]);
        assert!(a < b);
        assert!(c < a);
    }

    #[test]
    fn test_key_path_evaluate() {
        let value = Value::object([
            ("id", Value::Integer(4)),
            ("meta", Value::object([("slug", "four")])),
        ]);
        assert_eq!(KeyPath::from("id").evaluate(&value), Some(Key::from(4)));
        assert_eq!(KeyPath::from("meta.slug").evaluate(&value), Some(Key::from("four")));
        assert_eq!(
            KeyPath::from(vec!["id", "meta.slug"]).evaluate(&value),
            Some(Key::from(vec![Key::from(4), Key::from("four")]))
        );
        assert_eq!(KeyPath::from("missing").evaluate(&value), None);
    }

    #[test]
    fn test_key_path_inject() {
        let mut value = Value::object([("name", "x")]);
        let path = KeyPath::from("meta.id");
        assert!(path.can_inject(&value));
        path.inject(&mut value, &Key::from(9)).unwrap();
        assert_eq!(path.evaluate(&value), Some(Key::from(9)));
        assert!(!KeyPath::from("id").can_inject(&Value::Integer(1)));
    }
}
