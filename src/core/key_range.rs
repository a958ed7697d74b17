use super::{DbError, Key, Result, Value};
use serde::{Deserialize, Serialize};

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    /// Exactly one key.
    pub fn only(key: impl Into<Key>) -> Result<Self> {
        let key = key.into();
        key.validate()?;
        Ok(Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        })
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Result<Self> {
        let key = key.into();
        key.validate()?;
        Ok(Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: true,
        })
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Result<Self> {
        let key = key.into();
        key.validate()?;
        Ok(Self {
            lower: None,
            upper: Some(key),
            lower_open: true,
            upper_open: open,
        })
    }

    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let lower = lower.into();
        let upper = upper.into();
        lower.validate()?;
        upper.validate()?;
        if lower > upper || (lower == upper && (lower_open || upper_open)) {
            return Err(DbError::DataError(format!(
                "empty key range: lower {} is not below upper {}",
                lower, upper
            )));
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    /// The range covering every key.
    pub fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: true,
            upper_open: true,
        }
    }

    pub fn includes(&self, key: &Key) -> bool {
        !self.is_below(key) && !self.is_above(key)
    }

    /// `key` sorts before the start of the range.
    pub fn is_below(&self, key: &Key) -> bool {
        match &self.lower {
            Some(lower) if self.lower_open => key <= lower,
            Some(lower) => key < lower,
            None => false,
        }
    }

    /// `key` sorts after the end of the range.
    pub fn is_above(&self, key: &Key) -> bool {
        match &self.upper {
            Some(upper) if self.upper_open => key >= upper,
            Some(upper) => key > upper,
            None => false,
        }
    }
}

/// What a read, count, delete or cursor operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Query {
    #[default]
    All,
    Key(Key),
    Range(KeyRange),
}

impl Query {
    pub fn to_range(&self) -> KeyRange {
        match self {
            Self::All => KeyRange::unbounded(),
            Self::Key(key) => KeyRange {
                lower: Some(key.clone()),
                upper: Some(key.clone()),
                lower_open: false,
                upper_open: false,
            },
            Self::Range(range) => range.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Key(key) => key.validate(),
            _ => Ok(()),
        }
    }

    /// Interpret a plain value as a query: null selects everything.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::All);
        }
        Key::try_from(value).map(Self::Key)
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Self::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Self::Range(range)
    }
}

impl From<&str> for Query {
    fn from(key: &str) -> Self {
        Self::Key(Key::from(key))
    }
}

impl From<i64> for Query {
    fn from(key: i64) -> Self {
        Self::Key(Key::from(key))
    }
}

impl From<i32> for Query {
    fn from(key: i32) -> Self {
        Self::Key(Key::from(key))
    }
}

impl From<Option<Key>> for Query {
    fn from(key: Option<Key>) -> Self {
        key.map_or(Self::All, Self::Key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_includes() {
        let range = KeyRange::bound(2, 5, true, false).unwrap();
        assert!(!range.includes(&Key::from(2)));
        assert!(range.includes(&Key::from(3)));
        assert!(range.includes(&Key::from(5)));
        assert!(!range.includes(&Key::from(6)));
        assert!(range.is_below(&Key::from(1)));
        assert!(range.is_above(&Key::from(6)));
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(matches!(KeyRange::bound(5, 2, false, false), Err(DbError::DataError(_))));
        assert!(KeyRange::bound(3, 3, false, true).is_err());
        assert!(KeyRange::bound(3, 3, false, false).is_ok());
    }

    #[test]
    fn test_query_from_value() {
        assert_eq!(Query::from_value(&Value::Null).unwrap(), Query::All);
        assert_eq!(Query::from_value(&Value::from("k")).unwrap(), Query::from("k"));
        assert!(Query::from_value(&Value::Boolean(true)).is_err());
    }
}
