//! Record keys, key ranges and key path evaluation
//!
//! Keys follow the object-store ordering: every number sorts before every
//! string, every string before every array, and arrays compare element by
//! element. Records are plain `serde_json::Value`s; a key path such as
//! `"meta.id"` walks nested objects.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::engine::EngineError;

/// A primary or index key.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Build a numeric key. `NaN` is not a valid key.
    pub fn number(n: f64) -> Option<Key> {
        if n.is_nan() {
            return None;
        }
        // -0 and 0 are the same key
        Some(Key::Number(if n == 0.0 { 0.0 } else { n }))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert back into a JSON value. Whole numbers become integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
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
        write!(f, "{}", self.to_value())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::String(s.clone())
    }
}

macro_rules! key_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Key {
                fn from(n: $t) -> Self {
                    Key::Number(n as f64)
                }
            }
        )*
    };
}

key_from_int!(i32, i64, u32, u64, usize);

impl TryFrom<f64> for Key {
    type Error = EngineError;

    fn try_from(n: f64) -> Result<Self, Self::Error> {
        Key::number(n).ok_or_else(|| EngineError::data("NaN is not a valid key"))
    }
}

impl TryFrom<&Value> for Key {
    type Error = EngineError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(Key::number)
                .ok_or_else(|| EngineError::data(format!("{} is not a valid key", n))),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Key::Array),
            other => Err(EngineError::data(format!("{} is not a valid key", other))),
        }
    }
}

impl TryFrom<Value> for Key {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Key::try_from(&value)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Key::try_from(&value).map_err(serde::de::Error::custom)
    }
}

/// A contiguous interval over keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

fn bound_of(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

impl KeyRange {
    /// Matches exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Everything above `key`.
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound_of(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Everything below `key`.
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound_of(key.into(), open),
        }
    }

    /// Everything between `lower` and `upper`.
    ///
    /// Fails with `DataError` when the interval is empty by construction.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, EngineError> {
        let (lower, upper) = (lower.into(), upper.into());
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(EngineError::data(format!(
                    "lower bound {} is greater than upper bound {}",
                    lower, upper
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(EngineError::data(format!(
                    "empty range: bounds are both {} and one end is open",
                    lower
                )))
            }
            _ => {}
        }
        Ok(Self {
            lower: bound_of(lower, lower_open),
            upper: bound_of(upper, upper_open),
        })
    }

    pub fn lower(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&Key> {
        self.upper.as_ref()
    }

    /// Whether `key` falls inside the range.
    pub fn includes(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Walk `path` (dot separated) into `value`. The empty path is the value itself.
pub fn evaluate_key_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// The key found at `path`, if present and valid.
pub fn extract_key(value: &Value, path: &str) -> Option<Key> {
    evaluate_key_path(value, path).and_then(|v| Key::try_from(v).ok())
}

/// Write `key` into `value` at `path`, creating intermediate objects.
pub fn inject_key(value: &mut Value, path: &str, key: &Key) -> Result<(), EngineError> {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            EngineError::data(format!("cannot inject key at '{}': not an object", path))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_value());
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    Err(EngineError::data("empty key path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_type_ordering() {
        let mut keys = vec![
            Key::Array(vec![Key::from(1)]),
            Key::from("b"),
            Key::from(10),
            Key::from("a"),
            Key::from(-3),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::from(-3),
                Key::from(10),
                Key::from("a"),
                Key::from("b"),
                Key::Array(vec![Key::from(1)]),
            ]
        );
    }

    #[test]
    fn test_nan_and_negative_zero() {
        assert!(Key::number(f64::NAN).is_none());
        assert_eq!(Key::number(-0.0).unwrap(), Key::from(0));
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::try_from(&json!("a1")).unwrap(), Key::from("a1"));
        assert_eq!(Key::try_from(&json!(7)).unwrap(), Key::from(7));
        assert!(Key::try_from(&json!(null)).is_err());
        assert!(Key::try_from(&json!({"a": 1})).is_err());
        assert!(Key::try_from(&json!([1, true])).is_err());
    }

    #[test]
    fn test_whole_numbers_serialize_as_integers() {
        assert_eq!(Key::from(3).to_value(), json!(3));
        assert_eq!(Key::try_from(2.5).unwrap().to_value(), json!(2.5));
    }

    #[test]
    fn test_range_includes() {
        let range = KeyRange::bound(2, 5, false, true).unwrap();
        assert!(!range.includes(&Key::from(1)));
        assert!(range.includes(&Key::from(2)));
        assert!(range.includes(&Key::from(4)));
        assert!(!range.includes(&Key::from(5)));

        assert!(KeyRange::only("x").includes(&Key::from("x")));
        assert!(KeyRange::lower_bound(3, true).includes(&Key::from("any string")));
        assert!(!KeyRange::upper_bound(3, false).includes(&Key::from(4)));
    }

    #[test]
    fn test_invalid_bounds() {
        let err = KeyRange::bound(5, 2, false, false).unwrap_err();
        assert_eq!(err.name, "DataError");
        assert!(KeyRange::bound(2, 2, true, false).is_err());
        assert!(KeyRange::bound(2, 2, false, false).is_ok());
    }

    #[test]
    fn test_nested_key_path() {
        let record = json!({"meta": {"id": "m-1"}, "title": "X"});
        assert_eq!(extract_key(&record, "meta.id"), Some(Key::from("m-1")));
        assert_eq!(extract_key(&record, "meta.missing"), None);
        assert_eq!(extract_key(&record, "title.deeper"), None);
    }

    #[test]
    fn test_inject_key() {
        let mut record = json!({"title": "X"});
        inject_key(&mut record, "meta.id", &Key::from(4)).unwrap();
        assert_eq!(record, json!({"title": "X", "meta": {"id": 4}}));

        let mut scalar = json!("plain");
        assert!(inject_key(&mut scalar, "id", &Key::from(1)).is_err());
    }

    #[test]
    fn test_scalar_accessors() {
        assert_eq!(Key::from("a1").as_str(), Some("a1"));
        assert_eq!(Key::from("a1").as_f64(), None);
        assert_eq!(Key::from(7).as_f64(), Some(7.0));
        assert_eq!(Key::from(7).as_str(), None);
        assert_eq!(Key::number(-0.0).and_then(|k| k.as_f64()), Some(0.0));
        assert_eq!(Key::Array(vec![Key::from(1)]).as_str(), None);
    }
}
