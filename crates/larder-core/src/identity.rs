//! Identity generator for records that do not carry a key yet

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field name used for generated identifiers.
pub const GUID_FIELD: &str = "guid";

/// A random v4 identifier in canonical hyphenated form.
pub fn guid() -> String {
    Uuid::new_v4().to_string()
}

/// Ensure a JSON record has a string `guid` field, generating one if needed.
pub fn with_guid(value: Value) -> Value {
    let mut object = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if !matches!(object.get(GUID_FIELD), Some(Value::String(_))) {
        object.insert(GUID_FIELD.to_string(), Value::String(guid()));
    }
    Value::Object(object)
}

/// A record plus a `guid` field, serialized side by side.
///
/// Pair with a collection whose key path is `"guid"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithGuid<T> {
    pub guid: String,
    #[serde(flatten)]
    pub record: T,
}

impl<T> WithGuid<T> {
    /// Wrap `record` with a freshly generated guid.
    pub fn new(record: T) -> Self {
        Self {
            guid: guid(),
            record,
        }
    }

    /// Wrap `record`, keeping a guid it was stored under before.
    pub fn with_existing(guid: impl Into<String>, record: T) -> Self {
        Self {
            guid: guid.into(),
            record,
        }
    }

    pub fn into_inner(self) -> T {
        self.record
    }
}

impl<T> Deref for WithGuid<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> DerefMut for WithGuid<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.record
    }
}
