//! Dynamic record value type.

use crate::error::{CodecError, CodecResult};
use std::collections::BTreeMap;

/// A dynamic record value.
///
/// Records stored in SealDB are `Value::Map`s whose fields may nest
/// arbitrarily. Floats are intentionally not supported: every value has a
/// single exact representation, so records compare field-for-field after a
/// serialization round trip.
///
/// Map fields are kept ordered by name, which makes equality independent of
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map from field name to value.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create a map value from field/value pairs.
    ///
    /// Later pairs overwrite earlier pairs with the same field name.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Create an empty map value.
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Returns a short name for this value's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a mutable map, if it is one.
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a top-level field in this map value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(field))
    }

    /// Inserts a top-level field, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAMap`] if this value is not a map.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> CodecResult<Option<Value>> {
        let type_name = self.type_name();
        self.as_map_mut()
            .map(|m| m.insert(field.into(), value))
            .ok_or(CodecError::NotAMap { type_name })
    }

    /// Removes a top-level field from this map value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.as_map_mut().and_then(|m| m.remove(field))
    }

    /// Resolves a dot-separated key path such as `"address.city"`.
    ///
    /// The empty path addresses the value itself.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.')
            .try_fold(self, |current, segment| current.get(segment))
    }

    /// Stores `value` at a dot-separated key path, creating intermediate
    /// maps as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or malformed, or if an
    /// intermediate field exists and is not a map.
    pub fn set_path(&mut self, path: &str, value: Value) -> CodecResult<()> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| CodecError::invalid_key_path(path, "empty path"))?;

        let mut current = self;
        for segment in parents {
            let type_name = current.type_name();
            let map = current
                .as_map_mut()
                .ok_or_else(|| CodecError::invalid_key_path(path, format!("{type_name} on path")))?;
            current = map
                .entry((*segment).to_string())
                .or_insert_with(Value::empty_map);
        }

        let type_name = current.type_name();
        current
            .as_map_mut()
            .ok_or_else(|| CodecError::invalid_key_path(path, format!("{type_name} on path")))?
            .insert((*last).to_string(), value);
        Ok(())
    }

    /// Builds a new map holding only the given key paths of this value.
    ///
    /// Nested paths are copied into nested maps, so picking `"a.b"` from
    /// `{a: {b: 1, c: 2}}` yields `{a: {b: 1}}`. Paths that do not resolve
    /// are skipped. `self` is never modified.
    pub fn pick<S: AsRef<str>>(&self, paths: &[S]) -> Value {
        let mut result = Value::empty_map();
        for path in paths {
            let path = path.as_ref();
            if path.is_empty() {
                continue;
            }
            if let Some(found) = self.get_path(path) {
                // Cannot fail: `result` only ever holds maps along picked paths.
                let _ = result.set_path(path, found.clone());
            }
        }
        result
    }
}

/// Splits a dot-separated key path into its segments.
pub(crate) fn split_path(path: &str) -> CodecResult<Vec<&str>> {
    if path.is_empty() {
        return Err(CodecError::invalid_key_path(path, "empty path"));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CodecError::invalid_key_path(path, "empty segment"));
    }
    Ok(segments)
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
