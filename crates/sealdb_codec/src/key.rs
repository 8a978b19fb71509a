//! Keys, key paths and key ordering.
//!
//! Keys follow IndexedDB rules: only integers, text, byte strings and
//! arrays of keys are valid, and they order as
//! `Integer < Text < Bytes < Array`. Arrays compare element by element,
//! then by length.

use crate::error::{CodecError, CodecResult};
use crate::value::{split_path, Value};
use std::cmp::Ordering;
use std::fmt;

/// How an index (or primary key) derives its key from a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum KeyPath {
    /// No key path: keys are supplied out of line.
    #[default]
    None,
    /// A single dot-separated field path.
    Single(String),
    /// A compound key built from several field paths, in order.
    Compound(Vec<String>),
}

impl KeyPath {
    /// Creates a single-field key path.
    pub fn single(path: impl Into<String>) -> Self {
        KeyPath::Single(path.into())
    }

    /// Creates a compound key path.
    pub fn compound<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        KeyPath::Compound(paths.into_iter().map(Into::into).collect())
    }

    /// Returns true for out-of-line keys.
    pub fn is_none(&self) -> bool {
        matches!(self, KeyPath::None)
    }

    /// Returns every field path this key path reads, in order.
    pub fn paths(&self) -> &[String] {
        match self {
            KeyPath::None => &[],
            KeyPath::Single(path) => std::slice::from_ref(path),
            KeyPath::Compound(paths) => paths,
        }
    }

    /// Checks that every component is a well-formed path.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] for empty or malformed paths.
    pub fn validate(&self) -> CodecResult<()> {
        if let KeyPath::Compound(paths) = self {
            if paths.is_empty() {
                return Err(CodecError::invalid_key_path("[]", "empty compound key path"));
            }
        }
        for path in self.paths() {
            split_path(path)?;
        }
        Ok(())
    }

    /// Extracts the key this path designates from `value`.
    ///
    /// Returns `None` when the path is out-of-line or any component is
    /// missing. The extracted value is not validated as a key.
    pub fn extract(&self, value: &Value) -> Option<Value> {
        match self {
            KeyPath::None => None,
            KeyPath::Single(path) => value.get_path(path).cloned(),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| value.get_path(p).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::None => f.write_str(""),
            KeyPath::Single(path) => f.write_str(path),
            KeyPath::Compound(paths) => write!(f, "[{}]", paths.join("+")),
        }
    }
}

/// Checks that `value` is a valid key.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] naming the first offending type.
pub fn validate_key(value: &Value) -> CodecResult<()> {
    match value {
        Value::Integer(_) | Value::Text(_) | Value::Bytes(_) => Ok(()),
        Value::Array(items) => items.iter().try_for_each(validate_key),
        other => Err(CodecError::InvalidKey {
            type_name: other.type_name(),
        }),
    }
}

fn key_rank(value: &Value) -> u8 {
    match value {
        Value::Integer(_) => 0,
        Value::Text(_) => 1,
        Value::Bytes(_) => 2,
        Value::Array(_) => 3,
        // Not valid keys; ranked last so ordering stays total.
        Value::Null | Value::Bool(_) | Value::Map(_) => 4,
    }
}

/// Compares two keys in key order.
pub fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_keys(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => key_rank(a).cmp(&key_rank(b)),
    }
}

/// A validated key with a total order, usable in ordered collections.
#[derive(Debug, Clone)]
pub struct Key(Value);

impl Key {
    /// Validates `value` and wraps it as a key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if `value` is not a valid key.
    pub fn new(value: Value) -> CodecResult<Self> {
        validate_key(&value)?;
        Ok(Self(value))
    }

    /// Returns the underlying value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the key and returns the underlying value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.0, &other.0)
    }
}
