//! # SealDB Codec
//!
//! Record value model for SealDB.
//!
//! This crate provides the data shapes every other SealDB crate shares:
//! - [`Value`], a dynamic record value with ordered map fields
//! - [`KeyPath`], the field addressing used by primary keys and indexes
//! - [`Key`] and [`compare_keys`], IndexedDB-compatible key ordering
//! - `serde` support for `Value`, so any serde format can carry records
//!
//! ## Usage
//!
//! ```
//! use sealdb_codec::{KeyPath, Value};
//!
//! let record = Value::map([
//!     ("key", Value::from("foo")),
//!     ("address", Value::map([("city", "Oslo")])),
//! ]);
//!
//! let city = KeyPath::single("address.city").extract(&record);
//! assert_eq!(city, Some(Value::from("Oslo")));
//!
//! let indexed = record.pick(&["key"]);
//! assert_eq!(indexed, Value::map([("key", "foo")]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod serde_impl;
mod value;

pub use error::{CodecError, CodecResult};
pub use key::{compare_keys, validate_key, Key, KeyPath};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-z]{0,8}".prop_map(Value::Text),
        ]
    }

    fn tree() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,5}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn json_roundtrip_any_tree(value in tree()) {
            let bytes = serde_json::to_vec(&value).unwrap();
            let back: Value = serde_json::from_slice(&bytes).unwrap();
            prop_assert_eq!(back, value);
        }

        #[test]
        fn picked_paths_match_source(value in tree(), field in "[a-z]{1,5}") {
            let picked = value.pick(&[field.as_str()]);
            prop_assert_eq!(picked.get_path(&field), value.get_path(&field));
        }
    }
}
