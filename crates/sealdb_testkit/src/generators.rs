//! Property-based test generators using proptest.
//!
//! Records only hold the value types SealDB supports: no floats, and
//! byte strings only where the serializer can carry them.

use crate::fixtures::entry;
use proptest::prelude::*;
use rand::Rng;
use sealdb_storage::Value;

/// Strategy for scalar field values. Never produces byte strings, so the
/// results survive the JSON serializer.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for nested field values built from [`scalar_strategy`].
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for records keyed by a text `key`, with arbitrary extra
/// fields.
pub fn record_strategy() -> impl Strategy<Value = Value> {
    (
        "[a-z0-9]{1,12}",
        prop::collection::btree_map("[a-z]{1,6}", field_value_strategy(), 0..6),
    )
        .prop_map(|(key, mut fields)| {
            fields.remove("_crypto");
            fields.insert("key".to_string(), Value::Text(key));
            Value::Map(fields)
        })
}

/// Strategy for `entries` records with unique keys.
pub fn entries_strategy(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::btree_map("[a-z]{1,8}", ("[a-z]{0,8}", any::<i64>()), 0..max).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|(key, (value, index))| entry(&key, &value, index))
                .collect()
        },
    )
}

/// Builds `count` numbered entries whose keys sort in numeric order.
pub fn numbered_entries(count: usize, value_len: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let index = i64::try_from(i).unwrap_or(i64::MAX);
            entry(&format!("{i:05}"), &"x".repeat(value_len), index)
        })
        .collect()
}

/// Draws `count` random delays in `0..=max_ms`.
pub fn random_delays(count: usize, max_ms: u64) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..=max_ms)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn records_always_carry_a_text_key() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let record = record_strategy().new_tree(&mut runner).unwrap().current();
            assert!(record.get("key").and_then(Value::as_text).is_some());
            assert!(record.get("_crypto").is_none());
        }
    }

    #[test]
    fn numbered_entries_sort_by_key() {
        let entries = numbered_entries(12, 3);
        let keys: Vec<&str> = entries
            .iter()
            .filter_map(|e| e.get("key").and_then(Value::as_text))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn delays_respect_bound() {
        assert!(random_delays(100, 7).iter().all(|d| *d <= 7));
    }
}
