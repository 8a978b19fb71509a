//! Request and response types for table operations.

use crate::error::StorageError;
use crate::traits::Transaction;
use sealdb_codec::{compare_keys, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A range of keys, optionally bounded on either side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    /// Lower bound, if any.
    pub lower: Option<Value>,
    /// Upper bound, if any.
    pub upper: Option<Value>,
    /// Whether the lower bound itself is excluded.
    pub lower_open: bool,
    /// Whether the upper bound itself is excluded.
    pub upper_open: bool,
}

impl KeyRange {
    /// The unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    /// The range holding exactly `key`.
    pub fn only(key: impl Into<Value>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// A range bounded on both sides.
    pub fn bound(
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            lower_open,
            upper_open,
        }
    }

    /// Keys at or above (or strictly above, if `open`) `lower`.
    pub fn lower_bound(lower: impl Into<Value>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            lower_open: open,
            ..Self::default()
        }
    }

    /// Keys at or below (or strictly below, if `open`) `upper`.
    pub fn upper_bound(upper: impl Into<Value>, open: bool) -> Self {
        Self {
            upper: Some(upper.into()),
            upper_open: open,
            ..Self::default()
        }
    }

    /// Returns true if `key` falls inside this range.
    pub fn contains(&self, key: &Value) -> bool {
        let above = match &self.lower {
            None => true,
            Some(lower) => match compare_keys(key, lower) {
                Ordering::Greater => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Less => false,
            },
        };
        let below = match &self.upper {
            None => true,
            Some(upper) => match compare_keys(key, upper) {
                Ordering::Less => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Greater => false,
            },
        };
        above && below
    }
}

/// Which index to read and which part of it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    /// Index name. `None` (or the primary key's own name) reads the
    /// primary key.
    pub index: Option<String>,
    /// Key range within the index.
    pub range: KeyRange,
}

impl Query {
    /// Reads the whole primary key range.
    pub fn all() -> Self {
        Self::default()
    }

    /// Reads a primary key range.
    pub fn primary(range: KeyRange) -> Self {
        Self { index: None, range }
    }

    /// Reads a range of a secondary index.
    pub fn index(name: impl Into<String>, range: KeyRange) -> Self {
        Self {
            index: Some(name.into()),
            range,
        }
    }
}

/// A write against a table.
#[derive(Debug, Clone)]
pub enum MutateRequest {
    /// Insert new records; existing keys are per-item failures.
    Add {
        /// Owning transaction.
        trans: Transaction,
        /// Records to insert.
        values: Vec<Value>,
        /// Out-of-line keys, one per value, for tables without a key path.
        keys: Option<Vec<Value>>,
    },
    /// Insert or replace records.
    Put {
        /// Owning transaction.
        trans: Transaction,
        /// Records to write.
        values: Vec<Value>,
        /// Out-of-line keys, one per value, for tables without a key path.
        keys: Option<Vec<Value>>,
    },
    /// Delete records by primary key.
    Delete {
        /// Owning transaction.
        trans: Transaction,
        /// Primary keys to delete.
        keys: Vec<Value>,
    },
    /// Delete every record whose primary key falls in a range.
    DeleteRange {
        /// Owning transaction.
        trans: Transaction,
        /// Primary key range to delete.
        range: KeyRange,
    },
}

impl MutateRequest {
    /// Returns the owning transaction.
    pub fn trans(&self) -> &Transaction {
        match self {
            MutateRequest::Add { trans, .. }
            | MutateRequest::Put { trans, .. }
            | MutateRequest::Delete { trans, .. }
            | MutateRequest::DeleteRange { trans, .. } => trans,
        }
    }

    /// Records carried by an add or put; `None` for deletes.
    pub fn values_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            MutateRequest::Add { values, .. } | MutateRequest::Put { values, .. } => Some(values),
            MutateRequest::Delete { .. } | MutateRequest::DeleteRange { .. } => None,
        }
    }

    /// Short operation name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            MutateRequest::Add { .. } => "add",
            MutateRequest::Put { .. } => "put",
            MutateRequest::Delete { .. } => "delete",
            MutateRequest::DeleteRange { .. } => "deleteRange",
        }
    }
}

/// Outcome of a [`MutateRequest`].
#[derive(Debug, Default)]
pub struct MutateResponse {
    /// Number of items that failed.
    pub num_failures: usize,
    /// Per-item failures, keyed by input position.
    pub failures: BTreeMap<usize, StorageError>,
    /// Primary key written for each input position; `None` for failed
    /// items. Empty for deletes.
    pub results: Vec<Option<Value>>,
    /// Last successfully written key.
    pub last_result: Option<Value>,
}

/// Point lookup by primary key.
#[derive(Debug, Clone)]
pub struct GetRequest {
    /// Owning transaction.
    pub trans: Transaction,
    /// Primary key.
    pub key: Value,
}

/// Batched point lookup by primary key.
#[derive(Debug, Clone)]
pub struct GetManyRequest {
    /// Owning transaction.
    pub trans: Transaction,
    /// Primary keys, in result order.
    pub keys: Vec<Value>,
}

/// Range read over an index.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Owning transaction.
    pub trans: Transaction,
    /// Index and range to read.
    pub query: Query,
    /// Return records when true, primary keys when false.
    pub values: bool,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

/// Result of a [`QueryRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    /// Records or primary keys, in index order.
    pub result: Vec<Value>,
}

/// Opens a cursor over an index range.
#[derive(Debug, Clone)]
pub struct OpenCursorRequest {
    /// Owning transaction.
    pub trans: Transaction,
    /// Index and range to iterate.
    pub query: Query,
    /// Expose record values when true; key-only cursor when false.
    pub values: bool,
    /// Iterate in descending order.
    pub reverse: bool,
}

/// Counts records in an index range.
#[derive(Debug, Clone)]
pub struct CountRequest {
    /// Owning transaction.
    pub trans: Transaction,
    /// Index and range to count.
    pub query: Query,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds() {
        let r = KeyRange::bound(2, 5, false, true);
        assert!(!r.contains(&Value::from(1)));
        assert!(r.contains(&Value::from(2)));
        assert!(r.contains(&Value::from(4)));
        assert!(!r.contains(&Value::from(5)));
    }

    #[test]
    fn only_and_all() {
        assert!(KeyRange::only("a").contains(&Value::from("a")));
        assert!(!KeyRange::only("a").contains(&Value::from("b")));
        assert!(KeyRange::all().contains(&Value::from(i64::MIN)));
    }

    #[test]
    fn half_open_ranges() {
        assert!(KeyRange::lower_bound(3, true).contains(&Value::from(4)));
        assert!(!KeyRange::lower_bound(3, true).contains(&Value::from(3)));
        assert!(KeyRange::upper_bound("m", false).contains(&Value::from("m")));
        // Text sorts after every integer.
        assert!(!KeyRange::upper_bound(100, false).contains(&Value::from("a")));
    }

    proptest::proptest! {
        #[test]
        fn bound_matches_integer_comparison(
            lo in -50i64..50,
            hi in -50i64..50,
            key in -60i64..60,
            lower_open in proptest::bool::ANY,
            upper_open in proptest::bool::ANY,
        ) {
            let range = KeyRange::bound(lo, hi, lower_open, upper_open);
            let above = if lower_open { key > lo } else { key >= lo };
            let below = if upper_open { key < hi } else { key <= hi };
            proptest::prop_assert_eq!(range.contains(&Value::from(key)), above && below);
        }
    }
}
