//! Field paths that must stay in plaintext for indexing.

use sealdb_codec::KeyPath;
use sealdb_storage::TableSchema;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Returns every field path read by the primary key or an index of
/// `schema`, compound paths flattened, first occurrence kept.
pub fn table_key_paths(schema: &TableSchema) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    let sources = std::iter::once(&schema.primary_key)
        .chain(schema.indexes.iter().map(|index| &index.key_path));
    for key_path in sources {
        for path in key_path.paths() {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
    }
    paths
}

struct CacheEntry {
    sources: Vec<KeyPath>,
    paths: Rc<[String]>,
}

fn sources_of(schema: &TableSchema) -> Vec<KeyPath> {
    std::iter::once(schema.primary_key.clone())
        .chain(schema.indexes.iter().map(|index| index.key_path.clone()))
        .collect()
}

/// Per-table cache of [`table_key_paths`].
///
/// Entries are keyed by table name and remember the key paths they were
/// computed from, so a schema whose index set changed is recomputed on
/// the next lookup.
#[derive(Default)]
pub struct KeyPathCache {
    entries: RefCell<HashMap<String, CacheEntry>>,
}

impl KeyPathCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the plaintext paths for `schema`, computing them if needed.
    pub fn get(&self, schema: &TableSchema) -> Rc<[String]> {
        let sources = sources_of(schema);
        if let Some(entry) = self.entries.borrow().get(&schema.name) {
            if entry.sources == sources {
                return Rc::clone(&entry.paths);
            }
        }

        tracing::trace!(table = %schema.name, "computing plaintext key paths");
        let paths: Rc<[String]> = table_key_paths(schema).into();
        self.entries.borrow_mut().insert(
            schema.name.clone(),
            CacheEntry {
                sources,
                paths: Rc::clone(&paths),
            },
        );
        paths
    }

    /// Drops the entry for `table`.
    pub fn invalidate(&self, table: &str) -> bool {
        self.entries.borrow_mut().remove(table).is_some()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Number of cached tables.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl std::fmt::Debug for KeyPathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPathCache")
            .field("tables", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_and_dedups() {
        let schema = TableSchema::parse("people", "&id,name,[name+age],*tags").unwrap();
        assert_eq!(table_key_paths(&schema), vec!["id", "name", "age", "tags"]);
    }

    #[test]
    fn outbound_primary_key_contributes_nothing() {
        let schema = TableSchema::parse("blobs", ",kind").unwrap();
        assert_eq!(table_key_paths(&schema), vec!["kind"]);
        let bare = TableSchema::parse("bare", "").unwrap();
        assert!(table_key_paths(&bare).is_empty());
    }

    #[test]
    fn cache_reuses_entries() {
        let cache = KeyPathCache::new();
        let schema = TableSchema::parse("t", "&key,index").unwrap();
        let first = cache.get(&schema);
        let second = cache.get(&schema);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_recomputes_when_indexes_change() {
        let cache = KeyPathCache::new();
        let before = TableSchema::parse("t", "&key,index").unwrap();
        assert_eq!(&*cache.get(&before), &["key", "index"]);

        let after = TableSchema::parse("t", "&key,index,value").unwrap();
        assert_eq!(&*cache.get(&after), &["key", "index", "value"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = KeyPathCache::new();
        cache.get(&TableSchema::parse("a", "&id").unwrap());
        cache.get(&TableSchema::parse("b", "&id").unwrap());
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
