//! Table and database schemas.
//!
//! Table schemas can be written in the compact index syntax used by
//! browser-side record stores:
//!
//! ```text
//! "&key,index,[first+last],*tags"
//! ```
//!
//! The first entry is the primary key (empty for out-of-line keys). The
//! rest are secondary indexes. `&` marks an index unique, `*` marks it
//! multi-entry and `[a+b]` declares a compound key path.

use crate::error::{StorageError, StorageResult};
use sealdb_codec::KeyPath;

/// A secondary index on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, as used in queries.
    pub name: String,
    /// Key path the index reads from each record.
    pub key_path: KeyPath,
    /// Whether index keys must be unique across the table.
    pub unique: bool,
    /// Whether an array value contributes one index entry per element.
    pub multi_entry: bool,
}

impl IndexSpec {
    /// Creates a plain index named after its key path.
    pub fn new(key_path: KeyPath) -> Self {
        Self {
            name: key_path.to_string(),
            key_path,
            unique: false,
            multi_entry: false,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index multi-entry.
    #[must_use]
    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }
}

/// Schema of a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Primary key path. [`KeyPath::None`] means keys are supplied
    /// out of line with each write.
    pub primary_key: KeyPath,
    /// Secondary indexes, in declaration order.
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    /// Creates a table schema with no secondary indexes.
    pub fn new(name: impl Into<String>, primary_key: KeyPath) -> Self {
        Self {
            name: name.into(),
            primary_key,
            indexes: Vec::new(),
        }
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Parses the compact index syntax described in the module docs.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSchema`] for malformed entries,
    /// auto-increment keys, or duplicate index names.
    pub fn parse(name: impl Into<String>, indexes: &str) -> StorageResult<Self> {
        let name = name.into();
        let mut entries = indexes.split(',').map(str::trim);

        let primary = entries.next().unwrap_or_default();
        let primary = parse_entry(&name, primary)?;
        if primary.multi_entry {
            return Err(StorageError::invalid_schema(format!(
                "table '{name}': primary key cannot be multi-entry"
            )));
        }

        let mut schema = TableSchema::new(name, primary.key_path);
        for entry in entries {
            if entry.is_empty() {
                continue;
            }
            let index = parse_entry(&schema.name, entry)?;
            if index.key_path.is_none() {
                return Err(StorageError::invalid_schema(format!(
                    "table '{}': index '{entry}' has no key path",
                    schema.name
                )));
            }
            schema.indexes.push(index);
        }
        schema.validate()?;
        Ok(schema)
    }

    /// Looks up a secondary index by name.
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Returns true if `name` designates the primary key rather than a
    /// secondary index.
    pub fn is_primary(&self, name: &str) -> bool {
        name.is_empty() || (!self.primary_key.is_none() && self.primary_key.to_string() == name)
    }

    /// Checks key paths and index names.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSchema`] describing the first problem.
    pub fn validate(&self) -> StorageResult<()> {
        if self.name.is_empty() {
            return Err(StorageError::invalid_schema("table name is empty"));
        }
        self.primary_key
            .validate()
            .map_err(|e| StorageError::invalid_schema(format!("table '{}': {e}", self.name)))?;
        for (i, index) in self.indexes.iter().enumerate() {
            index.key_path.validate().map_err(|e| {
                StorageError::invalid_schema(format!("table '{}': {e}", self.name))
            })?;
            if self.indexes[..i].iter().any(|other| other.name == index.name) {
                return Err(StorageError::invalid_schema(format!(
                    "table '{}': duplicate index '{}'",
                    self.name, index.name
                )));
            }
        }
        Ok(())
    }
}

fn parse_entry(table: &str, entry: &str) -> StorageResult<IndexSpec> {
    let mut rest = entry;
    let mut unique = false;
    let mut multi_entry = false;

    if rest.starts_with("++") {
        return Err(StorageError::invalid_schema(format!(
            "table '{table}': auto-increment keys are not supported ('{entry}')"
        )));
    }
    loop {
        if let Some(r) = rest.strip_prefix('&') {
            unique = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('*') {
            multi_entry = true;
            rest = r;
        } else {
            break;
        }
    }

    let key_path = if rest.is_empty() {
        KeyPath::None
    } else if let Some(inner) = rest.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(|| {
            StorageError::invalid_schema(format!("table '{table}': unclosed '[' in '{entry}'"))
        })?;
        KeyPath::compound(inner.split('+').map(str::trim))
    } else {
        KeyPath::single(rest)
    };

    Ok(IndexSpec {
        name: key_path.to_string(),
        key_path,
        unique,
        multi_entry,
    })
}

/// Schema of a whole database: a versioned set of tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSchema {
    /// Database name.
    pub name: String,
    /// Schema version. Upgrades must increase it.
    pub version: u32,
    /// Tables, in declaration order.
    pub tables: Vec<TableSchema>,
}

impl DbSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            tables: Vec::new(),
        }
    }

    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    /// Builds a schema from `(table, indexes)` pairs in the compact syntax.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSchema`] if any table fails to parse
    /// or a table name repeats.
    pub fn parse(
        name: impl Into<String>,
        version: u32,
        tables: &[(&str, &str)],
    ) -> StorageResult<Self> {
        let mut schema = DbSchema::new(name, version);
        for (table, indexes) in tables {
            schema.tables.push(TableSchema::parse(*table, indexes)?);
        }
        schema.validate()?;
        Ok(schema)
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Returns the table names, in declaration order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Validates every table and checks names are unique.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSchema`] describing the first problem.
    pub fn validate(&self) -> StorageResult<()> {
        for (i, table) in self.tables.iter().enumerate() {
            table.validate()?;
            if self.tables[..i].iter().any(|t| t.name == table.name) {
                return Err(StorageError::invalid_schema(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_primary_and_indexes() {
        let schema = TableSchema::parse("friends", "&id, name, [first+last], *tags").unwrap();
        assert_eq!(schema.primary_key, KeyPath::single("id"));
        assert_eq!(schema.indexes.len(), 3);
        assert_eq!(schema.indexes[0].key_path, KeyPath::single("name"));
        assert_eq!(schema.indexes[1].key_path, KeyPath::compound(["first", "last"]));
        assert_eq!(schema.indexes[1].name, "[first+last]");
        assert!(schema.indexes[2].multi_entry);
        assert!(!schema.indexes[2].unique);
    }

    #[test]
    fn parse_outbound_primary_key() {
        let schema = TableSchema::parse("blobs", ",kind").unwrap();
        assert!(schema.primary_key.is_none());
        assert_eq!(schema.indexes[0].name, "kind");
    }

    #[test]
    fn parse_rejects_auto_increment() {
        let err = TableSchema::parse("t", "++id").unwrap_err();
        assert!(matches!(err, StorageError::InvalidSchema { .. }));
    }

    #[test]
    fn parse_rejects_unclosed_compound() {
        assert!(TableSchema::parse("t", "id,[a+b").is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(TableSchema::parse("t", "id,a,a").is_err());
        assert!(DbSchema::parse("db", 1, &[("t", "id"), ("t", "id")]).is_err());
    }

    #[test]
    fn primary_lookup_by_name() {
        let schema = TableSchema::parse("entries", "&key,index").unwrap();
        assert!(schema.is_primary(""));
        assert!(schema.is_primary("key"));
        assert!(!schema.is_primary("index"));
        assert!(schema.index("index").is_some());
    }

    #[test]
    fn db_schema_lookup() {
        let schema = DbSchema::parse("db", 1, &[("a", "id"), ("b", "id,x")]).unwrap();
        assert_eq!(schema.table_names(), vec!["a".to_string(), "b".to_string()]);
        assert!(schema.table("b").unwrap().index("x").is_some());
        assert!(schema.table("c").is_none());
    }
}
