//! Encryption middleware configuration.

use crate::serializer::{DataSerializer, JsonSerializer};
use std::collections::BTreeSet;
use std::rc::Rc;

/// Options for [`crate::create_encryption_middleware`].
#[derive(Clone, Default)]
pub struct EncryptionOptions {
    /// Tables stored in plaintext.
    pub excluded_tables: BTreeSet<String>,

    /// Record serializer. `None` means [`JsonSerializer`].
    pub serializer: Option<Rc<dyn DataSerializer>>,
}

impl EncryptionOptions {
    /// Creates options with no excluded tables and the JSON serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `table` in plaintext.
    #[must_use]
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        self.excluded_tables.insert(table.into());
        self
    }

    /// Stores every table in `tables` in plaintext.
    #[must_use]
    pub fn excluded_tables<S: Into<String>>(mut self, tables: impl IntoIterator<Item = S>) -> Self {
        self.excluded_tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Sets the record serializer.
    #[must_use]
    pub fn serializer(mut self, serializer: Rc<dyn DataSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Returns true if `table` is stored in plaintext.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.contains(table)
    }

    /// Returns the configured serializer, or the JSON default.
    pub fn resolve_serializer(&self) -> Rc<dyn DataSerializer> {
        self.serializer
            .clone()
            .unwrap_or_else(|| Rc::new(JsonSerializer))
    }
}

impl std::fmt::Debug for EncryptionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionOptions")
            .field("excluded_tables", &self.excluded_tables)
            .field("custom_serializer", &self.serializer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_exclusions() {
        let options = EncryptionOptions::new()
            .exclude_table("settings")
            .excluded_tables(["cache", "logs"]);
        assert!(options.is_excluded("settings"));
        assert!(options.is_excluded("logs"));
        assert!(!options.is_excluded("entries"));
        assert_eq!(options.excluded_tables.len(), 3);
    }

    #[test]
    fn default_serializer_is_json() {
        let options = EncryptionOptions::default();
        assert!(options.serializer.is_none());
        assert!(format!("{options:?}").contains("custom_serializer: false"));
        let _json = options.resolve_serializer();
    }
}
