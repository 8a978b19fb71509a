//! # SealDB Testkit
//!
//! Test utilities for SealDB.
//!
//! This crate provides:
//! - Fixtures: a fixed-key test cipher, a slow cipher, the `entries`
//!   schema and ready-made plain or encrypted test databases
//! - Property-based generators for records and entries
//! - Collection helpers (`put_all`, `get`, `to_array`, `each`, ...) that
//!   run one operation in its own transaction
//!
//! ## Usage
//!
//! ```rust
//! use sealdb_testkit::prelude::*;
//!
//! let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
//! let core = db.core();
//! let stored = db
//!     .run(async move {
//!         put_all(&*core, "entries", vec![entry("foo", "bar", 1)]).await?;
//!         get(&*core, "entries", Value::from("foo")).await
//!     })
//!     .unwrap();
//! assert_eq!(stored, Some(entry("foo", "bar", 1)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collection::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use sealdb_crypto::EncryptionOptions;
    pub use sealdb_storage::Value;
}

pub use collection::*;
pub use fixtures::*;
pub use generators::*;
