//! # SealDB Storage
//!
//! Storage-core interface, middleware stack and reference engine.
//!
//! This crate defines the lowest interceptable layer of SealDB. A storage
//! core ([`DbCore`]) hands out tables ([`DbCoreTable`]) and transactions
//! ([`DbTransaction`]); middleware ([`Middleware`]) wraps a core and
//! presents the same interface one level up.
//!
//! ## Design Principles
//!
//! - The core is schema-driven but knows nothing about what middleware does
//! - Requests are issued eagerly; futures only report outcomes
//! - Everything runs on one thread, on a cooperative [`EventLoop`]
//! - Transactions commit implicitly once a turn ends with nothing
//!   outstanding
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - in-memory tables with undo-log transactions
//!
//! ## Example
//!
//! ```rust
//! use sealdb_storage::{
//!     DbCore, DbSchema, EventLoop, GetRequest, MemoryEngine, MutateRequest, TransactionMode,
//!     Value,
//! };
//!
//! let ev = EventLoop::new();
//! let schema = DbSchema::parse("demo", 1, &[("friends", "&id,name")]).unwrap();
//! let engine = MemoryEngine::new(&ev.handle(), schema).unwrap();
//!
//! let found = ev
//!     .run_until(async move {
//!         let table = engine.table("friends")?;
//!         let trans = engine.transaction(&["friends"], TransactionMode::ReadWrite)?;
//!         let ada = Value::map([("id", Value::from(1)), ("name", Value::from("Ada"))]);
//!         table
//!             .mutate(MutateRequest::Put { trans: trans.clone(), values: vec![ada], keys: None })
//!             .await?;
//!         table.get(GetRequest { trans, key: Value::from(1) }).await
//!     })
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(found.unwrap().get("name"), Some(&Value::from("Ada")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event_loop;
mod memory;
mod middleware;
mod request;
mod schema;
mod traits;

pub use error::{StorageError, StorageResult};
pub use event_loop::{EventLoop, LoopHandle, Macrotask, Sleep, TurnObserver};
pub use memory::{MemoryEngine, DEFAULT_REQUEST_LATENCY_MS};
pub use middleware::{Database, Middleware, MiddlewareStack};
pub use request::{
    CountRequest, GetManyRequest, GetRequest, KeyRange, MutateRequest, MutateResponse,
    OpenCursorRequest, Query, QueryRequest, QueryResponse,
};
pub use schema::{DbSchema, IndexSpec, TableSchema};
pub use sealdb_codec::{Key, KeyPath, Value};
pub use traits::{
    Cursor, DbCore, DbCoreTable, DbCursor, DbTransaction, ProbeCallback, StorageFuture,
    Transaction, TransactionId, TransactionMode, TransactionState,
};
