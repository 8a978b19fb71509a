//! The storage-core interface.
//!
//! [`DbCore`] is the lowest interceptable layer of the storage stack. It is
//! deliberately schema-driven and unaware of what sits above it, so
//! middleware can wrap it (see [`crate::Middleware`]) and present the same
//! interface to the next stage up.
//!
//! Every operation issues its request eagerly, when the method is called,
//! and returns a future for the outcome. This matters for transaction
//! liveness: a request counts as outstanding from the moment it is issued,
//! not from the moment its future is first polled.

use crate::error::StorageResult;
use crate::request::{
    CountRequest, GetManyRequest, GetRequest, MutateRequest, MutateResponse, OpenCursorRequest,
    QueryRequest, QueryResponse,
};
use crate::schema::{DbSchema, TableSchema};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawn;
use sealdb_codec::Value;
use std::fmt;
use std::rc::Rc;

/// Future returned by storage operations.
pub type StorageFuture<T> = LocalBoxFuture<'static, StorageResult<T>>;

/// Shared handle to a transaction.
pub type Transaction = Rc<dyn DbTransaction>;

/// Shared handle to an open cursor.
pub type Cursor = Rc<dyn DbCursor>;

/// Callback invoked when a probe request completes.
pub type ProbeCallback = Box<dyn FnOnce(StorageResult<()>)>;

/// Unique identifier for a transaction.
///
/// Identifiers are never reused, and are unique across every storage core
/// in the process: side tables such as the encryption keeper's are keyed
/// by id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Requests may be issued.
    Active,
    /// Between turns; requests are rejected until a completion
    /// callback reactivates the transaction.
    Inactive,
    /// Committed; no further requests.
    Committed,
    /// Aborted and rolled back; no further requests.
    Aborted,
}

impl TransactionState {
    /// Returns true once the transaction has committed or aborted.
    pub fn is_finished(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

/// A transaction handle.
pub trait DbTransaction: fmt::Debug {
    /// Returns the transaction's identifier.
    fn id(&self) -> TransactionId;

    /// Returns the access mode.
    fn mode(&self) -> TransactionMode;

    /// Returns the names of the tables in scope.
    fn store_names(&self) -> &[String];

    /// Returns the current lifecycle state.
    fn state(&self) -> TransactionState;

    /// Issues the cheapest possible request against `store`.
    ///
    /// The probe has no side effects but counts as outstanding until its
    /// callback runs, which keeps the transaction from auto-committing. The
    /// callback always runs, with an error if the transaction finished
    /// before the probe completed.
    ///
    /// # Errors
    ///
    /// Fails immediately, without scheduling the callback, if the request
    /// cannot be issued (inactive or finished transaction, store out of
    /// scope).
    fn probe(&self, store: &str, on_complete: ProbeCallback) -> StorageResult<()>;

    /// Returns a spawner for tasks that belong to this transaction's
    /// event loop.
    fn spawner(&self) -> Rc<dyn LocalSpawn>;

    /// Aborts the transaction, rolling back its writes. Does nothing if
    /// it has already finished.
    fn abort(&self);

    /// Resolves when the transaction commits, or fails with
    /// [`crate::StorageError::TransactionAborted`].
    fn completion(&self) -> StorageFuture<()>;
}

/// The root of a storage stack: schema plus transactions plus tables.
pub trait DbCore {
    /// Returns the current database schema.
    fn schema(&self) -> DbSchema;

    /// Returns the table named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TableNotFound`] for unknown tables.
    fn table(&self, name: &str) -> StorageResult<Rc<dyn DbCoreTable>>;

    /// Starts a transaction over `stores`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TableNotFound`] if a store is unknown.
    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Transaction>;
}

/// Primitive operations on one table.
pub trait DbCoreTable {
    /// Returns the table name.
    fn name(&self) -> &str;

    /// Returns the table schema.
    fn schema(&self) -> TableSchema;

    /// Adds, puts or deletes records.
    fn mutate(&self, req: MutateRequest) -> StorageFuture<MutateResponse>;

    /// Reads one record by primary key.
    fn get(&self, req: GetRequest) -> StorageFuture<Option<Value>>;

    /// Reads several records by primary key, preserving request order.
    fn get_many(&self, req: GetManyRequest) -> StorageFuture<Vec<Option<Value>>>;

    /// Reads records (or primary keys) in an index range.
    fn query(&self, req: QueryRequest) -> StorageFuture<QueryResponse>;

    /// Opens a cursor positioned on the first entry of an index range.
    /// Resolves to `None` if the range is empty.
    fn open_cursor(&self, req: OpenCursorRequest) -> StorageFuture<Option<Cursor>>;

    /// Counts entries in an index range.
    fn count(&self, req: CountRequest) -> StorageFuture<u64>;
}

/// A transaction-scoped iterator over an index range.
///
/// A cursor is positioned on its first entry when it is opened. Calling
/// [`DbCursor::start`] delivers that entry to the callback; each
/// `continue_*`/[`DbCursor::advance`] call moves the cursor and invokes the
/// callback again once the move completes. The future returned by `start`
/// resolves when iteration ends, either because the range is exhausted,
/// [`DbCursor::stop`] was called, or the cursor failed.
pub trait DbCursor {
    /// Returns the owning transaction.
    fn trans(&self) -> Transaction;

    /// Key of the current entry in the iterated index.
    fn key(&self) -> Option<Value>;

    /// Primary key of the current entry.
    fn primary_key(&self) -> Option<Value>;

    /// Record at the current entry; `None` for key-only cursors.
    fn value(&self) -> Option<Value>;

    /// Returns true once iteration has ended.
    fn done(&self) -> bool;

    /// Starts iteration, invoking `on_next` for every entry.
    fn start(&self, on_next: Box<dyn FnMut()>) -> StorageFuture<()>;

    /// Moves to the next entry, or to the first entry at or past `key`.
    fn continue_key(&self, key: Option<Value>);

    /// Moves to the first entry at or past (`key`, `primary_key`).
    fn continue_primary_key(&self, key: Value, primary_key: Value);

    /// Skips `count` entries.
    fn advance(&self, count: u32);

    /// Ends iteration successfully.
    fn stop(&self);

    /// Ends iteration with `error`.
    fn fail(&self, error: crate::StorageError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_display_and_order() {
        assert_eq!(TransactionId::new(7).to_string(), "txn:7");
        assert!(TransactionId::new(1) < TransactionId::new(2));
        assert_eq!(TransactionId::new(3).as_u64(), 3);
    }

    #[test]
    fn finished_states() {
        assert!(!TransactionState::Active.is_finished());
        assert!(!TransactionState::Inactive.is_finished());
        assert!(TransactionState::Committed.is_finished());
        assert!(TransactionState::Aborted.is_finished());
    }
}
