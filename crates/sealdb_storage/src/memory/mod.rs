//! In-memory storage core with implicit-commit transactions.
//!
//! Transactions follow browser record-store rules:
//!
//! - A new transaction is active for the rest of the turn that created it.
//! - While a request's completion runs (and the microtasks it wakes), its
//!   transaction is active again.
//! - At the end of every turn all transactions become inactive, and an
//!   inactive transaction with no outstanding request commits.
//!
//! Writes are applied in place and recorded in an undo log so that
//! [`DbTransaction::abort`](crate::DbTransaction::abort) can roll them back.
//! Indexes are not materialized: they are evaluated from stored records
//! through their key paths on every read.

mod cursor;
mod table;
mod transaction;

use crate::error::{StorageError, StorageResult};
use crate::event_loop::{LoopHandle, TurnObserver};
use crate::schema::{DbSchema, TableSchema};
use crate::traits::{
    DbCore, DbCoreTable, StorageFuture, Transaction, TransactionId, TransactionMode,
    TransactionState,
};
use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use futures::task::LocalSpawn;
use sealdb_codec::{Key, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use table::MemoryTable;
pub(crate) use transaction::{MemoryTransaction, TxnShared};

/// Virtual milliseconds between issuing a request and its completion.
pub const DEFAULT_REQUEST_LATENCY_MS: u64 = 1;

type Store = BTreeMap<Key, Value>;

/// Shared by every engine so transaction ids never collide across cores.
static NEXT_TXN: AtomicU64 = AtomicU64::new(1);

/// An in-memory [`DbCore`].
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Rc<EngineInner>,
}

pub(crate) struct EngineInner {
    handle: LoopHandle,
    spawner: Rc<dyn LocalSpawn>,
    latency_ms: Cell<u64>,
    schema: RefCell<DbSchema>,
    stores: RefCell<HashMap<String, Store>>,
    transactions: RefCell<BTreeMap<TransactionId, Rc<TxnShared>>>,
}

impl MemoryEngine {
    /// Creates an engine with empty tables for every table in `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSchema`] if the schema is malformed.
    pub fn new(handle: &LoopHandle, schema: DbSchema) -> StorageResult<Self> {
        schema.validate()?;
        let stores = schema
            .tables
            .iter()
            .map(|t| (t.name.clone(), Store::new()))
            .collect();
        let inner = Rc::new(EngineInner {
            handle: handle.clone(),
            spawner: Rc::new(handle.spawner()),
            latency_ms: Cell::new(DEFAULT_REQUEST_LATENCY_MS),
            schema: RefCell::new(schema),
            stores: RefCell::new(stores),
            transactions: RefCell::new(BTreeMap::new()),
        });
        let weak = Rc::downgrade(&inner);
        let observer: Weak<dyn TurnObserver> = weak;
        handle.add_turn_observer(observer);
        Ok(Self { inner })
    }

    /// Returns this engine as a shared [`DbCore`].
    pub fn into_core(self) -> Rc<dyn DbCore> {
        Rc::new(self)
    }

    /// Sets the virtual latency of every subsequent request.
    pub fn set_request_latency(&self, ms: u64) {
        self.inner.latency_ms.set(ms);
    }

    /// Replaces the schema.
    ///
    /// New tables start empty and dropped tables lose their records.
    /// Existing records are kept as they are; indexes are evaluated from
    /// them on demand.
    ///
    /// # Errors
    ///
    /// Fails if `schema` is invalid, does not increase the version, or a
    /// transaction is still running.
    pub fn upgrade(&self, schema: DbSchema) -> StorageResult<()> {
        schema.validate()?;
        let current = self.inner.schema.borrow().version;
        if schema.version <= current {
            return Err(StorageError::invalid_schema(format!(
                "version {} does not upgrade version {current}",
                schema.version
            )));
        }
        if !self.inner.transactions.borrow().is_empty() {
            return Err(StorageError::invalid_operation(
                "cannot upgrade while transactions are running",
            ));
        }

        let mut stores = self.inner.stores.borrow_mut();
        stores.retain(|name, _| schema.table(name).is_some());
        for table in &schema.tables {
            stores.entry(table.name.clone()).or_default();
        }
        drop(stores);

        tracing::debug!(
            database = %schema.name,
            from = current,
            to = schema.version,
            "upgraded schema"
        );
        *self.inner.schema.borrow_mut() = schema;
        Ok(())
    }

    /// Reads a stored record directly, bypassing transactions and any
    /// middleware.
    ///
    /// # Errors
    ///
    /// Fails for unknown tables or invalid keys.
    pub fn raw_get(&self, table: &str, key: impl Into<Value>) -> StorageResult<Option<Value>> {
        let key = Key::new(key.into()).map_err(|source| StorageError::InvalidKey {
            table: table.to_string(),
            source,
        })?;
        let stores = self.inner.stores.borrow();
        let store = stores.get(table).ok_or_else(|| not_found(table))?;
        Ok(store.get(&key).cloned())
    }

    /// Returns every stored record of `table` in primary key order,
    /// bypassing transactions and any middleware.
    ///
    /// # Errors
    ///
    /// Fails for unknown tables.
    pub fn raw_values(&self, table: &str) -> StorageResult<Vec<Value>> {
        let stores = self.inner.stores.borrow();
        let store = stores.get(table).ok_or_else(|| not_found(table))?;
        Ok(store.values().cloned().collect())
    }

    /// Number of transactions that have not finished yet.
    pub fn running_transactions(&self) -> usize {
        self.inner.transactions.borrow().len()
    }
}

impl DbCore for MemoryEngine {
    fn schema(&self) -> DbSchema {
        self.inner.schema.borrow().clone()
    }

    fn table(&self, name: &str) -> StorageResult<Rc<dyn DbCoreTable>> {
        self.inner.table_schema(name)?;
        Ok(Rc::new(MemoryTable::new(Rc::clone(&self.inner), name)))
    }

    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Transaction> {
        if stores.is_empty() {
            return Err(StorageError::invalid_operation(
                "a transaction needs at least one table",
            ));
        }
        for store in stores {
            self.inner.table_schema(store)?;
        }

        let id = TransactionId::new(NEXT_TXN.fetch_add(1, Ordering::Relaxed));
        let shared = Rc::new(TxnShared::new(
            id,
            mode,
            stores.iter().map(|s| (*s).to_string()).collect(),
        ));
        self.inner
            .transactions
            .borrow_mut()
            .insert(id, Rc::clone(&shared));
        tracing::trace!(txn = %id, ?mode, "transaction started");

        Ok(Rc::new(MemoryTransaction::new(
            shared,
            Rc::downgrade(&self.inner),
            Rc::clone(&self.inner.spawner),
        )))
    }
}

fn not_found(table: &str) -> StorageError {
    StorageError::TableNotFound {
        name: table.to_string(),
    }
}

impl EngineInner {
    pub(crate) fn table_schema(&self, name: &str) -> StorageResult<TableSchema> {
        self.schema
            .borrow()
            .table(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    fn lookup(&self, trans: &Transaction) -> StorageResult<Rc<TxnShared>> {
        let id = trans.id();
        self.transactions
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(StorageError::TransactionFinished { id })
    }

    /// Issues a request. `complete` runs as a macrotask once the request
    /// completes, with the transaction reactivated, or with the error that
    /// finished the transaction in the meantime.
    pub(crate) fn submit(
        self: &Rc<Self>,
        txn: &Rc<TxnShared>,
        store: &str,
        write: bool,
        complete: impl FnOnce(StorageResult<&Rc<EngineInner>>) + 'static,
    ) -> StorageResult<()> {
        txn.check_request(store, write)?;
        self.table_schema(store)?;
        txn.pending.set(txn.pending.get() + 1);

        let engine = Rc::downgrade(self);
        let txn = Rc::clone(txn);
        self.handle.schedule(self.latency_ms.get(), move || {
            txn.pending.set(txn.pending.get().saturating_sub(1));
            match engine.upgrade() {
                Some(engine) if !txn.state.get().is_finished() => {
                    txn.state.set(TransactionState::Active);
                    complete(Ok(&engine));
                }
                _ => complete(Err(txn.closed_error())),
            }
        });
        Ok(())
    }

    /// Issues a request whose outcome is computed by `op` on completion.
    pub(crate) fn request<T: 'static>(
        self: &Rc<Self>,
        trans: &Transaction,
        store: &str,
        write: bool,
        op: impl FnOnce(&Rc<EngineInner>, &Rc<TxnShared>) -> StorageResult<T> + 'static,
    ) -> StorageFuture<T> {
        let issued = self.lookup(trans).and_then(|txn| {
            let (tx, rx) = oneshot::channel();
            let owner = Rc::clone(&txn);
            self.submit(&txn, store, write, move |engine| {
                let _ = tx.send(engine.and_then(|engine| op(engine, &owner)));
            })?;
            Ok((rx, txn.id))
        });
        match issued {
            Ok((rx, id)) => async move {
                rx.await
                    .unwrap_or(Err(StorageError::TransactionFinished { id }))
            }
            .boxed_local(),
            Err(e) => future::ready(Err(e)).boxed_local(),
        }
    }

    fn commit(&self, txn: &Rc<TxnShared>) {
        self.transactions.borrow_mut().remove(&txn.id);
        txn.state.set(TransactionState::Committed);
        txn.undo.borrow_mut().clear();
        tracing::trace!(txn = %txn.id, "transaction committed");
        self.notify(txn);
    }

    pub(crate) fn abort(&self, txn: &Rc<TxnShared>) {
        if txn.state.get().is_finished() {
            return;
        }
        txn.state.set(TransactionState::Aborted);
        let undo = txn.undo.take();
        let reverted = undo.len();
        {
            let mut stores = self.stores.borrow_mut();
            for entry in undo.into_iter().rev() {
                let Some(store) = stores.get_mut(&entry.store) else {
                    continue;
                };
                match entry.previous {
                    Some(previous) => {
                        store.insert(entry.key, previous);
                    }
                    None => {
                        store.remove(&entry.key);
                    }
                }
            }
        }
        self.transactions.borrow_mut().remove(&txn.id);
        tracing::debug!(txn = %txn.id, reverted, "transaction aborted");
        self.notify(txn);
    }

    /// Delivers the final outcome to completion waiters as a macrotask.
    fn notify(&self, txn: &TxnShared) {
        let waiters = txn.waiters.take();
        if waiters.is_empty() {
            return;
        }
        let id = txn.id;
        let aborted = txn.state.get() == TransactionState::Aborted;
        self.handle.post(move || {
            for waiter in waiters {
                let outcome = if aborted {
                    Err(StorageError::TransactionAborted { id })
                } else {
                    Ok(())
                };
                let _ = waiter.send(outcome);
            }
        });
    }
}

impl TurnObserver for EngineInner {
    fn end_turn(&self) {
        let mut idle = Vec::new();
        for txn in self.transactions.borrow().values() {
            if txn.state.get() == TransactionState::Active {
                txn.state.set(TransactionState::Inactive);
            }
            if txn.pending.get() == 0 {
                idle.push(Rc::clone(txn));
            }
        }
        for txn in idle {
            self.commit(&txn);
        }
    }
}
