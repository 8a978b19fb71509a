//! Transactions of the in-memory engine.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    DbTransaction, ProbeCallback, StorageFuture, TransactionId, TransactionMode, TransactionState,
};
use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use futures::task::LocalSpawn;
use sealdb_codec::{Key, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::EngineInner;

/// Undo record for one write.
pub(crate) struct UndoEntry {
    pub(crate) store: String,
    pub(crate) key: Key,
    pub(crate) previous: Option<Value>,
}

/// State shared between a transaction handle and the engine.
pub(crate) struct TxnShared {
    pub(crate) id: TransactionId,
    pub(crate) mode: TransactionMode,
    pub(crate) stores: Vec<String>,
    pub(crate) state: Cell<TransactionState>,
    pub(crate) pending: Cell<usize>,
    pub(crate) undo: RefCell<Vec<UndoEntry>>,
    pub(crate) waiters: RefCell<Vec<oneshot::Sender<StorageResult<()>>>>,
}

impl TxnShared {
    pub(crate) fn new(id: TransactionId, mode: TransactionMode, stores: Vec<String>) -> Self {
        Self {
            id,
            mode,
            stores,
            state: Cell::new(TransactionState::Active),
            pending: Cell::new(0),
            undo: RefCell::new(Vec::new()),
            waiters: RefCell::new(Vec::new()),
        }
    }

    /// The error reported to requests that reach a finished transaction.
    pub(crate) fn closed_error(&self) -> StorageError {
        match self.state.get() {
            TransactionState::Aborted => StorageError::TransactionAborted { id: self.id },
            _ => StorageError::TransactionFinished { id: self.id },
        }
    }

    pub(crate) fn check_request(&self, store: &str, write: bool) -> StorageResult<()> {
        match self.state.get() {
            TransactionState::Active => {}
            TransactionState::Inactive => {
                return Err(StorageError::TransactionInactive { id: self.id });
            }
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(self.closed_error());
            }
        }
        if !self.stores.iter().any(|s| s == store) {
            return Err(StorageError::NotInScope {
                table: store.to_string(),
            });
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly {
                table: store.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn record_undo(&self, store: &str, key: Key, previous: Option<Value>) {
        self.undo.borrow_mut().push(UndoEntry {
            store: store.to_string(),
            key,
            previous,
        });
    }
}

/// Transaction handle returned by [`super::MemoryEngine`].
pub(crate) struct MemoryTransaction {
    shared: Rc<TxnShared>,
    engine: Weak<EngineInner>,
    spawner: Rc<dyn LocalSpawn>,
}

impl MemoryTransaction {
    pub(crate) fn new(
        shared: Rc<TxnShared>,
        engine: Weak<EngineInner>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            shared,
            engine,
            spawner,
        }
    }
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.shared.id)
            .field("mode", &self.shared.mode)
            .field("state", &self.shared.state.get())
            .field("pending", &self.shared.pending.get())
            .finish()
    }
}

impl DbTransaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.shared.id
    }

    fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    fn store_names(&self) -> &[String] {
        &self.shared.stores
    }

    fn state(&self) -> TransactionState {
        self.shared.state.get()
    }

    fn probe(&self, store: &str, on_complete: ProbeCallback) -> StorageResult<()> {
        let engine = self.engine.upgrade().ok_or_else(|| self.shared.closed_error())?;
        engine.submit(&self.shared, store, false, move |outcome| {
            on_complete(outcome.map(|_| ()));
        })
    }

    fn spawner(&self) -> Rc<dyn LocalSpawn> {
        Rc::clone(&self.spawner)
    }

    fn abort(&self) {
        match self.engine.upgrade() {
            Some(engine) => engine.abort(&self.shared),
            None => {
                if !self.shared.state.get().is_finished() {
                    self.shared.state.set(TransactionState::Aborted);
                }
            }
        }
    }

    fn completion(&self) -> StorageFuture<()> {
        let id = self.shared.id;
        match self.shared.state.get() {
            TransactionState::Committed => future::ready(Ok(())).boxed_local(),
            TransactionState::Aborted => {
                future::ready(Err(StorageError::TransactionAborted { id })).boxed_local()
            }
            TransactionState::Active | TransactionState::Inactive => {
                let (tx, rx) = oneshot::channel();
                self.shared.waiters.borrow_mut().push(tx);
                async move {
                    rx.await
                        .unwrap_or(Err(StorageError::TransactionFinished { id }))
                }
                .boxed_local()
            }
        }
    }
}
