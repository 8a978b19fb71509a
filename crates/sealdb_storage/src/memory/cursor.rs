//! Cursors of the in-memory engine.
//!
//! Each move is an ordinary request: it counts as outstanding, completes
//! as a macrotask and reactivates the transaction while the callback runs.
//! The cursor re-reads its index range on every move, so writes made
//! during iteration are observed.

use crate::error::{StorageError, StorageResult};
use crate::request::{OpenCursorRequest, Query};
use crate::traits::{DbCursor, StorageFuture, Transaction};
use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use sealdb_codec::{compare_keys, Value};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use super::table::Entry;
use super::{EngineInner, TxnShared};

enum Seek {
    Next,
    Key(Value),
    PrimaryKey(Value, Value),
    Advance(u32),
}

struct CursorInner {
    engine: Weak<EngineInner>,
    txn: Rc<TxnShared>,
    trans: Transaction,
    table: String,
    query: Query,
    values: bool,
    reverse: bool,
    current: RefCell<Option<Entry>>,
    started: Cell<bool>,
    done: Cell<bool>,
    on_next: RefCell<Option<Box<dyn FnMut()>>>,
    finished: RefCell<Option<oneshot::Sender<StorageResult<()>>>>,
    outcome: RefCell<Option<StorageResult<()>>>,
}

/// Cursor handle returned by the in-memory engine.
pub(crate) struct MemoryCursor {
    inner: Rc<CursorInner>,
}

impl MemoryCursor {
    pub(crate) fn new(
        engine: &Rc<EngineInner>,
        txn: &Rc<TxnShared>,
        req: OpenCursorRequest,
        table: String,
        first: Entry,
    ) -> Self {
        Self {
            inner: Rc::new(CursorInner {
                engine: Rc::downgrade(engine),
                txn: Rc::clone(txn),
                trans: req.trans,
                table,
                query: req.query,
                values: req.values,
                reverse: req.reverse,
                current: RefCell::new(Some(first)),
                started: Cell::new(false),
                done: Cell::new(false),
                on_next: RefCell::new(None),
                finished: RefCell::new(None),
                outcome: RefCell::new(None),
            }),
        }
    }
}

impl CursorInner {
    fn deliver(&self) {
        let callback = self.on_next.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback();
            if !self.done.get() {
                let mut slot = self.on_next.borrow_mut();
                if slot.is_none() {
                    *slot = Some(callback);
                }
            }
        }
    }

    fn finish(&self, outcome: StorageResult<()>) {
        if self.done.replace(true) {
            return;
        }
        self.current.borrow_mut().take();
        // Drops the callback, which usually holds a handle to this cursor.
        self.on_next.borrow_mut().take();
        if let Err(e) = &outcome {
            tracing::trace!(table = %self.table, error = %e, "cursor failed");
        }
        match self.finished.borrow_mut().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => *self.outcome.borrow_mut() = Some(outcome),
        }
    }

    fn step(self: &Rc<Self>, seek: Seek) {
        if self.done.get() {
            tracing::trace!(table = %self.table, "ignoring move on a finished cursor");
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            self.finish(Err(self.txn.closed_error()));
            return;
        };
        let this = Rc::clone(self);
        let issued = engine.submit(&self.txn, &self.table, false, move |engine| {
            if this.done.get() {
                return;
            }
            match engine.and_then(|engine| this.seek(engine, seek)) {
                Ok(Some(entry)) => {
                    *this.current.borrow_mut() = Some(entry);
                    this.deliver();
                }
                Ok(None) => this.finish(Ok(())),
                Err(e) => this.finish(Err(e)),
            }
        });
        if let Err(e) = issued {
            self.finish(Err(e));
        }
    }

    fn seek(&self, engine: &EngineInner, seek: Seek) -> StorageResult<Option<Entry>> {
        let Some((key, primary_key)) = self
            .current
            .borrow()
            .as_ref()
            .map(|e| (e.key.clone(), e.primary_key.clone()))
        else {
            return Ok(None);
        };
        let schema = engine.table_schema(&self.table)?;
        let entries = engine.entries(
            &schema,
            self.query.index.as_deref(),
            &self.query.range,
            self.reverse,
        )?;

        // Orderings are flipped for reverse cursors so "ahead" always means
        // further along the iteration.
        let direction = |ord: Ordering| if self.reverse { ord.reverse() } else { ord };
        let position = |e: &Entry, k: &Value, pk: &Value| {
            direction(compare_keys(&e.key, k).then_with(|| compare_keys(&e.primary_key, pk)))
        };
        let mut ahead = entries
            .into_iter()
            .filter(|e| position(e, &key, &primary_key) == Ordering::Greater);

        Ok(match seek {
            Seek::Next => ahead.next(),
            Seek::Key(target) => {
                ahead.find(|e| direction(compare_keys(&e.key, &target)) != Ordering::Less)
            }
            Seek::PrimaryKey(target, target_pk) => {
                ahead.find(|e| position(e, &target, &target_pk) != Ordering::Less)
            }
            Seek::Advance(count) => ahead.nth(count as usize - 1),
        })
    }
}

impl DbCursor for MemoryCursor {
    fn trans(&self) -> Transaction {
        Rc::clone(&self.inner.trans)
    }

    fn key(&self) -> Option<Value> {
        self.inner.current.borrow().as_ref().map(|e| e.key.clone())
    }

    fn primary_key(&self) -> Option<Value> {
        self.inner
            .current
            .borrow()
            .as_ref()
            .map(|e| e.primary_key.clone())
    }

    fn value(&self) -> Option<Value> {
        if !self.inner.values {
            return None;
        }
        self.inner.current.borrow().as_ref().map(|e| e.value.clone())
    }

    fn done(&self) -> bool {
        self.inner.done.get()
    }

    fn start(&self, on_next: Box<dyn FnMut()>) -> StorageFuture<()> {
        let inner = &self.inner;
        if inner.started.replace(true) {
            return future::ready(Err(StorageError::invalid_operation(
                "cursor already started",
            )))
            .boxed_local();
        }
        if inner.done.get() {
            let outcome = inner.outcome.borrow_mut().take().unwrap_or(Ok(()));
            return future::ready(outcome).boxed_local();
        }

        let (tx, rx) = oneshot::channel();
        *inner.finished.borrow_mut() = Some(tx);
        *inner.on_next.borrow_mut() = Some(on_next);
        inner.deliver();

        let id = inner.txn.id;
        async move {
            rx.await
                .unwrap_or(Err(StorageError::TransactionFinished { id }))
        }
        .boxed_local()
    }

    fn continue_key(&self, key: Option<Value>) {
        self.inner.step(key.map_or(Seek::Next, Seek::Key));
    }

    fn continue_primary_key(&self, key: Value, primary_key: Value) {
        self.inner.step(Seek::PrimaryKey(key, primary_key));
    }

    fn advance(&self, count: u32) {
        if count == 0 {
            let err = StorageError::invalid_operation("cursor advance count must be positive");
            self.inner.finish(Err(err));
            return;
        }
        self.inner.step(Seek::Advance(count));
    }

    fn stop(&self) {
        self.inner.finish(Ok(()));
    }

    fn fail(&self, error: StorageError) {
        self.inner.finish(Err(error));
    }
}
