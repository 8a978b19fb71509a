//! Cursor adapter that decodes each entry before exposing it.

use crate::error::{CryptoError, STAGE};
use crate::keepalive::TransactionKeeper;
use crate::record::RecordCodec;
use futures::task::LocalSpawnExt;
use sealdb_storage::{Cursor, DbCursor, StorageError, StorageFuture, Transaction, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Lifecycle of a [`CryptoCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Not started.
    Idle,
    /// Waiting for the lower cursor to move.
    Advancing,
    /// Decoding the current entry.
    Decrypting,
    /// The decoded entry is visible and the continuation has run.
    Ready,
    /// Iteration ended.
    Done,
    /// Decoding failed; the lower cursor was failed with the error.
    Failed,
}

type OnNext = Rc<RefCell<Box<dyn FnMut()>>>;

struct CursorShared {
    inner: Cursor,
    codec: RecordCodec,
    keeper: TransactionKeeper,
    decoded: RefCell<Option<Value>>,
    state: Cell<CursorState>,
}

impl CursorShared {
    /// Runs on every lower-cursor step, before the caller's continuation.
    fn intercept(self: &Rc<Self>, on_next: &OnNext) {
        self.state.set(CursorState::Decrypting);
        let trans = self.inner.trans();
        let decode = self.codec.decode_opt(self.inner.value());
        let kept = self.keeper.keep_try(&trans, decode);

        let this = Rc::clone(self);
        let on_next = Rc::clone(on_next);
        let task = async move {
            match kept.await {
                Ok(value) => {
                    *this.decoded.borrow_mut() = value;
                    this.state.set(CursorState::Ready);
                    (on_next.borrow_mut())();
                }
                Err(e) => this.fail_with(e),
            }
        };
        if let Err(e) = trans.spawner().spawn_local(task) {
            self.state.set(CursorState::Failed);
            self.inner.fail(StorageError::interceptor(STAGE, e));
        }
    }

    fn fail_with(&self, error: CryptoError) {
        tracing::debug!(txn = %self.inner.trans().id(), error = %error, "cursor decode failed");
        self.state.set(CursorState::Failed);
        self.decoded.borrow_mut().take();
        self.inner.fail(error.into_storage());
    }

    fn moving(&self) {
        self.state.set(CursorState::Advancing);
    }
}

/// Wraps a lower cursor and decodes every entry it visits.
///
/// [`DbCursor::value`] returns the decoded record. Keys and primary keys
/// pass through, since indexed fields are stored in plaintext. Moves
/// delegate to the lower cursor.
#[derive(Clone)]
pub struct CryptoCursor {
    shared: Rc<CursorShared>,
}

impl CryptoCursor {
    /// Wraps `inner`.
    pub fn new(inner: Cursor, codec: RecordCodec, keeper: TransactionKeeper) -> Self {
        Self {
            shared: Rc::new(CursorShared {
                inner,
                codec,
                keeper,
                decoded: RefCell::new(None),
                state: Cell::new(CursorState::Idle),
            }),
        }
    }

    /// Current state of the adapter.
    pub fn state(&self) -> CursorState {
        match self.shared.state.get() {
            CursorState::Failed => CursorState::Failed,
            _ if self.shared.inner.done() => CursorState::Done,
            state => state,
        }
    }
}

impl DbCursor for CryptoCursor {
    fn trans(&self) -> Transaction {
        self.shared.inner.trans()
    }

    fn key(&self) -> Option<Value> {
        self.shared.inner.key()
    }

    fn primary_key(&self) -> Option<Value> {
        self.shared.inner.primary_key()
    }

    fn value(&self) -> Option<Value> {
        self.shared.decoded.borrow().clone()
    }

    fn done(&self) -> bool {
        self.shared.inner.done()
    }

    fn start(&self, on_next: Box<dyn FnMut()>) -> StorageFuture<()> {
        let shared = Rc::clone(&self.shared);
        let on_next: OnNext = Rc::new(RefCell::new(on_next));
        shared.moving();
        self.shared
            .inner
            .start(Box::new(move || shared.intercept(&on_next)))
    }

    fn continue_key(&self, key: Option<Value>) {
        self.shared.moving();
        self.shared.inner.continue_key(key);
    }

    fn continue_primary_key(&self, key: Value, primary_key: Value) {
        self.shared.moving();
        self.shared.inner.continue_primary_key(key, primary_key);
    }

    fn advance(&self, count: u32) {
        self.shared.moving();
        self.shared.inner.advance(count);
    }

    fn stop(&self) {
        self.shared.inner.stop();
    }

    fn fail(&self, error: StorageError) {
        self.shared.inner.fail(error);
    }
}

impl std::fmt::Debug for CryptoCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoCursor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
