//! Keeping a transaction alive across work the storage core cannot see.
//!
//! The storage core commits a transaction at the end of any turn in which
//! it has no outstanding request. Awaiting a cipher, a serializer or a
//! timer inside a transaction therefore lets it slip away. The keeper
//! hides such a wait behind a heartbeat: it issues a side-effect-free
//! [`DbTransaction::probe`], and from the probe's completion callback it
//! delivers settled results and re-issues the probe for as long as any
//! wait is pending.
//!
//! Results are delivered from inside a probe callback, so the code
//! awaiting them resumes while the transaction is active and may issue
//! further requests.
//!
//! Concurrent waits on one transaction share a context and a heartbeat.
//! Each new wait chains onto the previous one; the heartbeat stops only
//! once the whole chain has drained. Each caller still receives its own
//! result as soon as its own work settles, in settlement order.

use crate::error::{CryptoError, CryptoResult};
use futures::channel::oneshot::{self, Canceled};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures::task::LocalSpawnExt;
use sealdb_storage::{StorageError, StorageResult, Transaction, TransactionId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::rc::{Rc, Weak};

type Contexts = RefCell<HashMap<TransactionId, Rc<TransactionContext>>>;
type Chain = Shared<LocalBoxFuture<'static, ()>>;
type Action = Box<dyn FnOnce()>;

/// Per-transaction heartbeat state.
struct TransactionContext {
    trans: Transaction,
    store: String,
    /// Latest wait in the chain, tagged with the token of the call that
    /// started it.
    current: RefCell<Option<(u64, Chain)>>,
    /// Settlements waiting for the next heartbeat tick.
    queue: RefCell<VecDeque<Action>>,
    spinning: Cell<bool>,
    /// Set when a heartbeat could not be issued or failed; settlements
    /// are then delivered immediately.
    broken: Cell<bool>,
    contexts: Weak<Contexts>,
}

impl TransactionContext {
    fn start(self: &Rc<Self>) {
        tracing::trace!(txn = %self.trans.id(), store = %self.store, "heartbeat started");
        self.broken.set(false);
        self.spin();
    }

    fn spin(self: &Rc<Self>) {
        self.spinning.set(true);
        let ctx = Rc::clone(self);
        let issued = self
            .trans
            .probe(&self.store, Box::new(move |result| ctx.tick(result)));
        if let Err(e) = issued {
            self.break_with(&e);
        }
    }

    fn tick(self: &Rc<Self>, result: StorageResult<()>) {
        if let Err(e) = result {
            self.break_with(&e);
            return;
        }
        self.drain();
        if self.current.borrow().is_some() {
            self.spin();
        } else {
            self.spinning.set(false);
            tracing::trace!(txn = %self.trans.id(), "heartbeat stopped");
            self.release_if_idle();
        }
    }

    fn break_with(self: &Rc<Self>, error: &StorageError) {
        tracing::warn!(txn = %self.trans.id(), error = %error, "heartbeat failed");
        self.spinning.set(false);
        self.broken.set(true);
        self.drain();
        self.release_if_idle();
    }

    fn drain(&self) {
        loop {
            // Released before running: actions may queue more actions.
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(action) => action(),
                None => break,
            }
        }
    }

    fn deliver(&self, action: Action) {
        if self.spinning.get() && !self.broken.get() {
            self.queue.borrow_mut().push_back(action);
        } else {
            action();
        }
    }

    /// Clears the current wait if no newer wait started after `token`.
    fn finish_wait(self: &Rc<Self>, token: u64) {
        {
            let mut current = self.current.borrow_mut();
            if matches!(&*current, Some((latest, _)) if *latest == token) {
                *current = None;
            }
        }
        self.release_if_idle();
    }

    fn release_if_idle(self: &Rc<Self>) {
        if self.spinning.get() || self.current.borrow().is_some() || !self.queue.borrow().is_empty()
        {
            return;
        }
        if let Some(contexts) = self.contexts.upgrade() {
            let mut map = contexts.borrow_mut();
            let id = self.trans.id();
            if map.get(&id).is_some_and(|ctx| Rc::ptr_eq(ctx, self)) {
                map.remove(&id);
            }
        }
    }
}

/// Keeps transactions alive while arbitrary futures complete.
///
/// Cloning shares the context table.
#[derive(Clone, Default)]
pub struct TransactionKeeper {
    contexts: Rc<Contexts>,
    next_token: Rc<Cell<u64>>,
}

impl TransactionKeeper {
    /// Creates a keeper with no contexts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits `work` without letting `trans` auto-commit.
    ///
    /// `work` is spawned on the transaction's spawner right away and makes
    /// progress whether or not the returned future is polled. The returned
    /// future resolves, from inside a heartbeat callback, once `work` has
    /// completed. It fails with [`Canceled`] only if the spawner dropped
    /// the driving task.
    ///
    /// The keeper never aborts the transaction. If the heartbeat cannot
    /// run (the transaction already finished or went inactive), `work`'s
    /// output is delivered directly and the caller meets the storage
    /// core's own error on its next request.
    pub fn keep<T: 'static>(
        &self,
        trans: &Transaction,
        work: impl Future<Output = T> + 'static,
    ) -> LocalBoxFuture<'static, Result<T, Canceled>> {
        let ctx = self.context(trans);
        let token = self.next_token.get();
        self.next_token.set(token + 1);

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = ctx.current.borrow_mut().take();
        let chain: Chain = async move {
            if let Some((_, previous)) = previous {
                previous.await;
            }
            let _ = done_rx.await;
        }
        .boxed_local()
        .shared();
        *ctx.current.borrow_mut() = Some((token, chain.clone()));

        if !ctx.spinning.get() {
            ctx.start();
        }

        let (result_tx, result_rx) = oneshot::channel::<T>();
        let driver_ctx = Rc::clone(&ctx);
        let driver = async move {
            let output = work.await;
            driver_ctx.deliver(Box::new(move || {
                let _ = result_tx.send(output);
            }));
            let _ = done_tx.send(());
            chain.await;
            driver_ctx.finish_wait(token);
        };

        if let Err(e) = trans.spawner().spawn_local(driver) {
            tracing::warn!(txn = %trans.id(), error = %e, "could not spawn keepalive driver");
            ctx.finish_wait(token);
        }
        result_rx.boxed_local()
    }

    /// Like [`TransactionKeeper::keep`] for fallible work, folding
    /// cancellation into [`CryptoError::KeepAliveCanceled`].
    pub fn keep_try<T: 'static>(
        &self,
        trans: &Transaction,
        work: impl Future<Output = CryptoResult<T>> + 'static,
    ) -> LocalBoxFuture<'static, CryptoResult<T>> {
        let id = trans.id();
        self.keep(trans, work)
            .map(move |outcome| {
                outcome.unwrap_or_else(|_| Err(CryptoError::KeepAliveCanceled { id }))
            })
            .boxed_local()
    }

    /// Returns true while `id` has a live context.
    pub fn is_keeping(&self, id: TransactionId) -> bool {
        self.contexts.borrow().contains_key(&id)
    }

    /// Number of transactions with a live context.
    pub fn active_contexts(&self) -> usize {
        self.contexts.borrow().len()
    }

    fn context(&self, trans: &Transaction) -> Rc<TransactionContext> {
        let id = trans.id();
        if let Some(ctx) = self.contexts.borrow().get(&id) {
            return Rc::clone(ctx);
        }

        let ctx = Rc::new(TransactionContext {
            trans: Rc::clone(trans),
            store: trans.store_names().first().cloned().unwrap_or_default(),
            current: RefCell::new(None),
            queue: RefCell::new(VecDeque::new()),
            spinning: Cell::new(false),
            broken: Cell::new(false),
            contexts: Rc::downgrade(&self.contexts),
        });
        self.contexts.borrow_mut().insert(id, Rc::clone(&ctx));
        ctx
    }
}

impl std::fmt::Debug for TransactionKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionKeeper")
            .field("contexts", &self.active_contexts())
            .finish()
    }
}
