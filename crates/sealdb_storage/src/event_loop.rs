//! Single-threaded cooperative event loop with a virtual clock.
//!
//! The loop alternates between two kinds of work:
//!
//! - **Macrotasks**: callbacks scheduled with [`LoopHandle::schedule`],
//!   such as request completions, commit notifications and timers. Each
//!   has a due time on the virtual clock and they run one at a time in
//!   `(due, submission)` order.
//! - **Microtasks**: futures spawned on the loop's [`LocalSpawner`]. After
//!   every macrotask the pool is drained until it stalls.
//!
//! A macrotask plus the drain that follows is a *turn*. Turn observers
//! run at the end of every turn; storage engines use them to close
//! transactions that went idle.
//!
//! The clock only moves when a macrotask runs, jumping straight to the
//! task's due time. Sleeping never blocks the thread.

use crate::error::{StorageError, StorageResult};
use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::{LocalSpawnExt, SpawnError};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// A callback run as one macrotask.
pub type Macrotask = Box<dyn FnOnce()>;

/// Receives a notification at the end of every turn.
pub trait TurnObserver {
    /// Called after a macrotask and its microtask drain complete.
    fn end_turn(&self);
}

struct Scheduled {
    due: u64,
    seq: u64,
    task: Macrotask,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct LoopState {
    queue: RefCell<BinaryHeap<Reverse<Scheduled>>>,
    now: Cell<u64>,
    next_seq: Cell<u64>,
    turns: Cell<u64>,
    observers: RefCell<Vec<Weak<dyn TurnObserver>>>,
}

impl LoopState {
    fn end_turn(&self) {
        self.turns.set(self.turns.get() + 1);
        // Collect first: observers may register new observers.
        let live: Vec<Rc<dyn TurnObserver>> = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.end_turn();
        }
    }

    fn pop(&self) -> Option<Scheduled> {
        self.queue.borrow_mut().pop().map(|Reverse(s)| s)
    }
}

/// Cloneable handle for scheduling work on an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    state: Rc<LoopState>,
    spawner: LocalSpawner,
}

impl LoopHandle {
    /// Returns the microtask spawner.
    pub fn spawner(&self) -> LocalSpawner {
        self.spawner.clone()
    }

    /// Spawns a microtask.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if the loop has been dropped.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) -> Result<(), SpawnError> {
        self.spawner.spawn_local(future)
    }

    /// Schedules a macrotask `delay_ms` virtual milliseconds from now.
    pub fn schedule(&self, delay_ms: u64, task: impl FnOnce() + 'static) {
        let seq = self.state.next_seq.get();
        self.state.next_seq.set(seq + 1);
        let due = self.state.now.get().saturating_add(delay_ms);
        self.state.queue.borrow_mut().push(Reverse(Scheduled {
            due,
            seq,
            task: Box::new(task),
        }));
    }

    /// Schedules a macrotask at the current time, after those already due.
    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.schedule(0, task);
    }

    /// Returns a future that resolves after `ms` virtual milliseconds.
    pub fn sleep(&self, ms: u64) -> Sleep {
        let (tx, rx) = oneshot::channel();
        self.schedule(ms, move || {
            let _ = tx.send(());
        });
        Sleep { rx }
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.state.now.get()
    }

    /// Number of turns completed so far.
    pub fn turns(&self) -> u64 {
        self.state.turns.get()
    }

    /// Registers a turn observer. Dropped observers are forgotten.
    pub fn add_turn_observer(&self, observer: Weak<dyn TurnObserver>) {
        self.state.observers.borrow_mut().push(observer);
    }
}

/// Future returned by [`LoopHandle::sleep`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    rx: oneshot::Receiver<()>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped loop also ends the sleep.
        self.rx.poll_unpin(cx).map(|_| ())
    }
}

/// The event loop itself.
///
/// Driving methods must not be called from inside a task running on the
/// same loop.
pub struct EventLoop {
    pool: RefCell<LocalPool>,
    handle: LoopHandle,
}

impl EventLoop {
    /// Creates an idle loop at virtual time zero.
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let handle = LoopHandle {
            state: Rc::new(LoopState::default()),
            spawner: pool.spawner(),
        };
        Self {
            pool: RefCell::new(pool),
            handle,
        }
    }

    /// Returns a handle for scheduling work.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Drives the loop until `future` completes and returns its output.
    ///
    /// `future` starts running in the current turn, so work it does
    /// before its first suspension shares a turn with anything already
    /// spawned.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Stalled`] if the loop runs out of work
    /// before `future` completes.
    pub fn run_until<F>(&self, future: F) -> StorageResult<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        self.handle
            .spawn(async move {
                let _ = tx.send(future.await);
            })
            .map_err(|_| StorageError::Stalled)?;

        loop {
            self.drain();
            match rx.try_recv() {
                Ok(Some(output)) => return Ok(output),
                Ok(None) => {}
                Err(_) => return Err(StorageError::Stalled),
            }
            if !self.run_macrotask() {
                tracing::debug!(now = self.handle.now(), "event loop stalled");
                return Err(StorageError::Stalled);
            }
        }
    }

    /// Runs until no macrotask or microtask is left.
    pub fn run(&self) {
        self.drain();
        while self.run_macrotask() {
            self.drain();
        }
    }

    /// Runs one microtask drain and ends the turn.
    fn drain(&self) {
        self.pool.borrow_mut().run_until_stalled();
        self.handle.state.end_turn();
    }

    fn run_macrotask(&self) -> bool {
        let state = &self.handle.state;
        let Some(next) = state.pop() else {
            return false;
        };
        if next.due > state.now.get() {
            state.now.set(next.due);
        }
        (next.task)();
        true
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
