//! Middleware stacks.
//!
//! A middleware wraps a [`DbCore`] and returns another `DbCore` with the
//! same interface. Stages are ordered by level: the lowest level sits
//! directly on the base core and each higher stage wraps the one below.
//! Stages with equal levels keep registration order, so a stage
//! registered later wraps one registered earlier.

use crate::error::StorageResult;
use crate::schema::DbSchema;
use crate::traits::{DbCore, DbCoreTable, Transaction, TransactionMode};
use std::cell::RefCell;
use std::rc::Rc;

/// One stage of a storage stack.
pub trait Middleware {
    /// Stage name, unique within a stack.
    fn name(&self) -> &str;

    /// Stack position; higher levels wrap lower ones.
    fn level(&self) -> i32 {
        0
    }

    /// Wraps `lower` and returns the wrapped core.
    fn create(&self, lower: Rc<dyn DbCore>) -> Rc<dyn DbCore>;
}

/// An ordered set of middleware stages.
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    stages: Vec<Rc<dyn Middleware>>,
}

impl MiddlewareStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage. A stage with the same name is replaced.
    pub fn push(&mut self, middleware: Rc<dyn Middleware>) -> &mut Self {
        self.remove(middleware.name());
        self.stages.push(middleware);
        self
    }

    /// Unregisters the stage named `name`. Returns true if one was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|m| m.name() != name);
        self.stages.len() != before
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names from innermost to outermost.
    pub fn names(&self) -> Vec<String> {
        self.ordered().iter().map(|m| m.name().to_string()).collect()
    }

    /// Wraps `base` in every stage, innermost first.
    pub fn build(&self, base: Rc<dyn DbCore>) -> Rc<dyn DbCore> {
        self.ordered().into_iter().fold(base, |lower, stage| {
            tracing::trace!(stage = stage.name(), level = stage.level(), "wrapping storage core");
            stage.create(lower)
        })
    }

    fn ordered(&self) -> Vec<Rc<dyn Middleware>> {
        let mut stages = self.stages.clone();
        // Stable: equal levels keep registration order.
        stages.sort_by_key(|m| m.level());
        stages
    }
}

/// A base core plus the middleware stack layered on top of it.
///
/// Every call goes through the outermost stage. The base core stays
/// reachable for raw inspection via [`Database::base`].
pub struct Database {
    base: Rc<dyn DbCore>,
    stack: RefCell<MiddlewareStack>,
    core: RefCell<Rc<dyn DbCore>>,
}

impl Database {
    /// Wraps `base` with no middleware.
    pub fn new(base: Rc<dyn DbCore>) -> Self {
        Self {
            core: RefCell::new(Rc::clone(&base)),
            base,
            stack: RefCell::new(MiddlewareStack::new()),
        }
    }

    /// Registers a middleware stage and rebuilds the stack.
    #[must_use]
    pub fn with(self, middleware: Rc<dyn Middleware>) -> Self {
        self.use_middleware(middleware);
        self
    }

    /// Registers a middleware stage and rebuilds the stack.
    pub fn use_middleware(&self, middleware: Rc<dyn Middleware>) {
        self.stack.borrow_mut().push(middleware);
        self.rebuild();
    }

    /// Unregisters a middleware stage and rebuilds the stack.
    pub fn unuse_middleware(&self, name: &str) -> bool {
        let removed = self.stack.borrow_mut().remove(name);
        if removed {
            self.rebuild();
        }
        removed
    }

    /// The outermost core.
    pub fn core(&self) -> Rc<dyn DbCore> {
        Rc::clone(&self.core.borrow())
    }

    /// The unwrapped base core.
    pub fn base(&self) -> Rc<dyn DbCore> {
        Rc::clone(&self.base)
    }

    /// Stage names from innermost to outermost.
    pub fn middleware_names(&self) -> Vec<String> {
        self.stack.borrow().names()
    }

    /// Returns the current schema.
    pub fn schema(&self) -> DbSchema {
        self.core.borrow().schema()
    }

    /// Returns a table through the full stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TableNotFound`] for unknown tables.
    pub fn table(&self, name: &str) -> StorageResult<Rc<dyn DbCoreTable>> {
        self.core.borrow().table(name)
    }

    /// Starts a transaction through the full stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TableNotFound`] if a store is unknown.
    pub fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> StorageResult<Transaction> {
        self.core.borrow().transaction(stores, mode)
    }

    fn rebuild(&self) {
        let built = self.stack.borrow().build(Rc::clone(&self.base));
        *self.core.borrow_mut() = built;
    }
}

impl DbCore for Database {
    fn schema(&self) -> DbSchema {
        Database::schema(self)
    }

    fn table(&self, name: &str) -> StorageResult<Rc<dyn DbCoreTable>> {
        Database::table(self, name)
    }

    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Transaction> {
        Database::transaction(self, stores, mode)
    }
}
