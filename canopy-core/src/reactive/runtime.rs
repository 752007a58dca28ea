//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, derived
//! values, observers and owners. It owns the dependency graph, the
//! evaluation stack and the queue of observers waiting to run.
//!
//! # How It Works
//!
//! 1. Creating a cell, derived value, observer or owner allocates a node in
//!    the runtime's arena. Computations and owners are attached to the
//!    ambient owner so they can be disposed together.
//!
//! 2. When a computation reads a cell or derived value, the read is recorded
//!    in the current evaluation frame. When the computation finishes, its
//!    dependency edges are replaced by the recorded set.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Marks direct dependents dirty and everything downstream maybe dirty
//!    b. Queues every observer reached
//!    c. Flushes the queue, unless a batch or an evaluation is in progress
//!    d. Derived values are lazy - they recompute when pulled
//!
//! # Runtimes and Threads
//!
//! A runtime is single-threaded. Each thread lazily creates a default
//! runtime; [`Runtime::enter`] makes another runtime ambient for the
//! duration of a closure, which keeps independent graphs fully isolated.

use std::cell::{Cell as StdCell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, debug_span, error, trace, warn};

use super::config::{FlushMode, RuntimeConfig};
use super::context::Tracker;
use super::hydration::{CapturedCell, Seed};
use crate::error::{Error, Result};
use crate::graph::{
    Cleanup, Computation, DirtyState, ErrorHandler, NodeId, NodeKind, Owned, UpdateScheduler,
};

thread_local! {
    static DEFAULT_RUNTIME: Runtime = Runtime::new();
    static ENTERED: RefCell<Vec<Runtime>> = const { RefCell::new(Vec::new()) };
}

/// Handle to a reactive runtime.
///
/// Cloning the handle is cheap; all clones refer to the same graph.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    this: Weak<RuntimeInner>,
    graph: RefCell<UpdateScheduler>,
    tracker: Tracker,
    /// Owner that new nodes attach to.
    owner: StdCell<Option<NodeId>>,
    /// Implicit owner for computations created outside any owner.
    root: NodeId,
    batch_depth: StdCell<u32>,
    flushing: StdCell<bool>,
    flush_requested: StdCell<bool>,
    /// Cells whose handles were dropped while the graph was borrowed.
    released: RefCell<Vec<NodeId>>,
    pub(super) captures: RefCell<Vec<Vec<CapturedCell>>>,
    pub(super) seeds: RefCell<Vec<VecDeque<Seed>>>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut graph = UpdateScheduler::new();
        let root = graph.add_node(NodeKind::Owner, None, None);
        Self {
            inner: Rc::new_cyclic(|this| RuntimeInner {
                this: this.clone(),
                graph: RefCell::new(graph),
                tracker: Tracker::default(),
                owner: StdCell::new(None),
                root,
                batch_depth: StdCell::new(0),
                flushing: StdCell::new(false),
                flush_requested: StdCell::new(false),
                released: RefCell::new(Vec::new()),
                captures: RefCell::new(Vec::new()),
                seeds: RefCell::new(Vec::new()),
                config,
            }),
        }
    }

    /// The ambient runtime: the innermost entered runtime, or this thread's
    /// default runtime.
    pub fn current() -> Self {
        ENTERED
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(|| DEFAULT_RUNTIME.with(Runtime::clone))
    }

    /// Run `f` with this runtime as the ambient runtime.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Exit;
        impl Drop for Exit {
            fn drop(&mut self) {
                ENTERED.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }

        ENTERED.with(|stack| stack.borrow_mut().push(self.clone()));
        let _exit = Exit;
        f()
    }

    /// Run every queued observer until the graph settles.
    ///
    /// In [`FlushMode::Immediate`] this happens automatically; hosts using
    /// [`FlushMode::Deferred`] call it from their own loop.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of live nodes, including the implicit root owner.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    /// Whether observers are waiting for a flush.
    pub fn has_pending(&self) -> bool {
        self.inner.graph.borrow().has_pending()
    }

    pub fn is_batching(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.node_count())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Raise `err` through user code up to the nearest evaluation boundary.
///
/// Infallible reads such as [`Derived::get`](super::Derived::get) use this
/// to report cycles from inside computations that cannot return errors.
pub(crate) fn raise(err: Error) -> ! {
    panic::panic_any(err)
}

/// Run `f`, converting an error raised with [`raise`] back into `Err`.
pub(crate) fn catch_raised<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<Error>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

impl RuntimeInner {
    // ---- Node lifecycle ----

    /// Allocate a node owned by the ambient owner.
    ///
    /// Computations created outside any owner attach to the implicit root;
    /// owners created outside any owner are roots themselves.
    pub(crate) fn register(
        &self,
        kind: NodeKind,
        computation: Option<Rc<dyn Computation>>,
    ) -> NodeId {
        self.collect_released();
        let ambient = self.owner.get();
        let owner = match ambient {
            Some(owner) if self.contains(owner) => Some(owner),
            Some(owner) => {
                warn!(owner = %owner, ?kind, "owner was disposed; attaching to the root owner");
                Some(self.root)
            }
            None if kind == NodeKind::Owner => None,
            None => Some(self.root),
        };
        let id = self.graph.borrow_mut().add_node(kind, owner, computation);
        trace!(node = %id, ?kind, "registered");
        id
    }

    /// Allocate a node for a cell. Cells are not owned; they live as long
    /// as their handles.
    pub(crate) fn register_cell(&self) -> NodeId {
        self.collect_released();
        self.graph.borrow_mut().add_node(NodeKind::Cell, None, None)
    }

    /// Free the node of a cell whose last handle was dropped.
    pub(crate) fn release_cell(&self, id: NodeId) {
        match self.graph.try_borrow_mut() {
            Ok(mut graph) => {
                graph.remove_node(id);
            }
            Err(_) => self.released.borrow_mut().push(id),
        }
    }

    fn collect_released(&self) {
        let released = std::mem::take(&mut *self.released.borrow_mut());
        if released.is_empty() {
            return;
        }
        let mut graph = self.graph.borrow_mut();
        for id in released {
            graph.remove_node(id);
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.graph.borrow().contains(id)
    }

    pub(crate) fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.graph.borrow().get_node(id).map(|node| node.kind())
    }

    pub(crate) fn dirty_state(&self, id: NodeId) -> Option<DirtyState> {
        self.graph.borrow().get_node(id).map(|node| node.dirty_state())
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |node| node.dependents().len())
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |node| node.dependencies().len())
    }

    pub(crate) fn child_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |node| node.child_count())
    }

    // ---- Tracking ----

    /// Record a read of `id` against the running computation.
    pub(crate) fn track(&self, id: NodeId) {
        self.tracker.track(id);
    }

    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.tracker.enter(None);
        f()
    }

    // ---- Ownership ----

    pub(crate) fn current_owner(&self) -> Option<NodeId> {
        self.owner.get()
    }

    /// Run `f` with `owner` as the ambient owner.
    pub(crate) fn with_owner<R>(&self, owner: Option<NodeId>, f: impl FnOnce() -> R) -> R {
        let _guard = OwnerGuard::enter(self, owner);
        f()
    }

    /// Register a cleanup on `owner`, or on the ambient owner when `None`.
    pub(crate) fn on_cleanup(&self, owner: Option<NodeId>, cleanup: Cleanup) {
        let target = owner.or(self.owner.get()).unwrap_or(self.root);
        let registered = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_node_mut(target) {
                Some(node) if !node.is_disposing() => {
                    node.push_cleanup(cleanup);
                    None
                }
                _ => Some(cleanup),
            }
        };
        // The owner is already gone, so the cleanup is due right away.
        if let Some(cleanup) = registered {
            debug!(owner = %target, "cleanup registered on a disposed owner; running it now");
            cleanup();
        }
    }

    pub(crate) fn on_error(&self, owner: Option<NodeId>, handler: ErrorHandler) {
        let target = owner.or(self.owner.get()).unwrap_or(self.root);
        if let Some(node) = self.graph.borrow_mut().get_node_mut(target) {
            node.push_error_handler(handler);
        }
    }

    /// Route `err` to the nearest error handler on `from`'s owner chain.
    ///
    /// Returns the error back when no handler claims it.
    pub(crate) fn handle_error(&self, from: NodeId, err: Error) -> Result<()> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let (handler, owner) = match self.graph.borrow().get_node(id) {
                Some(node) => (node.error_handler(), node.owner()),
                None => (None, None),
            };
            if let Some(handler) = handler {
                warn!(node = %from, boundary = %id, error = %err, "error caught by boundary");
                handler(&err);
                return Ok(());
            }
            cursor = owner;
        }
        Err(err)
    }

    /// Dispose `id` and everything it owns.
    ///
    /// Children are disposed and cleanups run in one sequence, the reverse
    /// of their registration order. Disposing a node that is already gone,
    /// or already being disposed, does nothing.
    pub(crate) fn dispose(&self, id: NodeId) {
        let owned = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_node_mut(id) else {
                return;
            };
            if node.is_disposing() {
                return;
            }
            node.set_disposing();
            node.take_owned()
        };
        self.release_owned(owned);

        let removed = self.graph.borrow_mut().remove_node(id);
        if let Some(node) = removed {
            if let Some(computation) = node.computation() {
                computation.release();
            }
            trace!(node = %id, kind = ?node.kind(), "disposed");
        }
    }

    /// Dispose the children of `id` and run its cleanups, keeping `id` itself.
    fn reset_owned(&self, id: NodeId) {
        let owned = match self.graph.borrow_mut().get_node_mut(id) {
            Some(node) => node.take_owned(),
            None => return,
        };
        self.release_owned(owned);
    }

    fn release_owned(&self, owned: Vec<Owned>) {
        for entry in owned.into_iter().rev() {
            match entry {
                Owned::Child(child) => self.dispose(child),
                Owned::Cleanup(cleanup) => cleanup(),
            }
        }
    }

    // ---- Propagation ----

    /// Called after a cell's value changed.
    pub(crate) fn notify_changed(&self, id: NodeId) -> Result<()> {
        let queued = self.graph.borrow_mut().mark_changed(id);
        trace!(cell = %id, queued, "cell changed");
        self.maybe_flush()
    }

    /// Bring `id` up to date, recomputing only what actually changed.
    pub(crate) fn update_if_necessary(&self, id: NodeId) -> Result<()> {
        let _visit = self.tracker.visit(id)?;

        let (state, kind, sources) = match self.graph.borrow().get_node(id) {
            Some(node) => (node.dirty_state(), node.kind(), node.dependencies().to_vec()),
            None => return Ok(()),
        };
        if state == DirtyState::Clean {
            return Ok(());
        }

        // Every derived source is settled before the run, so reading one
        // during the run cannot mark this node dirty again.
        for source in sources {
            if self.node_kind(source) == Some(NodeKind::Derived) {
                self.update_if_necessary(source)?;
            }
        }

        let dirty = self.dirty_state(id) == Some(DirtyState::Dirty);
        // Clean before running, so writes made by the run itself re-mark it.
        self.set_clean(id);
        if dirty {
            if let Err(err) = self.run_computation(id) {
                if kind == NodeKind::Derived {
                    self.set_dirty(id);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run a freshly created computation for the first time.
    pub(crate) fn run_now(&self, id: NodeId) -> Result<()> {
        self.set_clean(id);
        self.run_computation(id)
    }

    fn run_computation(&self, id: NodeId) -> Result<()> {
        let (kind, computation) = match self.graph.borrow().get_node(id) {
            Some(node) => (node.kind(), node.computation()),
            None => return Ok(()),
        };
        let Some(computation) = computation else {
            return Ok(());
        };

        self.reset_owned(id);
        trace!(node = %id, ?kind, "evaluating");

        let frame = self.tracker.enter(Some(id));
        let result = {
            let _owner = OwnerGuard::enter(self, Some(id));
            self.entered(|| catch_raised(|| computation.evaluate()))
        };
        let dependencies = frame.finish();
        self.graph.borrow_mut().replace_dependencies(id, &dependencies);

        let changed = result?;
        if changed && kind == NodeKind::Derived {
            self.graph.borrow_mut().mark_dependents_dirty(id);
        }
        Ok(())
    }

    /// Run `f` with this runtime ambient, so computations triggered from
    /// a foreign context still create nodes here.
    fn entered<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.this.upgrade() {
            Some(inner) => Runtime::from_inner(inner).enter(f),
            None => f(),
        }
    }

    fn set_clean(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.mark_clean();
        }
    }

    fn set_dirty(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.mark_dirty();
        }
    }

    // ---- Scheduling ----

    /// Run `f` as one atomic update. Observers run once, after the
    /// outermost batch completes.
    pub(crate) fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let (value, flushed) = self.batch_settled(f);
        flushed.map(|()| value)
    }

    /// Like [`batch`](Self::batch), handing back the value even when the
    /// closing flush fails.
    pub(crate) fn batch_settled<R>(&self, f: impl FnOnce() -> R) -> (R, Result<()>) {
        let value = {
            let _batch = BatchGuard::enter(self);
            f()
        };
        (value, self.maybe_flush())
    }

    /// Flush if nothing is holding the queue back.
    pub(crate) fn maybe_flush(&self) -> Result<()> {
        if self.batch_depth.get() > 0 || self.flushing.get() || self.tracker.is_evaluating() {
            return Ok(());
        }
        if !self.graph.borrow().has_pending() {
            return Ok(());
        }
        match &self.config.flush_mode {
            FlushMode::Immediate => self.flush(),
            FlushMode::Deferred(hook) => {
                if !self.flush_requested.replace(true) {
                    let hook = hook.clone();
                    hook();
                }
                Ok(())
            }
        }
    }

    pub(crate) fn flush(&self) -> Result<()> {
        if self.flushing.get() {
            return Ok(());
        }
        self.flush_requested.set(false);
        let _flushing = FlushGuard::enter(self);
        let _span = debug_span!("flush").entered();

        let limit = self.config.max_flush_passes;
        let mut passes = 0;
        let mut runs = 0;
        let mut first_error = None;

        loop {
            self.collect_released();
            let queue = self.graph.borrow_mut().take_pending();
            if queue.is_empty() {
                break;
            }
            passes += 1;
            if passes > limit {
                self.graph.borrow_mut().clear_pending();
                error!(limit, "observers did not settle; aborting flush");
                return Err(Error::FlushLimit { limit });
            }

            for id in queue {
                if !self.contains(id) {
                    continue;
                }
                runs += 1;
                if let Err(err) = self.update_if_necessary(id) {
                    if let Err(err) = self.handle_error(id, err) {
                        error!(observer = %id, error = %err, "unhandled error in observer");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        debug!(passes, runs, "flush complete");
        first_error.map_or(Ok(()), Err)
    }
}

struct OwnerGuard<'a> {
    runtime: &'a RuntimeInner,
    previous: Option<NodeId>,
}

impl<'a> OwnerGuard<'a> {
    fn enter(runtime: &'a RuntimeInner, owner: Option<NodeId>) -> Self {
        let previous = runtime.owner.replace(owner);
        Self { runtime, previous }
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.runtime.owner.set(self.previous);
    }
}

struct BatchGuard<'a> {
    runtime: &'a RuntimeInner,
}

impl<'a> BatchGuard<'a> {
    fn enter(runtime: &'a RuntimeInner) -> Self {
        runtime.batch_depth.set(runtime.batch_depth.get() + 1);
        Self { runtime }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.runtime.batch_depth.set(self.runtime.batch_depth.get() - 1);
    }
}

struct FlushGuard<'a> {
    runtime: &'a RuntimeInner,
}

impl<'a> FlushGuard<'a> {
    fn enter(runtime: &'a RuntimeInner) -> Self {
        runtime.flushing.set(true);
        Self { runtime }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.flushing.set(false);
    }
}

/// Group writes so that observers run once, after `f` returns.
///
/// Batches nest; only the outermost one flushes.
///
/// # Panics
///
/// Panics if the flush that ends the batch fails and no error boundary
/// handles the failure. Use [`try_batch`] to receive the error instead.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    match try_batch(f) {
        Ok(value) => value,
        Err(err) => panic!("unhandled error while flushing a batch: {err}"),
    }
}

/// Like [`batch`], returning errors from the final flush.
pub fn try_batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    Runtime::current().inner.batch(f)
}

/// Run `f` without recording any reads as dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().inner.untracked(f)
}

// ---- Tests ----
