//! Observer Implementation
//!
//! An Observer is a side-effecting computation that runs whenever its
//! dependencies change. Observers are how reactive state reaches the
//! outside world: updating host nodes, logging, or syncing with an external
//! system.
//!
//! # How Observers Work
//!
//! 1. When created, the observer runs immediately to discover its dependencies.
//!
//! 2. When any dependency changes, the observer is queued and re-runs once
//!    the current write or batch completes.
//!
//! 3. Before each re-run, observers and owners it created are disposed and
//!    cleanups registered with [`on_cleanup`](super::on_cleanup) run.
//!
//! 4. Disposal runs the cleanups one last time and stops all re-runs.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use crate::error::{BoxError, Error, Result};
use crate::graph::{Computation, NodeId, NodeKind};

type Body = Box<dyn FnMut() -> Result<()>>;

struct ObserverInner {
    body: RefCell<Option<Body>>,
    disposed: StdCell<bool>,
    runs: StdCell<usize>,
}

/// Puts the body back after a run, unless the observer was disposed
/// while it was running.
struct BodyGuard<'a> {
    inner: &'a ObserverInner,
    body: Option<Body>,
}

impl Drop for BodyGuard<'_> {
    fn drop(&mut self) {
        if !self.inner.disposed.get() {
            *self.inner.body.borrow_mut() = self.body.take();
        }
    }
}

impl Computation for ObserverInner {
    fn evaluate(&self) -> Result<bool> {
        let body = self.body.borrow_mut().take();
        let mut guard = BodyGuard { inner: self, body };
        let Some(body) = guard.body.as_mut() else {
            return Ok(false);
        };
        self.runs.set(self.runs.get() + 1);
        body()?;
        Ok(true)
    }

    fn release(&self) {
        self.disposed.set(true);
        let body = self.body.borrow_mut().take();
        drop(body);
    }
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// The observer is owned by the ambient [`Owner`](super::Owner) (or the
/// runtime's root owner) and stays alive until that owner is disposed or
/// [`Observer::dispose`] is called. Dropping the handle does not stop it.
///
/// # Example
///
/// ```rust
/// use canopy_core::{Cell, Observer};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let name = Cell::new("world".to_string());
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let observer = {
///     let (name, log) = (name.clone(), log.clone());
///     Observer::new(move || log.borrow_mut().push(format!("hello {}", name.get())))
/// };
///
/// name.set("canopy".to_string());
/// assert_eq!(*log.borrow(), ["hello world", "hello canopy"]);
///
/// observer.dispose();
/// name.set("nobody".to_string());
/// assert_eq!(log.borrow().len(), 2);
/// ```
pub struct Observer {
    id: NodeId,
    runtime: Weak<RuntimeInner>,
    inner: Rc<ObserverInner>,
}

impl Observer {
    /// Create and immediately run an observer.
    ///
    /// # Panics
    ///
    /// Panics if the first run fails (a dependency cycle) and no error
    /// boundary handles the failure.
    pub fn new(mut run: impl FnMut() + 'static) -> Self {
        match Self::with_body(move || {
            run();
            Ok(())
        }) {
            Ok(observer) => observer,
            Err(err) => panic!("observer failed on its first run: {err}"),
        }
    }

    /// Create and immediately run a fallible observer.
    ///
    /// Errors returned by `run` go to the nearest error boundary. If there
    /// is none, an error on the first run disposes the observer and is
    /// returned here; errors on later runs are returned by the write or
    /// flush that triggered them.
    pub fn try_new<E>(mut run: impl FnMut() -> Result<(), E> + 'static) -> Result<Self>
    where
        E: Into<BoxError>,
    {
        Self::with_body(move || run().map_err(|err| Error::Evaluation(err.into())))
    }

    pub(crate) fn with_body(run: impl FnMut() -> Result<()> + 'static) -> Result<Self> {
        let runtime = Runtime::current().inner;
        let inner = Rc::new(ObserverInner {
            body: RefCell::new(Some(Box::new(run))),
            disposed: StdCell::new(false),
            runs: StdCell::new(0),
        });
        let id = runtime.register(NodeKind::Observer, Some(inner.clone() as Rc<dyn Computation>));
        let observer = Self {
            id,
            runtime: Rc::downgrade(&runtime),
            inner,
        };

        if let Err(err) = runtime.run_now(id) {
            if let Err(err) = runtime.handle_error(id, err) {
                runtime.dispose(id);
                return Err(err);
            }
        }
        runtime.maybe_flush()?;
        Ok(observer)
    }

    /// Get the observer's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Stop the observer. Its cleanups run and it never runs again.
    pub fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
            || self
                .runtime
                .upgrade()
                .map_or(true, |runtime| !runtime.contains(self.id))
    }

    /// Get the number of times this observer has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Number of values read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime.upgrade().map_or(0, |runtime| {
            runtime.dependency_count(self.id)
        })
    }
}

impl Clone for Observer {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: self.runtime.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---- Tests ----
