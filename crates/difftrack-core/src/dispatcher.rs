//! The authoritative container and its diff fan-out.
//!
//! # Design
//!
//! [`Dispatcher<C>`] wraps a container `C` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). Every successful mutation is expressed as a
//! diff, applied to the live container through [`Container::apply`], and
//! then appended to every attached sink before the call returns. The live
//! container therefore always equals the replay of every diff emitted so far.
//!
//! Sinks are held as `Rc<dyn DiffSink<C>>`; sinks hold only a weak
//! [`Attachment`] back, so a listener never keeps its dispatcher alive.
//!
//! # Failure Modes
//!
//! - **Invalid locator**: `OutOfRange` / `KeyNotFound`, container untouched,
//!   nothing emitted.
//! - **Mutation during fan-out**: a sink calling back into the dispatcher
//!   from `push` gets `InvalidState`.
//! - **Batch misuse**: nested `begin_batch` or unmatched `end_batch` fails
//!   with `InvalidState`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use difftrack_types::{Container, DiffOf, DiffTrackError, ListDiff, MapDiff, Result};

use crate::batch::BatchScope;
use crate::sink::{Attachment, Detach, DiffSink, ListenerId};

/// Shared interior for [`Dispatcher<C>`].
pub(crate) struct DispatcherInner<C: Container> {
    container: C,
    sinks: Vec<(ListenerId, Rc<dyn DiffSink<C>>)>,
    next_id: u64,
    /// Mutations emitted since `begin_batch`; `None` when no batch is open.
    batch: Option<usize>,
    emitted: u64,
}

/// Owner of the live container; emits one diff per successful mutation.
///
/// Cloning a `Dispatcher` creates a new handle to the **same** container and
/// listener set, which is how `on_change` callbacks reach back into it.
pub struct Dispatcher<C: Container> {
    inner: Rc<RefCell<DispatcherInner<C>>>,
}

/// A dispatcher over a sequence.
pub type ListDispatcher<V> = Dispatcher<Vec<V>>;

/// A dispatcher over a mapping.
pub type MapDispatcher<K, V> = Dispatcher<BTreeMap<K, V>>;

impl<C: Container> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: Container> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Container> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Dispatcher")
                .field("container", &inner.container)
                .field("listener_count", &inner.sinks.len())
                .field("in_batch", &inner.batch.is_some())
                .finish(),
            Err(_) => f.debug_struct("Dispatcher").finish_non_exhaustive(),
        }
    }
}

fn busy() -> DiffTrackError {
    DiffTrackError::InvalidState("dispatcher is busy dispatching a diff".into())
}

impl<C: Container> Dispatcher<C> {
    /// Create a dispatcher over an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::with_container(C::default())
    }

    /// Create a dispatcher pre-seeded with `container`.
    ///
    /// The dispatcher owns what it is given; pass a clone to keep the
    /// caller's copy untouched.
    #[must_use]
    pub fn with_container(container: C) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DispatcherInner {
                container,
                sinks: Vec::new(),
                next_id: 0,
                batch: None,
                emitted: 0,
            })),
        }
    }

    /// Get a clone of the live container.
    #[must_use]
    pub fn snapshot(&self) -> C {
        self.inner.borrow().container.clone()
    }

    /// Access the live container by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.inner.borrow().container)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().container.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of diffs emitted over the dispatcher's lifetime.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.inner.borrow().emitted
    }

    /// Attach a sink. It is baselined on the current container and receives
    /// every diff emitted from now on.
    pub fn add_listener<S>(&self, sink: S) -> Result<ListenerId>
    where
        S: DiffSink<C> + 'static,
    {
        let detach: Rc<dyn Detach> = Rc::clone(&self.inner) as Rc<dyn Detach>;
        let mut inner = self.inner.try_borrow_mut().map_err(|_| busy())?;
        let id = ListenerId(inner.next_id);
        sink.attach(&inner.container, Attachment::new(id, Rc::downgrade(&detach)))?;
        inner.next_id += 1;
        inner.sinks.push((id, Rc::new(sink)));
        debug!(listener = %id, listeners = inner.sinks.len(), "listener attached");
        Ok(id)
    }

    /// Detach a sink. Diffs already queued for it are kept.
    ///
    /// Returns `false` if no sink with this id is attached.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        remove_sink(&self.inner, id)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().sinks.len()
    }

    /// Apply `diff` to the live container and fan it out to every sink.
    ///
    /// On error nothing is emitted and the container is unchanged.
    pub fn apply(&self, diff: DiffOf<C>) -> Result<()> {
        let mut inner = self.inner.try_borrow_mut().map_err(|_| busy())?;
        inner.container.apply(&diff)?;
        inner.emitted += 1;
        if let Some(count) = inner.batch.as_mut() {
            *count += 1;
        }

        let inner = &*inner;
        for (_, sink) in &inner.sinks {
            sink.push(&diff, &inner.container);
        }
        trace!(diff = %diff, listeners = inner.sinks.len(), "diff emitted");
        Ok(())
    }

    /// Returns `true` while a batch is open.
    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.inner.borrow().batch.is_some()
    }

    /// Open a batch. Batches do not nest.
    pub fn begin_batch(&self) -> Result<()> {
        let mut inner = self.inner.try_borrow_mut().map_err(|_| busy())?;
        if inner.batch.is_some() {
            return Err(DiffTrackError::InvalidState(
                "a batch is already open".into(),
            ));
        }
        inner.batch = Some(0);
        debug!("batch opened");
        Ok(())
    }

    /// Close the open batch and run every sink's `finalize_batch` once.
    ///
    /// Finalizers run after the dispatcher is released, so they may mutate
    /// it; those mutations are not part of the batch just closed.
    pub fn end_batch(&self) -> Result<()> {
        let (mutations, sinks) = {
            let mut inner = self.inner.try_borrow_mut().map_err(|_| busy())?;
            let mutations = inner.batch.take().ok_or_else(|| {
                DiffTrackError::InvalidState("no batch is open".into())
            })?;
            let sinks: Vec<Rc<dyn DiffSink<C>>> =
                inner.sinks.iter().map(|(_, sink)| Rc::clone(sink)).collect();
            (mutations, sinks)
        };

        debug!(mutations, listeners = sinks.len(), "batch finalized");
        for sink in &sinks {
            sink.finalize_batch();
        }
        Ok(())
    }

    /// Open a batch that ends when the returned scope is finished or dropped.
    pub fn batch(&self) -> Result<BatchScope<C>> {
        self.begin_batch()?;
        Ok(BatchScope::new(self.clone()))
    }

    /// Run `f` inside a batch. The batch ends on every exit path of `f`,
    /// including errors and panics.
    pub fn with_batch<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let scope = self.batch()?;
        let result = f(self);
        let ended = scope.finish();
        let value = result?;
        ended?;
        Ok(value)
    }
}

impl<V> Dispatcher<Vec<V>>
where
    V: Clone + fmt::Debug + 'static,
{
    /// Insert `value` before `index`; `index` may equal the length.
    pub fn insert(&self, index: usize, value: V) -> Result<()> {
        self.apply(ListDiff::insert(index, value))
    }

    /// Overwrite the value at `index`.
    pub fn replace(&self, index: usize, value: V) -> Result<()> {
        self.apply(ListDiff::replace(index, value))
    }

    /// Remove the value at `index`.
    pub fn delete(&self, index: usize) -> Result<()> {
        self.apply(ListDiff::delete(index))
    }

    /// Append `value` at the end.
    pub fn push(&self, value: V) -> Result<()> {
        let len = self.len();
        self.insert(len, value)
    }
}

impl<K, V> Dispatcher<BTreeMap<K, V>>
where
    K: Ord + Clone + fmt::Debug + 'static,
    V: Clone + fmt::Debug + 'static,
{
    /// Insert or overwrite `key`.
    pub fn set(&self, key: K, value: V) -> Result<()> {
        self.apply(MapDiff::set(key, value))
    }

    /// Remove `key`; fails with `KeyNotFound` if it is absent.
    pub fn delete(&self, key: K) -> Result<()> {
        self.apply(MapDiff::delete(key))
    }
}

fn remove_sink<C: Container>(cell: &RefCell<DispatcherInner<C>>, id: ListenerId) -> bool {
    let removed = {
        let Ok(mut inner) = cell.try_borrow_mut() else {
            tracing::warn!(listener = %id, "cannot detach while dispatching");
            return false;
        };
        match inner.sinks.iter().position(|(sink_id, _)| *sink_id == id) {
            Some(position) => inner.sinks.remove(position).1,
            None => return false,
        }
    };
    removed.detached();
    debug!(listener = %id, "listener detached");
    true
}

impl<C: Container> Detach for RefCell<DispatcherInner<C>> {
    fn detach(&self, id: ListenerId) -> bool {
        remove_sink(self, id)
    }
}
