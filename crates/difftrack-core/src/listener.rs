//! Buffered replicas with lazy diff application.
//!
//! # Design
//!
//! A [`Listener<C>`] owns a FIFO of pending diffs and a snapshot of type `C`.
//! The dispatcher only appends to the queue; diffs reach the snapshot when
//! the consumer pulls them with [`Listener::get_new_diffs`], which applies
//! each diff and then runs `on_change` for it.
//!
//! # Re-entrancy
//!
//! Callbacks run with no borrow of the listener held, so an `on_change`
//! callback may mutate the dispatcher (queueing more diffs here) or even call
//! `get_new_diffs` again. No accessor lends out a borrow of the snapshot;
//! [`Listener::get_snapshot`] returns a clone, so the dispatcher can always
//! queue into a listener.
//!
//! Every queued diff carries a depth: diffs queued while the callback of a
//! depth-`d` diff runs get depth `d + 1`. Draining a
//! diff deeper than [`ListenerConfig::recursion_limit`] fails with
//! `RecursionLimitExceeded`, leaving that diff and everything behind it in
//! the queue. The snapshot then reflects exactly the diffs drained before the
//! failure. Depths are rebased to zero when the next outermost drain starts.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::{error, warn};

use difftrack_types::{Container, DiffOf, DiffTrackError, Result};

use crate::config::ListenerConfig;
use crate::sink::{Attachment, DiffSink};

type ChangeCallback<C> = Rc<dyn Fn(&DiffOf<C>)>;
type FinalizeCallback = Rc<dyn Fn()>;

struct Pending<C: Container> {
    diff: DiffOf<C>,
    depth: usize,
}

/// Shared interior for [`Listener<C>`].
struct ListenerInner<C: Container> {
    snapshot: C,
    pending: VecDeque<Pending<C>>,
    on_change: Option<ChangeCallback<C>>,
    on_finalize_batch: Option<FinalizeCallback>,
    attachment: Option<Attachment>,
    /// Depth of the diff whose `on_change` is running, innermost first.
    active_depth: Option<usize>,
    /// Number of drains on the call stack.
    draining: usize,
    config: ListenerConfig,
}

/// A per-consumer replica of a dispatcher's container.
///
/// Cloning a `Listener` creates a new handle to the **same** queue and
/// snapshot, so the dispatcher and the consumer can each hold one.
///
/// # Invariants
///
/// 1. The snapshot reflects exactly the diffs already drained.
/// 2. Diffs are drained, applied and reported in the order they were queued,
///    including diffs queued by callbacks during the drain.
pub struct Listener<C: Container> {
    inner: Rc<RefCell<ListenerInner<C>>>,
}

/// A listener over a sequence.
pub type ListListener<V> = Listener<Vec<V>>;

/// A listener over a mapping.
pub type MapListener<K, V> = Listener<BTreeMap<K, V>>;

impl<C: Container> Clone for Listener<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: Container> Default for Listener<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Container> fmt::Debug for Listener<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Listener")
                .field("snapshot", &inner.snapshot)
                .field("pending", &inner.pending.len())
                .field("attached", &inner.attachment.is_some())
                .finish(),
            Err(_) => f.debug_struct("Listener").finish_non_exhaustive(),
        }
    }
}

impl<C: Container> Listener<C> {
    /// Create a listener with the default configuration and no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ListenerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ListenerConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ListenerInner {
                snapshot: C::default(),
                pending: VecDeque::new(),
                on_change: None,
                on_finalize_batch: None,
                attachment: None,
                active_depth: None,
                draining: 0,
                config,
            })),
        }
    }

    /// Builder form of [`set_on_change`](Self::set_on_change).
    #[must_use]
    pub fn on_change(self, callback: impl Fn(&DiffOf<C>) + 'static) -> Self {
        self.set_on_change(callback);
        self
    }

    /// Builder form of [`set_on_finalize_batch`](Self::set_on_finalize_batch).
    #[must_use]
    pub fn on_finalize_batch(self, callback: impl Fn() + 'static) -> Self {
        self.set_on_finalize_batch(callback);
        self
    }

    /// Run `callback` after each drained diff has been applied.
    pub fn set_on_change(&self, callback: impl Fn(&DiffOf<C>) + 'static) {
        self.inner.borrow_mut().on_change = Some(Rc::new(callback));
    }

    /// Run `callback` once whenever the dispatcher completes a batch.
    pub fn set_on_finalize_batch(&self, callback: impl Fn() + 'static) {
        self.inner.borrow_mut().on_finalize_batch = Some(Rc::new(callback));
    }

    #[must_use]
    pub fn config(&self) -> ListenerConfig {
        self.inner.borrow().config.clone()
    }

    /// Get a clone of the snapshot. Pending diffs are not applied.
    #[must_use]
    pub fn get_snapshot(&self) -> C {
        self.inner.borrow().snapshot.clone()
    }

    /// Returns `true` if diffs are waiting to be drained.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        !self.inner.borrow().pending.is_empty()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner
            .borrow()
            .attachment
            .as_ref()
            .is_some_and(Attachment::is_live)
    }

    /// Detach from the dispatcher this listener (or a stage wrapping it) is
    /// attached to. Returns `false` if it was not attached.
    pub fn detach(&self) -> bool {
        let attachment = self.inner.borrow().attachment.clone();
        match attachment {
            Some(attachment) => attachment.detach(),
            None => false,
        }
    }

    /// Drain every pending diff in FIFO order, applying each to the snapshot
    /// and running `on_change` for it. Diffs queued by callbacks during the
    /// drain are drained too before this returns.
    ///
    /// Returns the diffs processed, in order.
    pub fn get_new_diffs(&self) -> Result<Vec<DiffOf<C>>> {
        self.enter_drain();
        let mut applied = Vec::new();
        let result = loop {
            match self.step() {
                Ok(Some(diff)) => applied.push(diff),
                Ok(None) => break Ok(applied),
                Err(err) => break Err(err),
            }
        };
        self.exit_drain();
        result
    }

    /// Drain a single diff, if any, with the same semantics as
    /// [`get_new_diffs`](Self::get_new_diffs).
    pub fn next_diff(&self) -> Result<Option<DiffOf<C>>> {
        self.enter_drain();
        let result = self.step();
        self.exit_drain();
        result
    }

    fn enter_drain(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.draining == 0 {
            for pending in inner.pending.iter_mut() {
                pending.depth = 0;
            }
        }
        inner.draining += 1;
    }

    fn exit_drain(&self) {
        self.inner.borrow_mut().draining -= 1;
    }

    fn step(&self) -> Result<Option<DiffOf<C>>> {
        let (diff, depth, on_change) = {
            let mut inner = self.inner.borrow_mut();
            let Some(pending) = inner.pending.pop_front() else {
                return Ok(None);
            };

            let limit = inner.config.recursion_limit;
            if pending.depth > limit {
                inner.pending.push_front(pending);
                warn!(limit, pending = inner.pending.len(), "listener recursion limit exceeded");
                return Err(DiffTrackError::RecursionLimitExceeded { limit });
            }

            if let Err(err) = inner.snapshot.apply(&pending.diff) {
                error!(diff = %pending.diff, %err, "listener snapshot diverged from dispatcher");
                inner.pending.push_front(pending);
                return Err(err);
            }
            (pending.diff, pending.depth, inner.on_change.clone())
        };

        if let Some(callback) = on_change {
            let previous = self.inner.borrow_mut().active_depth.replace(depth);
            callback(&diff);
            self.inner.borrow_mut().active_depth = previous;
        }
        Ok(Some(diff))
    }
}

impl<C: Container> DiffSink<C> for Listener<C> {
    fn attach(&self, source: &C, attachment: Attachment) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.attachment.as_ref().is_some_and(Attachment::is_live) {
            return Err(DiffTrackError::InvalidState(
                "listener is already attached to a dispatcher".into(),
            ));
        }
        inner.snapshot = source.clone();
        inner.pending.clear();
        inner.attachment = Some(attachment);
        Ok(())
    }

    fn push(&self, diff: &DiffOf<C>, _source: &C) {
        let mut inner = self.inner.borrow_mut();
        let depth = inner.active_depth.map_or(0, |depth| depth + 1);
        inner.pending.push_back(Pending {
            diff: diff.clone(),
            depth,
        });
    }

    fn finalize_batch(&self) {
        let callback = self.inner.borrow().on_finalize_batch.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn detached(&self) {
        self.inner.borrow_mut().attachment = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ListDispatcher, MapDispatcher};
    use difftrack_types::{ListDiff, MapDiff};
    use std::cell::Cell;

    #[test]
    fn diffs_apply_lazily() {
        let d = ListDispatcher::new();
        let l = ListListener::new();
        d.add_listener(l.clone()).unwrap();

        d.insert(0, "AAA").unwrap();
        assert!(l.get_snapshot().is_empty());
        assert_eq!(l.get_new_diffs().unwrap(), vec![ListDiff::insert(0, "AAA")]);
        assert_eq!(l.get_snapshot(), vec!["AAA"]);

        d.insert(0, "BBB").unwrap();
        assert_eq!(l.get_new_diffs().unwrap(), vec![ListDiff::insert(0, "BBB")]);
        assert!(l.get_new_diffs().unwrap().is_empty());
        assert_eq!(l.get_snapshot(), vec!["BBB", "AAA"]);

        d.delete(0).unwrap();
        assert_eq!(l.get_snapshot(), vec!["BBB", "AAA"]);
        assert_eq!(l.get_new_diffs().unwrap(), vec![ListDiff::delete(0)]);
        assert_eq!(l.get_snapshot(), vec!["AAA"]);

        d.replace(0, "CCC").unwrap();
        assert_eq!(l.get_snapshot(), vec!["AAA"]);
        assert_eq!(l.get_new_diffs().unwrap(), vec![ListDiff::replace(0, "CCC")]);
        assert_eq!(l.get_snapshot(), vec!["CCC"]);
    }

    #[test]
    fn map_listener_follows_dispatcher() {
        let d = MapDispatcher::new();
        let l = MapListener::new();
        d.add_listener(l.clone()).unwrap();

        d.set("x", 123).unwrap();
        d.set("y", 456).unwrap();
        assert!(l.get_snapshot().is_empty());
        assert_eq!(
            l.get_new_diffs().unwrap(),
            vec![MapDiff::set("x", 123), MapDiff::set("y", 456)]
        );

        d.set("y", 9999).unwrap();
        d.delete("x").unwrap();
        assert_eq!(
            l.get_new_diffs().unwrap(),
            vec![MapDiff::set("y", 9999), MapDiff::delete("x")]
        );
        assert_eq!(l.get_snapshot(), BTreeMap::from([("y", 9999)]));
    }

    #[test]
    fn next_diff_applies_one_at_a_time() {
        let d = MapDispatcher::new();
        let l = MapListener::new();
        d.add_listener(l.clone()).unwrap();

        d.set("x", 123).unwrap();
        d.set("y", 456).unwrap();
        assert_eq!(l.next_diff().unwrap(), Some(MapDiff::set("x", 123)));
        assert_eq!(l.get_snapshot(), BTreeMap::from([("x", 123)]));
        assert!(l.has_changed());
        assert_eq!(l.next_diff().unwrap(), Some(MapDiff::set("y", 456)));
        assert_eq!(l.next_diff().unwrap(), None);
    }

    #[test]
    fn on_change_sees_each_drained_diff() {
        let d = MapDispatcher::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let l = MapListener::<&'static str, i32>::new().on_change(move |diff| {
            seen_clone.borrow_mut().push(diff.clone());
        });
        d.add_listener(l.clone()).unwrap();

        d.set("x", 123).unwrap();
        assert!(seen.borrow().is_empty());
        l.get_new_diffs().unwrap();
        assert_eq!(*seen.borrow(), vec![MapDiff::set("x", 123)]);
    }

    #[test]
    fn callback_diffs_reach_every_listener_in_order() {
        let d = ListDispatcher::<i32>::new();
        let handle = d.clone();
        let doubler = ListListener::<i32>::new().on_change(move |diff| {
            if diff.kind == difftrack_types::ListDiffKind::Insert {
                let value = diff.value().copied().unwrap_or_default();
                handle.replace(diff.index(), value * 2).unwrap();
            }
        });
        let plain = ListListener::new();
        d.add_listener(doubler.clone()).unwrap();
        d.add_listener(plain.clone()).unwrap();

        d.insert(0, 7).unwrap();
        let expected = vec![ListDiff::insert(0, 7), ListDiff::replace(0, 14)];
        assert_eq!(doubler.get_new_diffs().unwrap(), expected);
        assert_eq!(plain.get_new_diffs().unwrap(), expected);
        assert_eq!(doubler.get_snapshot(), vec![14]);
    }

    #[test]
    fn callback_reads_own_snapshot_before_mutating() {
        let d = ListDispatcher::<usize>::new();
        let l = ListListener::<usize>::new();
        let handle = d.clone();
        let me = l.clone();
        l.set_on_change(move |_| {
            let len = me.get_snapshot().len();
            if len < 3 {
                handle.push(len).unwrap();
            }
        });
        d.add_listener(l.clone()).unwrap();

        d.push(0).unwrap();
        assert_eq!(l.get_new_diffs().unwrap().len(), 3);
        assert_eq!(l.get_snapshot(), vec![0, 1, 2]);
        assert_eq!(l.get_snapshot(), d.snapshot());
        assert!(!l.has_changed());
    }

    #[test]
    fn runaway_callback_hits_recursion_limit() {
        let d = ListDispatcher::<u32>::new();
        let handle = d.clone();
        let l = ListListener::<u32>::new().on_change(move |_| {
            handle.insert(0, 0).unwrap();
        });
        d.add_listener(l.clone()).unwrap();

        d.insert(0, 0).unwrap();
        let err = l.get_new_diffs().unwrap_err();
        assert_eq!(err, DiffTrackError::RecursionLimitExceeded { limit: 10 });
        // The original diff plus ten nested ones were applied.
        assert_eq!(l.get_snapshot().len(), 11);
        assert_eq!(l.pending_len(), 1);
        assert_eq!(d.len(), 12);
    }

    #[test]
    fn recursion_limit_is_configurable() {
        let d = ListDispatcher::<u32>::new();
        let handle = d.clone();
        let l = ListListener::<u32>::with_config(ListenerConfig::with_recursion_limit(2)).on_change(
            move |_| {
                handle.push(1).unwrap();
            },
        );
        d.add_listener(l.clone()).unwrap();

        d.push(0).unwrap();
        assert!(matches!(
            l.get_new_diffs(),
            Err(DiffTrackError::RecursionLimitExceeded { limit: 2 })
        ));
        assert_eq!(l.get_snapshot(), vec![0, 1, 1]);
    }

    #[test]
    fn bounded_chain_terminates() {
        let d = ListDispatcher::<&'static str>::new();
        let handle = d.clone();
        let l = ListListener::<&'static str>::new().on_change(move |diff| {
            if diff.kind == difftrack_types::ListDiffKind::Insert {
                handle.replace(diff.index(), "replaced").unwrap();
            }
        });
        d.add_listener(l.clone()).unwrap();

        d.insert(0, "a").unwrap();
        d.insert(0, "b").unwrap();
        let diffs = l.get_new_diffs().unwrap();
        assert_eq!(diffs.len(), 4);
        assert_eq!(l.get_snapshot(), d.snapshot());
    }

    #[test]
    fn nested_drain_from_callback_preserves_order() {
        let d = ListDispatcher::<i32>::new();
        let l = ListListener::<i32>::new();
        let handle = d.clone();
        let inner_listener = l.clone();
        let nested = Rc::new(RefCell::new(Vec::new()));
        let nested_clone = Rc::clone(&nested);
        l.set_on_change(move |diff| {
            if diff.value() == Some(&1) {
                handle.push(2).unwrap();
                nested_clone
                    .borrow_mut()
                    .extend(inner_listener.get_new_diffs().unwrap());
            }
        });
        d.add_listener(l.clone()).unwrap();

        d.push(1).unwrap();
        let outer = l.get_new_diffs().unwrap();
        assert_eq!(outer, vec![ListDiff::insert(0, 1)]);
        assert_eq!(*nested.borrow(), vec![ListDiff::insert(1, 2)]);
        assert_eq!(l.get_snapshot(), vec![1, 2]);
    }

    #[test]
    fn finalize_callback_counts_batches() {
        let d: ListDispatcher<i32> = ListDispatcher::new();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);
        let l = ListListener::new().on_finalize_batch(move || count_clone.set(count_clone.get() + 1));
        d.add_listener(l.clone()).unwrap();

        d.with_batch(|d| d.push(1)).unwrap();
        assert_eq!(count.get(), 1);
        // Independent of draining.
        assert_eq!(l.pending_len(), 1);
    }

    #[test]
    fn detach_uses_back_reference() {
        let d = ListDispatcher::new();
        let l = ListListener::new();
        d.add_listener(l.clone()).unwrap();
        assert!(l.is_attached());

        assert!(l.detach());
        assert!(!l.is_attached());
        assert!(!l.detach());
        d.push('a').unwrap();
        assert!(!l.has_changed());
    }

    #[test]
    fn double_attach_is_rejected() {
        let a = ListDispatcher::<char>::new();
        let b = ListDispatcher::<char>::new();
        let l = ListListener::new();
        a.add_listener(l.clone()).unwrap();
        assert!(matches!(
            b.add_listener(l.clone()),
            Err(DiffTrackError::InvalidState(_))
        ));
        assert_eq!(b.listener_count(), 0);
    }

    #[test]
    fn reattach_rebaselines() {
        let a = ListDispatcher::with_container(vec!['a']);
        let b = ListDispatcher::with_container(vec!['x', 'y']);
        let l = ListListener::new();
        let id = a.add_listener(l.clone()).unwrap();
        a.push('b').unwrap();
        a.remove_listener(id);

        b.add_listener(l.clone()).unwrap();
        assert_eq!(l.pending_len(), 0);
        assert_eq!(l.get_snapshot(), vec!['x', 'y']);
    }

    #[test]
    fn dropped_dispatcher_releases_listener() {
        let l = ListListener::<i32>::new();
        {
            let d = ListDispatcher::new();
            d.add_listener(l.clone()).unwrap();
            d.push(1).unwrap();
        }
        assert!(!l.is_attached());
        assert_eq!(l.get_new_diffs().unwrap(), vec![ListDiff::insert(0, 1)]);
    }
}
