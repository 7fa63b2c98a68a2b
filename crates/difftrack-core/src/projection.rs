//! Length-bounded view over a sequence dispatcher.
//!
//! [`BoundedProjection`] sits between a list dispatcher and a downstream
//! sink and rewrites the diff stream so the downstream replica always equals
//! the first `max_size` elements of the dispatcher's list. Diffs located at
//! or beyond the window are suppressed; structural changes inside it are
//! followed by a synthesized DELETE (trim) or INSERT (refill).

use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;

use tracing::trace;

use difftrack_types::{ListDiff, ListDiffKind, Result};

use crate::sink::{Attachment, DiffSink};

/// A sink forwarding a windowed version of every list diff to `downstream`.
///
/// # Invariants
///
/// 1. The downstream replica never holds more than `max_size` elements.
/// 2. After each forwarded diff the downstream replica equals
///    `source[..min(source.len(), max_size)]`.
pub struct BoundedProjection<S> {
    downstream: S,
    max_size: usize,
    /// Length of the downstream replica once all forwarded diffs apply.
    visible: Cell<usize>,
}

impl<S> BoundedProjection<S> {
    pub fn new(downstream: S, max_size: usize) -> Self {
        Self {
            downstream,
            max_size,
            visible: Cell::new(0),
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn downstream(&self) -> &S {
        &self.downstream
    }

    fn window<'a, V: Clone>(&self, source: &'a Vec<V>) -> Cow<'a, Vec<V>> {
        if source.len() <= self.max_size {
            Cow::Borrowed(source)
        } else {
            Cow::Owned(bounded_window(source, self.max_size))
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for BoundedProjection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedProjection")
            .field("max_size", &self.max_size)
            .field("visible", &self.visible.get())
            .field("downstream", &self.downstream)
            .finish()
    }
}

impl<V, S> DiffSink<Vec<V>> for BoundedProjection<S>
where
    V: Clone + fmt::Debug + 'static,
    S: DiffSink<Vec<V>>,
{
    fn attach(&self, source: &Vec<V>, attachment: Attachment) -> Result<()> {
        let window = self.window(source);
        self.downstream.attach(&window, attachment)?;
        self.visible.set(window.len());
        Ok(())
    }

    fn push(&self, diff: &ListDiff<V>, source: &Vec<V>) {
        let n = self.max_size;
        if diff.index() >= n {
            return;
        }

        let window = self.window(source);
        let window = &*window;
        self.downstream.push(diff, window);

        match diff.kind {
            ListDiffKind::Insert => {
                let visible = self.visible.get() + 1;
                if visible > n {
                    trace!(index = n, "trimming bounded projection");
                    self.downstream.push(&ListDiff::delete(n), window);
                    self.visible.set(visible - 1);
                } else {
                    self.visible.set(visible);
                }
            }
            ListDiffKind::Delete => {
                let visible = self.visible.get().saturating_sub(1);
                match source.get(n - 1) {
                    Some(value) if visible < n => {
                        trace!(index = n - 1, "refilling bounded projection");
                        self.downstream
                            .push(&ListDiff::insert(n - 1, value.clone()), window);
                        self.visible.set(visible + 1);
                    }
                    _ => self.visible.set(visible),
                }
            }
            ListDiffKind::Replace => {}
        }
    }

    fn finalize_batch(&self) {
        self.downstream.finalize_batch();
    }

    fn detached(&self) {
        self.downstream.detached();
    }
}

/// The prefix of `source` a projection of width `max_size` shows.
pub fn bounded_window<V: Clone>(source: &[V], max_size: usize) -> Vec<V> {
    source[..source.len().min(max_size)].to_vec()
}
