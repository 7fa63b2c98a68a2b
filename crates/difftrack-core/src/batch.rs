//! Scoped batches.
//!
//! A [`BatchScope`] is an RAII guard over an open batch: dropping it ends the
//! batch, so `on_finalize_batch` fires exactly once per scope on every exit
//! path, including early returns and unwinding.

use std::ops::Deref;

use tracing::warn;

use difftrack_types::{Container, Result};

use crate::dispatcher::Dispatcher;

/// Guard for a batch opened with [`Dispatcher::batch`].
///
/// Dereferences to the dispatcher, so mutations can be issued through the
/// scope directly.
#[must_use = "dropping the scope ends the batch immediately"]
pub struct BatchScope<C: Container> {
    dispatcher: Dispatcher<C>,
    finished: bool,
}

impl<C: Container> BatchScope<C> {
    pub(crate) fn new(dispatcher: Dispatcher<C>) -> Self {
        Self {
            dispatcher,
            finished: false,
        }
    }

    /// End the batch now, reporting any error instead of logging it.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.dispatcher.end_batch()
    }
}

impl<C: Container> Deref for BatchScope<C> {
    type Target = Dispatcher<C>;

    fn deref(&self) -> &Dispatcher<C> {
        &self.dispatcher
    }
}

impl<C: Container> Drop for BatchScope<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.dispatcher.end_batch() {
            warn!(%error, "batch scope dropped without ending its batch");
        }
    }
}

impl<C: Container> std::fmt::Debug for BatchScope<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
