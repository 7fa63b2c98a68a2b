//! The seam between a dispatcher and whatever consumes its diffs.
//!
//! A dispatcher fans every diff out to a set of [`DiffSink`]s. A
//! [`Listener`](crate::Listener) is the terminal sink; rewriting stages such
//! as [`BoundedProjection`](crate::BoundedProjection) and
//! [`DataMapper`](crate::DataMapper) are sinks wrapping another sink.

use std::rc::Weak;

use difftrack_types::{Container, DiffOf, Result};

/// Identifies one attached sink within its dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Type-erased detach capability of a dispatcher.
pub(crate) trait Detach {
    fn detach(&self, id: ListenerId) -> bool;
}

/// Non-owning link from a sink back to the dispatcher it is attached to.
///
/// Holding an `Attachment` never keeps the dispatcher alive; once the
/// dispatcher is dropped, [`detach`](Attachment::detach) returns `false`.
#[derive(Clone)]
pub struct Attachment {
    id: ListenerId,
    dispatcher: Weak<dyn Detach>,
}

impl Attachment {
    pub(crate) fn new(id: ListenerId, dispatcher: Weak<dyn Detach>) -> Self {
        Self { id, dispatcher }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns `true` while the dispatcher is still alive.
    pub fn is_live(&self) -> bool {
        self.dispatcher.strong_count() > 0
    }

    /// Remove the attached sink from its dispatcher.
    ///
    /// Returns `false` if the dispatcher is gone or no longer holds the sink.
    pub fn detach(&self) -> bool {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.detach(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Receiver of the diffs emitted by a dispatcher over container `C`.
///
/// # Contract
///
/// - `attach` is called once when the sink is added, with the dispatcher's
///   container as it stands. The sink takes it as its baseline.
/// - `push` is called once per emitted diff, after the dispatcher's container
///   has been mutated; `source` is that post-mutation container. `push` must
///   only record the diff: it runs while the dispatcher is mid-dispatch, so
///   it must not call back into the dispatcher.
/// - `finalize_batch` is called once per completed batch.
/// - `detached` is called after the dispatcher dropped the sink.
pub trait DiffSink<C: Container> {
    fn attach(&self, source: &C, attachment: Attachment) -> Result<()>;

    fn push(&self, diff: &DiffOf<C>, source: &C);

    fn finalize_batch(&self) {}

    fn detached(&self) {}
}
