//! Diff propagation for difftrack.
//!
//! A [`Dispatcher`] owns the authoritative container and turns every
//! mutation into a diff. Each attached [`Listener`] buffers those diffs and
//! applies them to its own snapshot only when the consumer asks for them.
//! Rewriting stages ([`BoundedProjection`], [`DataMapper`]) wrap a listener
//! and implement the same [`DiffSink`] seam.
//!
//! Everything here is single-threaded: handles are `Rc`-shared and
//! callbacks run synchronously on the caller's stack.

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod listener;
pub mod mapper;
pub mod projection;
pub mod sink;

pub use batch::BatchScope;
pub use config::{ListenerConfig, DEFAULT_RECURSION_LIMIT};
pub use dispatcher::{Dispatcher, ListDispatcher, MapDispatcher};
pub use listener::{ListListener, Listener, MapListener};
pub use mapper::DataMapper;
pub use projection::{bounded_window, BoundedProjection};
pub use sink::{Attachment, DiffSink, ListenerId};

pub use difftrack_types::{
    Container, Diff, DiffOf, DiffTrackError, ListDiff, ListDiffKind, MapDiff, MapDiffKind, Result,
};
