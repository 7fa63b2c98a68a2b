//! Diff vocabulary for difftrack.
//!
//! Every other difftrack crate depends on `difftrack-types`. It defines the
//! immutable diff record exchanged between dispatchers and listeners, and
//! the [`Container`] capability that gives a diff its meaning.
//!
//! # Key Types
//!
//! - [`Diff`] — One atomic change: kind, locator, optional value
//! - [`ListDiffKind`] / [`ListDiff`] — Sequence diffs (INSERT, REPLACE, DELETE)
//! - [`MapDiffKind`] / [`MapDiff`] — Mapping diffs (SET, DELETE)
//! - [`Container`] — Apply diffs and describe a container as a replay log
//! - [`DiffTrackError`] — Errors shared by all difftrack crates

pub mod container;
pub mod diff;
pub mod error;

pub use container::{Container, DiffOf};
pub use diff::{Diff, ListDiff, ListDiffKind, MapDiff, MapDiffKind};
pub use error::{DiffTrackError, Result};
