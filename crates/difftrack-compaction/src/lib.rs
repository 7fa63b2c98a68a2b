//! Offline reduction of difftrack diff logs.
//!
//! # Key Functions
//!
//! - [`compact_map_diffs`] -- Last write per key for mapping logs
//! - [`compact_list_diffs`] -- Pair and cancel writes in sequence logs
//! - [`squash_list_diffs`] / [`SquashedRun`] -- Group contiguous sequence diffs into splices

pub mod compact;
pub mod squash;

pub use compact::{compact_list_diffs, compact_map_diffs};
pub use squash::{squash_list_diffs, Squash, SquashedRun};
