//! Grouping of contiguous sequence diffs into splice runs.

use std::iter::Peekable;

use serde::{Deserialize, Serialize};

use difftrack_types::{DiffTrackError, ListDiff, ListDiffKind, Result};

/// A run of same-kind diffs, expressed as the splice
/// `seq[start..stop] = payload`.
///
/// INSERT runs have `stop == start`, REPLACE runs cover
/// `start..start + payload.len()`, and DELETE runs cover one position per
/// merged diff with an empty payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquashedRun<V> {
    pub kind: ListDiffKind,
    pub start: usize,
    pub stop: usize,
    pub payload: Vec<V>,
}

impl<V> SquashedRun<V> {
    /// Number of diffs merged into this run.
    pub fn len(&self) -> usize {
        match self.kind {
            ListDiffKind::Delete => self.stop.saturating_sub(self.start),
            _ => self.payload.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Perform the splice on `target`.
    pub fn apply(&self, target: &mut Vec<V>) -> Result<()>
    where
        V: Clone,
    {
        if self.start > self.stop || self.stop > target.len() {
            return Err(DiffTrackError::OutOfRange {
                index: self.stop,
                len: target.len(),
            });
        }
        target.splice(self.start..self.stop, self.payload.iter().cloned());
        Ok(())
    }
}

/// Group a sequence log into maximal runs.
///
/// Consecutive diffs merge when they share a kind and their indices follow
/// that kind's progression: `i, i + 1, ...` for INSERT and REPLACE, and
/// `i, i, ...` for DELETE. The returned iterator is lazy and consumes
/// `diffs` as it goes. A run containing an INSERT or REPLACE without a
/// value is reported as `MissingValue`, and a REPLACE or DELETE run whose
/// end does not fit in `usize` as `OutOfRange`. Iteration continues after
/// either.
pub fn squash_list_diffs<V, I>(diffs: I) -> Squash<I::IntoIter>
where
    I: IntoIterator<Item = ListDiff<V>>,
{
    Squash {
        diffs: diffs.into_iter().peekable(),
    }
}

/// Iterator returned by [`squash_list_diffs`].
pub struct Squash<I: Iterator> {
    diffs: Peekable<I>,
}

fn continues(kind: ListDiffKind, previous: usize, index: usize) -> bool {
    match kind {
        ListDiffKind::Delete => index == previous,
        ListDiffKind::Insert | ListDiffKind::Replace => previous.checked_add(1) == Some(index),
    }
}

impl<V, I> Iterator for Squash<I>
where
    I: Iterator<Item = ListDiff<V>>,
{
    type Item = Result<SquashedRun<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.diffs.next()?;
        let kind = first.kind;
        let start = first.locator;

        let mut previous = start;
        let mut count = 1;
        let mut payload = Vec::new();
        let mut missing = false;
        let mut take = |diff: ListDiff<V>| {
            if kind != ListDiffKind::Delete {
                match diff.value {
                    Some(value) => payload.push(value),
                    None => missing = true,
                }
            }
        };

        take(first);
        while let Some(diff) = self
            .diffs
            .next_if(|diff| diff.kind == kind && continues(kind, previous, diff.locator))
        {
            previous = diff.locator;
            count += 1;
            take(diff);
        }

        if missing {
            return Some(Err(DiffTrackError::MissingValue {
                kind: kind.to_string(),
            }));
        }
        let stop = match kind {
            ListDiffKind::Insert => start,
            ListDiffKind::Replace | ListDiffKind::Delete => match start.checked_add(count) {
                Some(stop) => stop,
                None => {
                    return Some(Err(DiffTrackError::OutOfRange {
                        index: start,
                        len: usize::MAX - count,
                    }))
                }
            },
        };
        Some(Ok(SquashedRun {
            kind,
            start,
            stop,
            payload,
        }))
    }
}
