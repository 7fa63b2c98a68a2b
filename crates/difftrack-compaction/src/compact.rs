//! Diff log compaction.
//!
//! Compaction rewrites a diff log into a shorter log with the same net
//! effect. Mapping logs reduce to the last write per key. Sequence logs
//! reduce by pairing each REPLACE or DELETE with the earlier diff that
//! produced the element it targets:
//!
//! ```text
//! [INSERT,  REPLACE] -> [INSERT]   (insert the final value directly)
//! [REPLACE, REPLACE] -> [REPLACE]
//! [INSERT,  DELETE ] -> []
//! [REPLACE, DELETE ] -> [DELETE]
//! ```

use std::collections::{BTreeMap, BTreeSet};

use difftrack_types::{ListDiff, ListDiffKind, MapDiff, MapDiffKind};

/// Reduce a mapping log to the last diff for each key.
///
/// Survivors keep the relative order of their last occurrence. DELETE
/// survivors carry no value. The result is a fixed point:
/// compacting it again returns it unchanged.
pub fn compact_map_diffs<K, V, I>(diffs: I) -> Vec<MapDiff<K, V>>
where
    K: Ord + Clone,
    I: IntoIterator<Item = MapDiff<K, V>>,
{
    let diffs: Vec<_> = diffs.into_iter().collect();
    let mut seen = BTreeSet::new();
    let mut kept: Vec<_> = diffs
        .into_iter()
        .rev()
        .filter(|diff| seen.insert(diff.locator.clone()))
        .map(|diff| match diff.kind {
            MapDiffKind::Set => diff,
            MapDiffKind::Delete => MapDiff::delete(diff.locator),
        })
        .collect();
    kept.reverse();
    kept
}

/// Reduce a sequence log using the pairing rules of this module.
///
/// Replaying the result on the sequence the original log was emitted
/// against produces the same sequence as replaying the original log.
pub fn compact_list_diffs<V, I>(diffs: I) -> Vec<ListDiff<V>>
where
    I: IntoIterator<Item = ListDiff<V>>,
{
    let mut compactor = ListCompactor::default();
    for diff in diffs {
        compactor.push(diff);
    }
    compactor.compacted
}

struct ListCompactor<V> {
    compacted: Vec<ListDiff<V>>,
    /// Current sequence position -> index of the compacted diff that last
    /// wrote it.
    origins: BTreeMap<usize, usize>,
}

impl<V> Default for ListCompactor<V> {
    fn default() -> Self {
        Self {
            compacted: Vec::new(),
            origins: BTreeMap::new(),
        }
    }
}

impl<V> ListCompactor<V> {
    fn push(&mut self, diff: ListDiff<V>) {
        match diff.kind {
            ListDiffKind::Insert => self.append(diff),
            ListDiffKind::Replace => self.replace(diff),
            ListDiffKind::Delete => self.delete(diff),
        }
    }

    /// Keep `diff` as is, shifting the tracked positions it moves.
    fn append(&mut self, diff: ListDiff<V>) {
        let index = diff.locator;
        match diff.kind {
            ListDiffKind::Insert => self.shift_up_from(index),
            ListDiffKind::Delete => self.shift_down_after(index),
            ListDiffKind::Replace => {}
        }
        self.origins.insert(index, self.compacted.len());
        self.compacted.push(diff);
    }

    fn replace(&mut self, diff: ListDiff<V>) {
        let Some(&origin) = self.origins.get(&diff.locator) else {
            return self.append(diff);
        };
        if self.compacted[origin].kind == ListDiffKind::Delete {
            return self.append(diff);
        }
        self.compacted[origin].value = diff.value;
    }

    fn delete(&mut self, diff: ListDiff<V>) {
        let index = diff.locator;
        let Some(&origin) = self.origins.get(&index) else {
            return self.append(diff);
        };
        match self.compacted[origin].kind {
            ListDiffKind::Delete => self.append(diff),
            ListDiffKind::Replace => {
                self.remove(origin);
                self.origins.remove(&index);
                self.append(diff);
            }
            ListDiffKind::Insert => {
                let inserted_at = self.compacted[origin].locator;
                self.reindex_after_cancelled_insert(origin, inserted_at);
                self.remove(origin);
                self.origins.remove(&index);
                self.shift_down_after(index);
            }
        }
    }

    /// Drop a compacted diff and fix up the indices pointing past it.
    fn remove(&mut self, origin: usize) {
        self.compacted.remove(origin);
        for target in self.origins.values_mut() {
            if *target > origin {
                *target -= 1;
            }
        }
    }

    /// Later compacted diffs were computed against a sequence that still
    /// held the cancelled insert. Shift the ones located past it down by one,
    /// tracking where the inserted element sat when each of them applied.
    fn reindex_after_cancelled_insert(&mut self, origin: usize, mut position: usize) {
        for diff in self.compacted.iter_mut().skip(origin + 1) {
            match diff.kind {
                ListDiffKind::Insert if diff.locator <= position => {
                    position = position.saturating_add(1)
                }
                ListDiffKind::Delete if diff.locator < position => position -= 1,
                _ => {}
            }
            if diff.locator >= position {
                diff.locator = diff.locator.saturating_sub(1);
            }
        }
    }

    /// Positions pushed past `usize::MAX` are no longer addressable and are
    /// dropped.
    fn shift_up_from(&mut self, index: usize) {
        let shifted = self.origins.split_off(&index);
        self.origins.extend(
            shifted
                .into_iter()
                .filter_map(|(position, origin)| Some((position.checked_add(1)?, origin))),
        );
    }

    fn shift_down_after(&mut self, index: usize) {
        let Some(first) = index.checked_add(1) else {
            return;
        };
        let shifted = self.origins.split_off(&first);
        for (position, origin) in shifted {
            self.origins.insert(position - 1, origin);
        }
    }
}
