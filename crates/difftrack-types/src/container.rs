//! Containers that diffs apply to.
//!
//! A [`Container`] knows how to validate and apply one of its own diffs, and
//! how to describe itself as the log that rebuilds it from empty. Dispatchers
//! and listeners are generic over this trait, so sequence and mapping
//! semantics are selected by the container type at construction.

use std::collections::BTreeMap;
use std::fmt;

use crate::diff::{Diff, ListDiff, ListDiffKind, MapDiff, MapDiffKind};
use crate::error::{DiffTrackError, Result};

/// The diff type accepted by a container.
pub type DiffOf<C> =
    Diff<<C as Container>::Kind, <C as Container>::Locator, <C as Container>::Value>;

/// A mutable structure driven entirely by its diff vocabulary.
///
/// # Invariants
///
/// 1. `apply` either mutates the container exactly as described by the diff
///    or returns an error leaving the container untouched.
/// 2. `Self::replay(c.replay_log())` equals `c`.
pub trait Container: Clone + Default + fmt::Debug + 'static {
    type Kind: Copy + Eq + fmt::Debug + fmt::Display + 'static;
    type Locator: Clone + Eq + fmt::Debug + 'static;
    type Value: Clone + fmt::Debug + 'static;

    /// Apply one diff, validating it first.
    fn apply(&mut self, diff: &DiffOf<Self>) -> Result<()>;

    /// The shortest log that rebuilds this container from empty.
    fn replay_log(&self) -> Vec<DiffOf<Self>>;

    /// Number of elements currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a container by replaying `log` on an empty one.
    fn replay<I>(log: I) -> Result<Self>
    where
        I: IntoIterator<Item = DiffOf<Self>>,
    {
        let mut container = Self::default();
        for diff in log {
            container.apply(&diff)?;
        }
        Ok(container)
    }
}

fn required_value<K: fmt::Display, L, V: Clone>(diff: &Diff<K, L, V>) -> Result<V> {
    diff.value.clone().ok_or_else(|| DiffTrackError::MissingValue {
        kind: diff.kind.to_string(),
    })
}

impl<V> Container for Vec<V>
where
    V: Clone + fmt::Debug + 'static,
{
    type Kind = ListDiffKind;
    type Locator = usize;
    type Value = V;

    fn apply(&mut self, diff: &ListDiff<V>) -> Result<()> {
        let index = diff.locator;
        let len = Vec::len(self);
        match diff.kind {
            ListDiffKind::Insert => {
                if index > len {
                    return Err(DiffTrackError::OutOfRange { index, len });
                }
                let value = required_value(diff)?;
                self.insert(index, value);
            }
            ListDiffKind::Replace => {
                if index >= len {
                    return Err(DiffTrackError::OutOfRange { index, len });
                }
                self[index] = required_value(diff)?;
            }
            ListDiffKind::Delete => {
                if index >= len {
                    return Err(DiffTrackError::OutOfRange { index, len });
                }
                self.remove(index);
            }
        }
        Ok(())
    }

    fn replay_log(&self) -> Vec<ListDiff<V>> {
        self.iter()
            .enumerate()
            .map(|(index, value)| ListDiff::insert(index, value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

impl<K, V> Container for BTreeMap<K, V>
where
    K: Ord + Clone + fmt::Debug + 'static,
    V: Clone + fmt::Debug + 'static,
{
    type Kind = MapDiffKind;
    type Locator = K;
    type Value = V;

    fn apply(&mut self, diff: &MapDiff<K, V>) -> Result<()> {
        match diff.kind {
            MapDiffKind::Set => {
                let value = required_value(diff)?;
                self.insert(diff.locator.clone(), value);
            }
            MapDiffKind::Delete => {
                if self.remove(&diff.locator).is_none() {
                    return Err(DiffTrackError::KeyNotFound(format!("{:?}", diff.locator)));
                }
            }
        }
        Ok(())
    }

    fn replay_log(&self) -> Vec<MapDiff<K, V>> {
        self.iter()
            .map(|(key, value)| MapDiff::set(key.clone(), value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn list_insert_bounds() {
        let mut list: Vec<&str> = Vec::new();
        list.apply(&ListDiff::insert(0, "a")).unwrap();
        list.apply(&ListDiff::insert(1, "b")).unwrap();
        assert_eq!(list, vec!["a", "b"]);

        let err = list.apply(&ListDiff::insert(3, "c")).unwrap_err();
        assert_eq!(err, DiffTrackError::OutOfRange { index: 3, len: 2 });
        assert_eq!(list, vec!["a", "b"]);
    }

    #[test]
    fn list_replace_and_delete_bounds() {
        let mut list = vec![1, 2, 3];
        list.apply(&ListDiff::replace(2, 30)).unwrap();
        assert_eq!(list, vec![1, 2, 30]);

        assert!(matches!(
            list.apply(&ListDiff::replace(3, 0)),
            Err(DiffTrackError::OutOfRange { index: 3, len: 3 })
        ));
        assert!(matches!(
            list.apply(&ListDiff::delete(3)),
            Err(DiffTrackError::OutOfRange { index: 3, len: 3 })
        ));

        list.apply(&ListDiff::delete(0)).unwrap();
        assert_eq!(list, vec![2, 30]);
    }

    #[test]
    fn list_insert_without_value_is_rejected() {
        let mut list: Vec<i32> = Vec::new();
        let diff = ListDiff::new(ListDiffKind::Insert, 0, None);
        assert_eq!(
            list.apply(&diff).unwrap_err(),
            DiffTrackError::MissingValue {
                kind: "INSERT".into()
            }
        );
        assert!(list.is_empty());
    }

    #[test]
    fn map_set_overwrites_and_delete_requires_key() {
        let mut map = BTreeMap::new();
        map.apply(&MapDiff::set("x", 1)).unwrap();
        map.apply(&MapDiff::set("x", 2)).unwrap();
        assert_eq!(map.get("x"), Some(&2));

        map.apply(&MapDiff::delete("x")).unwrap();
        assert!(map.is_empty());

        let err = map.apply(&MapDiff::delete("x")).unwrap_err();
        assert_eq!(err, DiffTrackError::KeyNotFound("\"x\"".into()));
    }

    #[test]
    fn replay_log_of_map_is_in_key_order() {
        let map: BTreeMap<_, _> = [("b", 2), ("a", 1)].into_iter().collect();
        assert_eq!(
            map.replay_log(),
            vec![MapDiff::set("a", 1), MapDiff::set("b", 2)]
        );
    }

    #[test]
    fn replay_propagates_errors() {
        let log = vec![ListDiff::insert(0, 'a'), ListDiff::delete(1)];
        assert!(matches!(
            Vec::<char>::replay(log),
            Err(DiffTrackError::OutOfRange { index: 1, len: 1 })
        ));
    }

    proptest! {
        #[test]
        fn list_replay_log_round_trips(list in proptest::collection::vec(any::<i32>(), 0..32)) {
            let rebuilt = Vec::<i32>::replay(list.replay_log()).unwrap();
            prop_assert_eq!(rebuilt, list);
        }

        #[test]
        fn map_replay_log_round_trips(
            map in proptest::collection::btree_map(any::<u8>(), any::<i64>(), 0..32)
        ) {
            let rebuilt = BTreeMap::<u8, i64>::replay(map.replay_log()).unwrap();
            prop_assert_eq!(rebuilt, map);
        }
    }
}
