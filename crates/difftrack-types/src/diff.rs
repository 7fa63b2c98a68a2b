use serde::{Deserialize, Serialize};

/// Kind of change applied to a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListDiffKind {
    /// A value was inserted before `locator`; later elements shift up.
    Insert,
    /// The value at `locator` was overwritten.
    Replace,
    /// The value at `locator` was removed; later elements shift down.
    Delete,
}

impl std::fmt::Display for ListDiffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Insert => "INSERT",
            Self::Replace => "REPLACE",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// Kind of change applied to a mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapDiffKind {
    /// The key was inserted or overwritten.
    Set,
    /// The key was removed.
    Delete,
}

impl std::fmt::Display for MapDiffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Set => "SET",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// One atomic change to a container.
///
/// A diff is the consumer-facing `(kind, locator, value)` triple. The
/// locator is an index for sequences and a key for mappings; `value` is
/// `None` exactly for DELETE diffs. Diffs are immutable once created and the
/// order of a diff log is significant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diff<K, L, V> {
    /// What kind of change this is.
    pub kind: K,
    /// Where the change happened.
    pub locator: L,
    /// The new value, absent for deletions.
    pub value: Option<V>,
}

/// A diff against a sequence, located by index.
pub type ListDiff<V> = Diff<ListDiffKind, usize, V>;

/// A diff against a mapping, located by key.
pub type MapDiff<K, V> = Diff<MapDiffKind, K, V>;

impl<K, L, V> Diff<K, L, V> {
    /// Build a diff from its raw parts.
    pub fn new(kind: K, locator: L, value: Option<V>) -> Self {
        Self {
            kind,
            locator,
            value,
        }
    }

    /// Rewrite the payload, keeping kind and locator.
    pub fn map_value<W>(self, f: impl FnOnce(V) -> W) -> Diff<K, L, W> {
        Diff {
            kind: self.kind,
            locator: self.locator,
            value: self.value.map(f),
        }
    }

    /// Borrow the payload, if any.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }
}

impl<V> Diff<ListDiffKind, usize, V> {
    pub fn insert(index: usize, value: V) -> Self {
        Self::new(ListDiffKind::Insert, index, Some(value))
    }

    pub fn replace(index: usize, value: V) -> Self {
        Self::new(ListDiffKind::Replace, index, Some(value))
    }

    pub fn delete(index: usize) -> Self {
        Self::new(ListDiffKind::Delete, index, None)
    }

    /// The sequence position this diff targets.
    pub fn index(&self) -> usize {
        self.locator
    }
}

impl<K, V> Diff<MapDiffKind, K, V> {
    pub fn set(key: K, value: V) -> Self {
        Self::new(MapDiffKind::Set, key, Some(value))
    }

    pub fn delete(key: K) -> Self {
        Self::new(MapDiffKind::Delete, key, None)
    }

    /// The mapping key this diff targets.
    pub fn key(&self) -> &K {
        &self.locator
    }
}

impl<K: std::fmt::Display, L: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Display
    for Diff<K, L, V>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} {:?} = {:?}", self.kind, self.locator, value),
            None => write!(f, "{} {:?}", self.kind, self.locator),
        }
    }
}
