//! Payload-rewriting stage.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

use tracing::warn;

use difftrack_types::{Container, Diff, DiffOf, Result};

use crate::sink::{Attachment, DiffSink};

/// A sink that passes every payload through `mapper` before forwarding the
/// diff to `downstream`.
///
/// `D` is the container type the downstream sink replicates. It must share
/// the source's diff kinds and locators; only the value type changes. The
/// stage keeps a shadow `D` so the downstream sink receives a source of its
/// own type with every push.
pub struct DataMapper<D, S, F> {
    downstream: S,
    mapper: F,
    shadow: RefCell<D>,
    _target: PhantomData<fn() -> D>,
}

impl<D: Default, S, F> DataMapper<D, S, F> {
    pub fn new(downstream: S, mapper: F) -> Self {
        Self {
            downstream,
            mapper,
            shadow: RefCell::new(D::default()),
            _target: PhantomData,
        }
    }

    pub fn downstream(&self) -> &S {
        &self.downstream
    }
}

impl<D: fmt::Debug, S: fmt::Debug, F> fmt::Debug for DataMapper<D, S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMapper")
            .field("shadow", &self.shadow)
            .field("downstream", &self.downstream)
            .finish_non_exhaustive()
    }
}

impl<D, S, F> DataMapper<D, S, F> {
    fn map_diff<K: Copy, L: Clone, V>(&self, diff: &Diff<K, L, V>) -> Diff<K, L, D::Value>
    where
        D: Container,
        F: Fn(&V) -> D::Value,
    {
        Diff::new(diff.kind, diff.locator.clone(), diff.value().map(&self.mapper))
    }
}

impl<C, D, S, F> DiffSink<C> for DataMapper<D, S, F>
where
    C: Container,
    D: Container<Kind = C::Kind, Locator = C::Locator>,
    S: DiffSink<D>,
    F: Fn(&C::Value) -> D::Value,
{
    fn attach(&self, source: &C, attachment: Attachment) -> Result<()> {
        let shadow = D::replay(source.replay_log().iter().map(|diff| self.map_diff(diff)))?;
        self.downstream.attach(&shadow, attachment)?;
        *self.shadow.borrow_mut() = shadow;
        Ok(())
    }

    fn push(&self, diff: &DiffOf<C>, _source: &C) {
        let mapped: DiffOf<D> = self.map_diff(diff);
        if let Err(err) = self.shadow.borrow_mut().apply(&mapped) {
            warn!(diff = %mapped, %err, "mapped diff does not apply to shadow container");
        }
        self.downstream.push(&mapped, &self.shadow.borrow());
    }

    fn finalize_batch(&self) {
        self.downstream.finalize_batch();
    }

    fn detached(&self) {
        self.downstream.detached();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ListDispatcher, MapDispatcher};
    use crate::listener::{ListListener, MapListener};
    use crate::projection::BoundedProjection;
    use difftrack_types::{ListDiff, MapDiff};
    use std::collections::BTreeMap;

    #[test]
    fn payloads_are_mapped() {
        let d = ListDispatcher::<&'static str>::new();
        let l = ListListener::<String>::new();
        d.add_listener(DataMapper::<Vec<String>, _, _>::new(
            l.clone(),
            |s: &&str| s.to_lowercase(),
        ))
        .unwrap();

        d.insert(0, "AAA").unwrap();
        d.insert(0, "BBB").unwrap();
        assert_eq!(
            l.get_new_diffs().unwrap(),
            vec![
                ListDiff::insert(0, "aaa".to_string()),
                ListDiff::insert(0, "bbb".to_string()),
            ]
        );
        assert_eq!(l.get_snapshot(), vec!["bbb", "aaa"]);

        d.delete(1).unwrap();
        assert_eq!(l.get_new_diffs().unwrap(), vec![ListDiff::delete(1)]);
    }

    #[test]
    fn attach_maps_existing_contents() {
        let d = MapDispatcher::with_container(BTreeMap::from([("a", 1), ("b", 2)]));
        let l = MapListener::<&'static str, i64>::new();
        d.add_listener(DataMapper::<BTreeMap<&'static str, i64>, _, _>::new(
            l.clone(),
            |v: &i32| i64::from(*v) * 100,
        ))
        .unwrap();
        assert_eq!(l.get_snapshot(), BTreeMap::from([("a", 100), ("b", 200)]));

        d.set("a", 3).unwrap();
        assert_eq!(l.get_new_diffs().unwrap(), vec![MapDiff::set("a", 300)]);
    }

    #[test]
    fn stages_compose_with_projection() {
        let d = ListDispatcher::<i32>::new();
        let l = ListListener::<String>::new();
        let stage = DataMapper::<Vec<String>, _, _>::new(
            BoundedProjection::new(l.clone(), 2),
            |v: &i32| v.to_string(),
        );
        d.add_listener(stage).unwrap();

        for v in [1, 2, 3] {
            d.insert(0, v).unwrap();
        }
        l.get_new_diffs().unwrap();
        assert_eq!(l.get_snapshot(), vec!["3", "2"]);
    }

    #[test]
    fn finalize_is_forwarded() {
        let d = ListDispatcher::<i32>::new();
        let fired = std::rc::Rc::new(std::cell::Cell::new(false));
        let fired_clone = std::rc::Rc::clone(&fired);
        let l = ListListener::<i32>::new().on_finalize_batch(move || fired_clone.set(true));
        d.add_listener(DataMapper::<Vec<i32>, _, _>::new(l, |v: &i32| -v))
            .unwrap();

        d.with_batch(|d| d.push(1)).unwrap();
        assert!(fired.get());
    }
}
