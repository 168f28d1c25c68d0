//! Indexed ordered set: records addressable by id, iterable in record order.
//!
//! Two views of the same data are kept in lock-step: a hash index from id to
//! record for O(1) membership and replacement, and an ordered set for
//! smallest-first scheduling decisions. [`Sorter::update`] replaces a record
//! in place, so a record can be re-ranked repeatedly without the caller
//! tracking its previous position.
//!
//! Record ordering must be total and deterministic; schedulers in this crate
//! break timestamp ties by id for exactly that reason.

use std::collections::BTreeSet;

use ahash::AHashMap;

/// A record that knows its own identity.
///
/// `Ord` decides scheduling order; `id()` decides identity. Two records with
/// the same id replace each other in the sorter regardless of their order.
pub trait SortRecord: Ord + Clone {
    type Id: Copy + Eq + std::hash::Hash;

    fn id(&self) -> Self::Id;
}

pub struct Sorter<R: SortRecord> {
    index: AHashMap<R::Id, R>,
    ordered: BTreeSet<R>,
}

impl<R: SortRecord> Sorter<R> {
    pub fn new() -> Self {
        Self {
            index: AHashMap::new(),
            ordered: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.index.is_empty(), self.ordered.is_empty());
        self.ordered.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.index.len(), self.ordered.len());
        self.ordered.len()
    }

    #[inline]
    pub fn contains(&self, id: R::Id) -> bool {
        self.index.contains_key(&id)
    }

    /// The current record for `id`, if present.
    pub fn find(&self, id: R::Id) -> Option<&R> {
        self.index.get(&id)
    }

    /// Insert a new record, or replace the existing record with the same id.
    pub fn update(&mut self, record: R) {
        if let Some(previous) = self.index.insert(record.id(), record.clone()) {
            self.ordered.remove(&previous);
        }
        self.ordered.insert(record);
    }

    /// Remove the record for `id`. Returns whether anything was removed.
    pub fn remove(&mut self, id: R::Id) -> bool {
        match self.index.remove(&id) {
            Some(record) => {
                self.ordered.remove(&record);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.ordered.clear();
    }

    /// Smallest record in the ordering, if any.
    pub fn front(&self) -> Option<&R> {
        self.ordered.first()
    }

    /// Largest record in the ordering, if any.
    pub fn back(&self) -> Option<&R> {
        self.ordered.last()
    }

    /// 1-based position of `id` in ascending order; 0 when absent.
    pub fn rank(&self, id: R::Id) -> usize {
        if !self.contains(id) {
            return 0;
        }
        self.ordered
            .iter()
            .position(|record| record.id() == id)
            .map(|position| position + 1)
            .unwrap_or(0)
    }

    /// Records in ascending order.
    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.ordered.iter()
    }
}

impl<R: SortRecord> Default for Sorter<R> {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(all(test, feature = "stdx-proptest"))]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const PROPTEST_CASES: u32 = 32;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct Rec {
        weight: u8,
        id: u8,
    }

    impl SortRecord for Rec {
        type Id = u8;

        fn id(&self) -> u8 {
            self.id
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Update(u8, u8),
        Remove(u8),
        Clear,
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            crate::test_utils::proptest_cases(PROPTEST_CASES)
        ))]

        /// The sorter agrees with an id->record map ordered by (weight, id).
        #[test]
        fn model(
            ops in prop::collection::vec(prop_oneof![
                (any::<u8>(), any::<u8>()).prop_map(|(id, weight)| Op::Update(id, weight)),
                any::<u8>().prop_map(Op::Remove),
                Just(Op::Clear),
            ], 1..200)
        ) {
            let mut sorter: Sorter<Rec> = Sorter::new();
            let mut shadow: BTreeMap<u8, u8> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Update(id, weight) => {
                        sorter.update(Rec { weight, id });
                        shadow.insert(id, weight);
                    }
                    Op::Remove(id) => {
                        prop_assert_eq!(sorter.remove(id), shadow.remove(&id).is_some());
                    }
                    Op::Clear => {
                        sorter.clear();
                        shadow.clear();
                    }
                }

                prop_assert_eq!(sorter.len(), shadow.len());

                let mut expected: Vec<Rec> = shadow
                    .iter()
                    .map(|(&id, &weight)| Rec { weight, id })
                    .collect();
                expected.sort();

                let actual: Vec<Rec> = sorter.records().copied().collect();
                prop_assert_eq!(actual, expected.clone());
                prop_assert_eq!(sorter.front().copied(), expected.first().copied());
            }
        }
    }
}
