/// Per-event reachability summary
///
/// A flag table maps the hashes of witnesses an event can reach to their
/// rounds, so "x sees witness w" is a lookup instead of a walk through the
/// DAG. Rounds never decrease along ancestry, so an event of round r is only
/// ever asked about witnesses of round r - 1 and later; older entries are
/// pruned once the event's round is known, which bounds a table by two
/// rounds of witnesses.

use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagTable(BTreeMap<Hash, u64>);

impl FlagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table naming a single event, used when a parent's table is unavailable
    pub fn single(hash: Hash, round: u64) -> Self {
        let mut table = Self::new();
        table.insert(hash, round);
        table
    }

    /// Record `hash`, keeping the larger round if already present
    pub fn insert(&mut self, hash: Hash, round: u64) {
        let entry = self.0.entry(hash).or_insert(round);
        if round > *entry {
            *entry = round;
        }
    }

    /// Entry-wise maximum with `other`
    pub fn merge(&mut self, other: &FlagTable) {
        for (hash, round) in &other.0 {
            self.insert(*hash, *round);
        }
    }

    /// Drop entries of rounds below `round`
    pub fn prune_below(&mut self, round: u64) {
        self.0.retain(|_, r| *r >= round);
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.0.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<u64> {
        self.0.get(hash).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &u64)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;
    use proptest::prelude::*;

    fn table_from(entries: &[(u8, u64)]) -> FlagTable {
        let mut table = FlagTable::new();
        for (seed, count) in entries {
            table.insert(hash_data(&[*seed]), *count);
        }
        table
    }

    #[test]
    fn test_merge_keeps_larger_round() {
        let mut a = table_from(&[(1, 1), (2, 3)]);
        let b = table_from(&[(2, 5), (3, 1)]);

        a.merge(&b);

        assert_eq!(a.len(), 3);
        assert_eq!(a.get(&hash_data(&[1])), Some(1));
        assert_eq!(a.get(&hash_data(&[2])), Some(5));
        assert_eq!(a.get(&hash_data(&[3])), Some(1));
    }

    #[test]
    fn test_merge_never_lowers_a_round() {
        let mut a = table_from(&[(7, 9)]);
        a.merge(&table_from(&[(7, 2)]));
        assert_eq!(a.get(&hash_data(&[7])), Some(9));
    }

    #[test]
    fn test_single() {
        let hash = hash_data(b"root");
        let table = FlagTable::single(hash, 3);
        assert!(table.contains(&hash));
        assert_eq!(table.get(&hash), Some(3));
        assert_eq!(table.len(), 1);
        assert!(FlagTable::new().is_empty());
    }

    #[test]
    fn test_prune_below_keeps_recent_rounds() {
        let mut table = table_from(&[(1, 2), (2, 3), (3, 4), (4, 4)]);
        table.prune_below(3);

        assert_eq!(table.len(), 3);
        assert!(!table.contains(&hash_data(&[1])));
        assert_eq!(table.get(&hash_data(&[2])), Some(3));

        table.prune_below(0);
        assert_eq!(table.len(), 3);
    }

    fn arb_table() -> impl Strategy<Value = FlagTable> {
        prop::collection::vec((any::<u8>(), 1u64..10), 0..20)
            .prop_map(|entries| table_from(&entries))
    }

    proptest! {
        #[test]
        fn prop_merge_is_commutative(a in arb_table(), b in arb_table()) {
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_merge_is_idempotent(a in arb_table(), b in arb_table()) {
            let mut once = a.clone();
            once.merge(&b);
            let mut twice = once.clone();
            twice.merge(&b);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_prune_commutes_with_merge(a in arb_table(), b in arb_table(), round in 0u64..10) {
            let mut merged_then_pruned = a.clone();
            merged_then_pruned.merge(&b);
            merged_then_pruned.prune_below(round);

            let mut left = a.clone();
            left.prune_below(round);
            let mut right = b.clone();
            right.prune_below(round);
            left.merge(&right);

            prop_assert_eq!(merged_then_pruned, left);
        }

        #[test]
        fn prop_merge_contains_both(a in arb_table(), b in arb_table()) {
            let mut merged = a.clone();
            merged.merge(&b);
            for (hash, _) in a.iter().chain(b.iter()) {
                prop_assert!(merged.contains(hash));
            }
        }
    }
}
