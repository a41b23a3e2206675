//! Property tests for the packed state delta ledger

use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use synclane_core::StateDeltaTracker;

fn deltas() -> impl Strategy<Value = Vec<BTreeMap<u16, u64>>> {
    prop::collection::vec(prop::collection::btree_map(0u16..8, 0u64..10_000, 0..6), 0..40)
}

fn sum(deltas: &[BTreeMap<u16, u64>]) -> HashMap<u16, u64> {
    let mut totals = HashMap::new();
    for delta in deltas {
        for (&stream, &count) in delta {
            *totals.entry(stream).or_insert(0) += count;
        }
    }
    totals
}

proptest! {
    /// Committed totals are exactly the sum of the acknowledged deltas
    #[test]
    fn test_committed_prefix_totals(deltas in deltas(), acked in 0usize..40) {
        let acked = acked.min(deltas.len());
        let mut tracker = StateDeltaTracker::new(usize::MAX);
        for (i, delta) in deltas.iter().enumerate() {
            tracker.add_state(i as u32, delta).unwrap();
        }
        for i in 0..acked {
            tracker.commit_state_hash(i as u32).unwrap();
        }

        let committed = tracker.get_stream_index_to_total_record_count(true).unwrap();
        let all = tracker.get_stream_index_to_total_record_count(false).unwrap();
        prop_assert_eq!(committed, sum(&deltas[..acked]));
        prop_assert_eq!(all, sum(&deltas));
    }

    /// Memory accounting charges the hash, each entry and each commit
    #[test]
    fn test_memory_accounting(deltas in deltas()) {
        let mut tracker = StateDeltaTracker::new(usize::MAX);
        let mut expected = 0usize;
        for (i, delta) in deltas.iter().enumerate() {
            tracker.add_state(i as u32, delta).unwrap();
            tracker.commit_state_hash(i as u32).unwrap();
            expected += 4 + delta.len() * 10 + 4;
        }
        prop_assert_eq!(tracker.memory_used(), expected);
        prop_assert!(!tracker.is_capacity_exceeded());
    }

    /// Once over budget the ledger refuses everything
    #[test]
    fn test_over_budget_is_sticky(deltas in deltas(), limit in 4usize..200) {
        let mut tracker = StateDeltaTracker::new(limit);
        let mut failed = false;
        for (i, delta) in deltas.iter().enumerate() {
            let result = tracker.add_state(i as u32, delta);
            if failed {
                prop_assert!(result.is_err());
            }
            failed |= result.is_err();
        }
        prop_assert_eq!(failed, tracker.is_capacity_exceeded());
        prop_assert!(tracker.memory_used() <= limit);
        if failed {
            prop_assert!(tracker.get_stream_index_to_total_record_count(false).is_err());
            prop_assert!(tracker.commit_state_hash(u32::MAX).is_err());
        }
    }
}
