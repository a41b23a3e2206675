//! Packed ledger of per-checkpoint record counts
//!
//! Every source STATE message closes a delta: the records seen per stream
//! since the previous checkpoint. Deltas are packed as
//!
//! ```text
//! [state hash: u32][stream index: u16][count: u64] ... (big endian)
//! ```
//!
//! so a sync with thousands of checkpoints stays within a few hundred KB.
//! Once the byte budget is exhausted every call fails, and the caller stops
//! trusting committed counts for the rest of the run.

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, HashSet};

const HASH_BYTES: usize = 4;
const ENTRY_BYTES: usize = 2 + 8;

/// Byte-bounded ledger of state deltas and their commit status
#[derive(Debug)]
pub struct StateDeltaTracker {
    memory_limit: usize,
    used: usize,
    deltas: Vec<Bytes>,
    committed: HashSet<u32>,
    capacity_exceeded: bool,
}

impl StateDeltaTracker {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            used: 0,
            deltas: Vec::new(),
            committed: HashSet::new(),
            capacity_exceeded: false,
        }
    }

    /// Append the delta closed by the state with `state_hash`
    pub fn add_state(&mut self, state_hash: u32, stream_counts: &BTreeMap<u16, u64>) -> Result<()> {
        self.ensure_capacity()?;
        let size = HASH_BYTES + stream_counts.len() * ENTRY_BYTES;
        self.reserve(size)?;

        let mut delta = BytesMut::with_capacity(size);
        delta.put_u32(state_hash);
        for (&stream_index, &count) in stream_counts {
            delta.put_u16(stream_index);
            delta.put_u64(count);
        }
        self.deltas.push(delta.freeze());
        Ok(())
    }

    /// Mark `state_hash` as acknowledged by the destination
    pub fn commit_state_hash(&mut self, state_hash: u32) -> Result<()> {
        self.ensure_capacity()?;
        if self.committed.contains(&state_hash) {
            return Err(Error::state_tracker(format!(
                "state hash {state_hash} was already committed, likely a hash collision"
            )));
        }
        self.reserve(HASH_BYTES)?;
        self.committed.insert(state_hash);
        Ok(())
    }

    /// Sum per-stream counts over all deltas, or only committed ones
    pub fn get_stream_index_to_total_record_count(
        &self,
        committed_only: bool,
    ) -> Result<HashMap<u16, u64>> {
        self.ensure_capacity()?;
        let mut totals = HashMap::new();
        for delta in &self.deltas {
            let mut cursor = delta.clone();
            let hash = cursor.get_u32();
            if committed_only && !self.committed.contains(&hash) {
                continue;
            }
            while cursor.remaining() >= ENTRY_BYTES {
                let stream_index = cursor.get_u16();
                let count = cursor.get_u64();
                *totals.entry(stream_index).or_insert(0) += count;
            }
        }
        Ok(totals)
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        self.capacity_exceeded
    }

    pub fn memory_used(&self) -> usize {
        self.used
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.capacity_exceeded {
            return Err(Error::state_tracker("state delta tracker memory limit already exceeded"));
        }
        Ok(())
    }

    fn reserve(&mut self, size: usize) -> Result<()> {
        if self.used + size > self.memory_limit {
            self.capacity_exceeded = true;
            return Err(Error::state_tracker(format!(
                "state delta tracker memory limit of {} bytes exceeded",
                self.memory_limit
            )));
        }
        self.used += size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(u16, u64)]) -> BTreeMap<u16, u64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_committed_and_total_counts() {
        let mut tracker = StateDeltaTracker::new(1024);
        tracker.add_state(1, &counts(&[(0, 10), (1, 5)])).unwrap();
        tracker.add_state(2, &counts(&[(0, 3)])).unwrap();
        tracker.add_state(3, &counts(&[(1, 7), (2, 1)])).unwrap();

        tracker.commit_state_hash(1).unwrap();
        tracker.commit_state_hash(3).unwrap();

        let committed = tracker.get_stream_index_to_total_record_count(true).unwrap();
        assert_eq!(committed.get(&0), Some(&10));
        assert_eq!(committed.get(&1), Some(&12));
        assert_eq!(committed.get(&2), Some(&1));

        let total = tracker.get_stream_index_to_total_record_count(false).unwrap();
        assert_eq!(total.get(&0), Some(&13));
        assert_eq!(total.get(&1), Some(&12));
    }

    #[test]
    fn test_duplicate_commit_fails() {
        let mut tracker = StateDeltaTracker::new(1024);
        tracker.add_state(7, &counts(&[(0, 1)])).unwrap();
        tracker.commit_state_hash(7).unwrap();
        assert!(matches!(
            tracker.commit_state_hash(7),
            Err(Error::StateTracker(_))
        ));
    }

    #[test]
    fn test_memory_limit() {
        // One header plus one entry fits, a second delta does not
        let mut tracker = StateDeltaTracker::new(HASH_BYTES + ENTRY_BYTES);
        tracker.add_state(1, &counts(&[(0, 1)])).unwrap();
        assert_eq!(tracker.memory_used(), 14);

        assert!(tracker.add_state(2, &counts(&[(0, 1)])).is_err());
        assert!(tracker.is_capacity_exceeded());

        // Everything fails from here on
        assert!(tracker.commit_state_hash(1).is_err());
        assert!(tracker.get_stream_index_to_total_record_count(false).is_err());
    }

    #[test]
    fn test_empty_delta() {
        let mut tracker = StateDeltaTracker::new(64);
        tracker.add_state(9, &BTreeMap::new()).unwrap();
        tracker.commit_state_hash(9).unwrap();
        assert!(tracker.get_stream_index_to_total_record_count(true).unwrap().is_empty());
    }
}
