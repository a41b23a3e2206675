//! Timing of checkpoints
//!
//! Two latencies are tracked per attempt:
//!
//! - how long the source takes to emit a STATE message, measured from the
//!   previous one (or from the first record for the first checkpoint);
//! - how long a checkpoint waits between leaving the source and being
//!   acknowledged by the destination.
//!
//! Pending checkpoints are queued per stream as packed
//! `[state hash: u32][emitted at ms: u64]` entries. An acknowledgement drops
//! every entry up to and including the matching one and measures from the
//! oldest entry it drops. Timestamps are milliseconds on the caller's clock.

use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use synclane_protocol::models::StreamDescriptor;

const ENTRY_BYTES: usize = 4 + 8;

/// Pending checkpoints kept before timing is given up, about 10 MiB
pub const DEFAULT_MAX_PENDING_STATES: usize = 873_813;

/// Max and incremental mean over millisecond samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    max_ms: u64,
    mean_ms: f64,
    samples: u64,
}

impl RunningStat {
    pub fn add(&mut self, sample_ms: u64) {
        self.samples += 1;
        self.max_ms = self.max_ms.max(sample_ms);
        self.mean_ms += (sample_ms as f64 - self.mean_ms) / self.samples as f64;
    }

    pub fn max_seconds(&self) -> Option<u64> {
        (self.samples > 0).then_some(self.max_ms / 1000)
    }

    pub fn mean_seconds(&self) -> Option<u64> {
        (self.samples > 0).then_some((self.mean_ms / 1000.0) as u64)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Queue key: the stream for STREAM checkpoints, `None` for GLOBAL and LEGACY ones
pub type CheckpointKey = Option<StreamDescriptor>;

#[derive(Debug)]
pub struct StateMetricsTracker {
    max_pending: usize,
    pending_count: usize,
    pending: HashMap<CheckpointKey, BytesMut>,
    first_record_at: Option<u64>,
    last_state_at: Option<u64>,
    to_receive: RunningStat,
    to_commit: RunningStat,
}

impl StateMetricsTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            pending_count: 0,
            pending: HashMap::new(),
            first_record_at: None,
            last_state_at: None,
            to_receive: RunningStat::default(),
            to_commit: RunningStat::default(),
        }
    }

    pub fn record_received(&mut self, at_ms: u64) {
        if self.first_record_at.is_none() {
            self.first_record_at = Some(at_ms);
        }
    }

    /// Time since the previous checkpoint, or since the first record
    pub fn state_received(&mut self, at_ms: u64) {
        if let Some(since) = self.last_state_at.or(self.first_record_at) {
            self.to_receive.add(at_ms.saturating_sub(since));
        }
        self.last_state_at = Some(at_ms);
    }

    /// Queue a checkpoint until the destination acknowledges it
    pub fn add_state(&mut self, key: CheckpointKey, state_hash: u32, at_ms: u64) -> Result<()> {
        if self.pending_count >= self.max_pending {
            return Err(Error::state_tracker(format!(
                "more than {} checkpoints awaiting acknowledgement",
                self.max_pending
            )));
        }
        let queue = self.pending.entry(key).or_default();
        queue.put_u32(state_hash);
        queue.put_u64(at_ms);
        self.pending_count += 1;
        Ok(())
    }

    /// Close out a checkpoint acknowledged at `at_ms`
    pub fn commit_state(&mut self, key: &CheckpointKey, state_hash: u32, at_ms: u64) -> Result<()> {
        let queue = self
            .pending
            .get_mut(key)
            .ok_or_else(|| no_match(key, state_hash))?;

        let mut cursor = &queue[..];
        let mut position = None;
        let mut index = 0;
        while cursor.remaining() >= ENTRY_BYTES {
            let hash = cursor.get_u32();
            cursor.advance(8);
            if hash == state_hash {
                position = Some(index);
                break;
            }
            index += 1;
        }
        let index = position.ok_or_else(|| no_match(key, state_hash))?;

        let mut dropped = queue.split_to((index + 1) * ENTRY_BYTES);
        dropped.advance(4);
        let oldest = dropped.get_u64();
        self.pending_count -= index + 1;
        if queue.is_empty() {
            self.pending.remove(key);
        }
        self.to_commit.add(at_ms.saturating_sub(oldest));
        Ok(())
    }

    pub fn pending_states(&self) -> usize {
        self.pending_count
    }

    pub fn max_seconds_to_receive_source_state(&self) -> Option<u64> {
        self.to_receive.max_seconds()
    }

    pub fn mean_seconds_to_receive_source_state(&self) -> Option<u64> {
        self.to_receive.mean_seconds()
    }

    pub fn max_seconds_to_commit_state(&self) -> Option<u64> {
        self.to_commit.max_seconds()
    }

    pub fn mean_seconds_to_commit_state(&self) -> Option<u64> {
        self.to_commit.mean_seconds()
    }
}

fn no_match(key: &CheckpointKey, state_hash: u32) -> Error {
    let stream = key.as_ref().map(|d| d.name.as_str()).unwrap_or("<global>");
    Error::state_tracker(format!(
        "acknowledged state hash {state_hash} for stream {stream} was never emitted by the source"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str) -> CheckpointKey {
        Some(StreamDescriptor {
            name: name.into(),
            namespace: None,
        })
    }

    #[test]
    fn test_time_to_receive_state() {
        let mut tracker = StateMetricsTracker::new(16);
        // No record and no previous state: nothing to measure from
        tracker.state_received(1_000);
        assert_eq!(tracker.max_seconds_to_receive_source_state(), None);

        tracker.state_received(5_000);
        tracker.state_received(7_000);
        assert_eq!(tracker.max_seconds_to_receive_source_state(), Some(4));
        assert_eq!(tracker.mean_seconds_to_receive_source_state(), Some(3));
    }

    #[test]
    fn test_first_state_measured_from_first_record() {
        let mut tracker = StateMetricsTracker::new(16);
        tracker.record_received(2_000);
        tracker.record_received(3_000);
        tracker.state_received(12_000);
        assert_eq!(tracker.max_seconds_to_receive_source_state(), Some(10));
    }

    #[test]
    fn test_commit_measures_from_oldest_dropped_state() {
        let mut tracker = StateMetricsTracker::new(16);
        tracker.add_state(stream("users"), 1, 1_000).unwrap();
        tracker.add_state(stream("users"), 2, 2_000).unwrap();
        tracker.add_state(stream("orders"), 3, 2_500).unwrap();
        tracker.add_state(stream("users"), 4, 3_000).unwrap();

        // Acknowledging 2 also closes 1
        tracker.commit_state(&stream("users"), 2, 6_000).unwrap();
        assert_eq!(tracker.pending_states(), 2);
        assert_eq!(tracker.max_seconds_to_commit_state(), Some(5));

        tracker.commit_state(&stream("orders"), 3, 4_500).unwrap();
        assert_eq!(tracker.max_seconds_to_commit_state(), Some(5));
        assert_eq!(tracker.mean_seconds_to_commit_state(), Some(3));
        assert_eq!(tracker.pending_states(), 1);
    }

    #[test]
    fn test_unknown_ack_is_an_error() {
        let mut tracker = StateMetricsTracker::new(16);
        tracker.add_state(None, 7, 0).unwrap();
        assert!(tracker.commit_state(&None, 8, 10).is_err());
        assert!(tracker.commit_state(&stream("users"), 7, 10).is_err());
        // A failed lookup leaves the queue intact
        tracker.commit_state(&None, 7, 10).unwrap();
        assert_eq!(tracker.pending_states(), 0);
    }

    #[test]
    fn test_pending_limit() {
        let mut tracker = StateMetricsTracker::new(2);
        tracker.add_state(None, 1, 0).unwrap();
        tracker.add_state(None, 2, 0).unwrap();
        assert!(tracker.add_state(None, 3, 0).is_err());
    }
}
