//! Worker counters
//!
//! Plain atomics plus one mutex-guarded map; a [`MetricsSnapshot`] is taken
//! at the end of a run and logged with the summary.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the worker, its pumps and the heartbeat guard
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    heartbeat_timeouts_ignored: AtomicU64,
    unreliable_committed_counts: AtomicU64,
    state_timing_errors: AtomicU64,
    schema_validation_failures: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of [`WorkerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub heartbeat_timeouts_ignored: u64,
    pub unreliable_committed_counts: u64,
    pub state_timing_errors: u64,
    pub schema_validation_failures: BTreeMap<String, u64>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stale heartbeat that did not fail the sync
    pub fn record_ignored_heartbeat_timeout(&self) {
        self.heartbeat_timeouts_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// A run that ended without trustworthy committed counts
    pub fn record_unreliable_committed_counts(&self) {
        self.unreliable_committed_counts.fetch_add(1, Ordering::Relaxed);
    }

    /// A run whose checkpoint commit timing had to be dropped
    pub fn record_state_timing_error(&self) {
        self.state_timing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schema_validation_failure(&self, stream: &str) {
        *self
            .schema_validation_failures
            .lock()
            .entry(stream.to_string())
            .or_default() += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            heartbeat_timeouts_ignored: self.heartbeat_timeouts_ignored.load(Ordering::Relaxed),
            unreliable_committed_counts: self.unreliable_committed_counts.load(Ordering::Relaxed),
            state_timing_errors: self.state_timing_errors.load(Ordering::Relaxed),
            schema_validation_failures: self.schema_validation_failures.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = WorkerMetrics::new();
        metrics.record_ignored_heartbeat_timeout();
        metrics.record_schema_validation_failure("users");
        metrics.record_schema_validation_failure("users");
        metrics.record_state_timing_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.heartbeat_timeouts_ignored, 1);
        assert_eq!(snapshot.unreliable_committed_counts, 0);
        assert_eq!(snapshot.state_timing_errors, 1);
        assert_eq!(snapshot.schema_validation_failures["users"], 2);
    }
}
