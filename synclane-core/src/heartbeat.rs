//! Source liveness
//!
//! The source endpoint beats a [`HeartbeatMonitor`] for every message it
//! receives. [`HeartbeatGuard`] runs a task on its own thread and polls the
//! monitor on a fixed interval; a stale monitor either fails the task or is
//! only counted, depending on a per-workspace feature flag.

use crate::config::FeatureFlags;
use crate::metrics::WorkerMetrics;
use crate::{Error, Result};
use crossbeam_channel::{bounded, select, tick};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Time source, injectable for tests
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Tracks the last time the source produced output
pub struct HeartbeatMonitor {
    freshness: Duration,
    clock: Clock,
    last_beat: Mutex<Option<Instant>>,
}

impl HeartbeatMonitor {
    pub fn new(freshness: Duration) -> Self {
        Self::with_clock(freshness, Arc::new(Instant::now))
    }

    pub fn with_clock(freshness: Duration, clock: Clock) -> Self {
        Self {
            freshness,
            clock,
            last_beat: Mutex::new(None),
        }
    }

    /// Record a beat at the current time
    pub fn beat(&self) {
        *self.last_beat.lock() = Some((self.clock)());
    }

    /// `None` until the first beat, then whether the last beat is within the freshness window
    pub fn is_beating(&self) -> Option<bool> {
        self.time_since_last_beat()
            .map(|elapsed| elapsed < self.freshness)
    }

    pub fn time_since_last_beat(&self) -> Option<Duration> {
        let last = (*self.last_beat.lock())?;
        Some((self.clock)().saturating_duration_since(last))
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("freshness", &self.freshness)
            .field("last_beat", &*self.last_beat.lock())
            .finish()
    }
}

/// Races a task against heartbeat staleness
pub struct HeartbeatGuard {
    monitor: Arc<HeartbeatMonitor>,
    check_interval: Duration,
    flags: Arc<dyn FeatureFlags>,
    workspace_id: Option<Uuid>,
    metrics: Arc<WorkerMetrics>,
}

impl HeartbeatGuard {
    pub fn new(
        monitor: Arc<HeartbeatMonitor>,
        check_interval: Duration,
        flags: Arc<dyn FeatureFlags>,
        workspace_id: Option<Uuid>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            monitor,
            check_interval,
            flags,
            workspace_id,
            metrics,
        }
    }

    /// Run `task`, polling the monitor every check interval
    ///
    /// If the monitor goes stale and the flag is on, `cancel` is invoked, the
    /// task is allowed to unwind, and a heartbeat-timeout error is returned.
    /// With the flag off the timeout is counted once and the task's own
    /// result is returned.
    pub fn run<T, F, C>(&self, task: F, cancel: C) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
        C: Fn(),
    {
        let fail_on_timeout = self.flags.fail_sync_on_heartbeat_timeout(self.workspace_id);
        let (done_tx, done_rx) = bounded::<()>(1);

        thread::scope(|scope| {
            let handle = scope.spawn(move || {
                let result = task();
                let _ = done_tx.send(());
                result
            });

            let ticker = tick(self.check_interval);
            let stale = loop {
                let finished = select! {
                    recv(done_rx) -> _ => true,
                    recv(ticker) -> _ => false,
                };
                if finished {
                    break None;
                }
                if self.monitor.is_beating() == Some(false) {
                    break self.monitor.time_since_last_beat();
                }
            };

            let mut timed_out = None;
            if let Some(elapsed) = stale {
                if fail_on_timeout {
                    error!(
                        elapsed_secs = elapsed.as_secs(),
                        "source heartbeat timed out, cancelling replication"
                    );
                    cancel();
                    timed_out = Some(elapsed);
                } else {
                    warn!(
                        elapsed_secs = elapsed.as_secs(),
                        "source heartbeat timed out, continuing because failing on timeout is disabled"
                    );
                    self.metrics.record_ignored_heartbeat_timeout();
                }
            }

            let result = handle
                .join()
                .map_err(|_| Error::worker("guarded task panicked"))?;
            match timed_out {
                Some(elapsed) => {
                    info!("guarded task stopped after heartbeat timeout");
                    Err(Error::HeartbeatTimeout(elapsed))
                }
                None => result,
            }
        })
    }
}
