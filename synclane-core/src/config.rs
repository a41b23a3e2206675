//! Worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Replication worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How long the source may take to exit on its own once its output is drained
    #[serde(with = "serde_millis")]
    pub source_graceful_shutdown: Duration,

    /// How long the destination may take to exit after end-of-input
    #[serde(with = "serde_millis")]
    pub destination_graceful_shutdown: Duration,

    /// Wait after a forced kill before giving up on the exit code
    #[serde(with = "serde_millis")]
    pub forced_shutdown: Duration,

    /// Non-zero exit codes treated as success (143 = terminated by SIGTERM)
    pub ignored_exit_codes: Vec<i32>,

    /// Source liveness window
    #[serde(with = "serde_millis")]
    pub heartbeat_freshness: Duration,

    /// How often the heartbeat guard polls the monitor
    #[serde(with = "serde_millis")]
    pub heartbeat_check_interval: Duration,

    /// Fail the sync when the source heartbeat goes stale
    pub fail_sync_on_heartbeat_timeout: bool,

    /// Byte budget of the state delta ledger
    pub state_tracker_memory_limit: usize,

    /// How long `cancel()` waits for the pumps to stop before killing connectors
    #[serde(with = "serde_millis")]
    pub cancel_quiesce_timeout: Duration,

    /// Log every message accepted by the tracker as JSON
    pub log_connector_messages: bool,

    /// Trim record data to the properties declared in the catalog
    pub field_selection_enabled: bool,

    /// Distinct validation error kinds per stream before validation stops for it
    pub max_schema_validation_errors: usize,

    /// Records between progress log lines
    pub progress_log_interval: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            source_graceful_shutdown: Duration::from_secs(60),
            destination_graceful_shutdown: Duration::from_secs(60 * 60),
            forced_shutdown: Duration::from_secs(60),
            ignored_exit_codes: vec![143],
            heartbeat_freshness: Duration::from_secs(3 * 60 * 60),
            heartbeat_check_interval: Duration::from_secs(60),
            fail_sync_on_heartbeat_timeout: false,
            state_tracker_memory_limit: 10 * 1024 * 1024,
            cancel_quiesce_timeout: Duration::from_secs(10),
            log_connector_messages: false,
            field_selection_enabled: false,
            max_schema_validation_errors: 10,
            progress_log_interval: 1000,
        }
    }
}

impl WorkerConfig {
    /// Set the heartbeat freshness window
    pub fn with_heartbeat_freshness(mut self, freshness: Duration) -> Self {
        self.heartbeat_freshness = freshness;
        self
    }

    /// Set the heartbeat poll interval
    pub fn with_heartbeat_check_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_check_interval = interval;
        self
    }

    /// Enable/disable failing the sync on heartbeat timeout
    pub fn with_fail_on_heartbeat_timeout(mut self, enabled: bool) -> Self {
        self.fail_sync_on_heartbeat_timeout = enabled;
        self
    }

    /// Set the graceful and forced shutdown windows
    pub fn with_shutdown_windows(mut self, source: Duration, destination: Duration, forced: Duration) -> Self {
        self.source_graceful_shutdown = source;
        self.destination_graceful_shutdown = destination;
        self.forced_shutdown = forced;
        self
    }

    /// Set the state delta ledger budget
    pub fn with_state_tracker_memory_limit(mut self, bytes: usize) -> Self {
        self.state_tracker_memory_limit = bytes;
        self
    }

    /// Enable/disable field selection
    pub fn with_field_selection(mut self, enabled: bool) -> Self {
        self.field_selection_enabled = enabled;
        self
    }

    /// Whether `code` counts as a clean exit
    pub fn is_clean_exit(&self, code: i32) -> bool {
        code == 0 || self.ignored_exit_codes.contains(&code)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_freshness.is_zero() {
            return Err("heartbeat_freshness must be greater than zero".into());
        }
        if self.heartbeat_check_interval.is_zero() {
            return Err("heartbeat_check_interval must be greater than zero".into());
        }
        if self.heartbeat_check_interval > self.heartbeat_freshness {
            return Err("heartbeat_check_interval must not exceed heartbeat_freshness".into());
        }
        if self.state_tracker_memory_limit < 4 {
            return Err("state_tracker_memory_limit must hold at least one delta header".into());
        }
        if self.progress_log_interval == 0 {
            return Err("progress_log_interval must be at least 1".into());
        }
        Ok(())
    }
}

/// Per-workspace feature flags, read once per guarded run
pub trait FeatureFlags: Send + Sync {
    /// Whether a stale source heartbeat should fail the sync for `workspace_id`
    fn fail_sync_on_heartbeat_timeout(&self, workspace_id: Option<Uuid>) -> bool;
}

/// Feature flags with one value for every workspace
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFeatureFlags {
    /// Value returned for every workspace
    pub fail_sync_on_heartbeat_timeout: bool,
}

impl StaticFeatureFlags {
    /// Flags taken from a worker configuration
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            fail_sync_on_heartbeat_timeout: config.fail_sync_on_heartbeat_timeout,
        }
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn fail_sync_on_heartbeat_timeout(&self, _workspace_id: Option<Uuid>) -> bool {
        self.fail_sync_on_heartbeat_timeout
    }
}
