//! Synclane Core - replication engine
//!
//! Runs one sync attempt between two connector processes:
//! - Process endpoints speaking the versioned protocol over stdio
//! - Heartbeat monitor and guard for hung sources
//! - Record/checkpoint accounting with a packed state delta ledger and checkpoint timing
//! - Connector-requested configuration updates
//! - Namespace mapping and record schema validation
//! - The two-pump [`ReplicationWorker`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             ReplicationWorker                │
//! │  (replication pump, destination-output pump) │
//! └───────┬───────────────────────────┬──────────┘
//!         │                           │
//! ┌───────┴────────┐         ┌────────┴─────────┐
//! │ ProcessSource  │         │ProcessDestination│
//! │ (+ heartbeat)  │         │                  │
//! └───────┬────────┘         └────────┬─────────┘
//!         │      versioned reader/writer
//! ┌───────┴───────────────────────────┴──────────┐
//! │        IntegrationLauncher / processes       │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod config_updater;
pub mod destination;
mod endpoint;
pub mod error;
pub mod heartbeat;
pub mod mapper;
pub mod metrics;
pub mod process;
pub mod record_validator;
pub mod source;
pub mod tracking;
pub mod worker;

pub use config::{FeatureFlags, StaticFeatureFlags, WorkerConfig};
pub use config_updater::{ConnectorConfigUpdater, LoggingConfigUpdater};
pub use destination::{Destination, ProcessDestination, WorkerDestinationConfig};
pub use error::{Error, Result};
pub use heartbeat::{HeartbeatGuard, HeartbeatMonitor};
pub use mapper::{NamespaceDefinition, NamespacingMapper};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use process::{CommandLauncher, ConnectorCommand, ConnectorProcess, IntegrationLauncher};
pub use source::{ProcessSource, Source, WorkerSourceConfig};
pub use tracking::{MessageTracker, State, StateAggregator, StateDeltaTracker, StateMetricsTracker};
pub use worker::{
    FailureOrigin, FailureReason, FailureType, ReplicationOutput, ReplicationStatus, ReplicationWorker,
    StandardSyncInput, SyncStats,
};
