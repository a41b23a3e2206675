//! Replication worker and its inputs/outputs

mod replication;
mod types;

pub use replication::{ReplicationWorker, format_bytes};
pub use types::{
    FailureOrigin, FailureReason, FailureType, ReplicationAttemptSummary, ReplicationOutput,
    ReplicationStatus, StandardSyncInput, StreamSyncStats, SyncStats,
};
