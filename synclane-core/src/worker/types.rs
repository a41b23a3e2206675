//! Inputs and outputs of a replication attempt

use crate::Error;
use crate::mapper::NamespaceDefinition;
use crate::tracking::State;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use synclane_protocol::models::{AirbyteTraceMessage, ConfiguredAirbyteCatalog, TraceFailureType};
use uuid::Uuid;

/// Everything one sync attempt needs besides the connectors themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardSyncInput {
    pub source_configuration: Value,
    pub destination_configuration: Value,
    pub catalog: ConfiguredAirbyteCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<Uuid>,
    #[serde(default)]
    pub namespace_definition: NamespaceDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl StandardSyncInput {
    pub fn new(source_configuration: Value, destination_configuration: Value, catalog: ConfiguredAirbyteCatalog) -> Self {
        Self {
            source_configuration,
            destination_configuration,
            catalog,
            state: None,
            workspace_id: None,
            connection_id: None,
            source_id: None,
            destination_id: None,
            namespace_definition: NamespaceDefinition::Source,
            namespace_format: None,
            prefix: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Completed,
    Failed,
    Cancelled,
}

impl ReplicationStatus {
    /// Cancelled beats failed beats completed
    pub fn resolve(cancelled: bool, failed: bool) -> Self {
        if cancelled {
            Self::Cancelled
        } else if failed {
            Self::Failed
        } else {
            Self::Completed
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub records_emitted: u64,
    pub bytes_emitted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_records: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<i64>,
    pub source_state_messages_emitted: u64,
    pub destination_state_messages_emitted: u64,
    /// Absent when the committed view could not be trusted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_committed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_seconds_before_source_state_message_emitted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_seconds_before_source_state_message_emitted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_seconds_between_state_message_emitted_and_committed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_seconds_between_state_message_emitted_and_committed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSyncStats {
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_namespace: Option<String>,
    pub stats: SyncStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationAttemptSummary {
    pub status: ReplicationStatus,
    pub records_synced: u64,
    pub bytes_synced: u64,
    /// Milliseconds since epoch
    pub start_time: i64,
    pub end_time: i64,
    pub total_stats: SyncStats,
    pub stream_stats: Vec<StreamSyncStats>,
    /// Checkpoint commit timing was dropped part way through the attempt
    #[serde(default)]
    pub unreliable_state_timing_metrics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOutput {
    pub replication_attempt_summary: ReplicationAttemptSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    pub output_catalog: ConfiguredAirbyteCatalog,
    #[serde(default)]
    pub failures: Vec<FailureReason>,
}

impl ReplicationOutput {
    pub fn status(&self) -> ReplicationStatus {
        self.replication_attempt_summary.status
    }

    /// Mark an already collected output as failed by `reason`
    pub fn fail_with(mut self, reason: FailureReason) -> Self {
        self.replication_attempt_summary.status = ReplicationStatus::Failed;
        self.failures.insert(0, reason);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    Source,
    Destination,
    Replication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    ConfigError,
    SystemError,
    HeartbeatTimeout,
}

/// Attributed cause of a failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub failure_origin: FailureOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
    /// Milliseconds since epoch
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl FailureReason {
    /// Failure reported by a connector through an error trace
    pub fn from_trace(trace: &AirbyteTraceMessage, origin: FailureOrigin, job_id: &str, attempt: u32) -> Self {
        let error = trace.error.as_ref();
        let mut metadata = job_metadata(job_id, attempt);
        metadata.insert("from_trace_message".into(), json!(true));
        Self {
            failure_origin: origin,
            failure_type: error.and_then(|e| e.failure_type).map(|t| match t {
                TraceFailureType::ConfigError => FailureType::ConfigError,
                TraceFailureType::SystemError => FailureType::SystemError,
            }),
            external_message: error.map(|e| e.message.clone()),
            internal_message: error.and_then(|e| e.internal_message.clone()),
            stacktrace: error.and_then(|e| e.stack_trace.clone()),
            timestamp: trace.emitted_at as i64,
            metadata,
        }
    }

    /// Failure raised by a pump, attributed by its origin tag
    pub fn from_error(error: &Error, job_id: &str, attempt: u32) -> Self {
        let (origin, external) = match error {
            Error::Source { .. } => (FailureOrigin::Source, "Something went wrong within the source connector"),
            Error::Destination { .. } => (
                FailureOrigin::Destination,
                "Something went wrong within the destination connector",
            ),
            Error::HeartbeatTimeout(_) => (FailureOrigin::Source, "The source stopped sending data"),
            _ => (FailureOrigin::Replication, "Something went wrong during replication"),
        };
        let failure_type = match error.root_cause() {
            Error::HeartbeatTimeout(_) => FailureType::HeartbeatTimeout,
            Error::Config(_) => FailureType::ConfigError,
            _ => FailureType::SystemError,
        };
        Self {
            failure_origin: origin,
            failure_type: Some(failure_type),
            external_message: Some(external.to_string()),
            internal_message: Some(error.root_cause().to_string()),
            stacktrace: Some(error_chain(error)),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: job_metadata(job_id, attempt),
        }
    }
}

fn job_metadata(job_id: &str, attempt: u32) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("job_id".into(), json!(job_id));
    metadata.insert("attempt_number".into(), json!(attempt));
    metadata
}

fn error_chain(error: &Error) -> String {
    let mut lines = vec![error.to_string()];
    let mut current: Option<&dyn std::error::Error> = std::error::Error::source(error);
    while let Some(cause) = current {
        lines.push(format!("caused by: {cause}"));
        current = cause.source();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use synclane_protocol::models::AirbyteMessage;

    #[test]
    fn test_status_precedence() {
        assert_eq!(ReplicationStatus::resolve(true, true), ReplicationStatus::Cancelled);
        assert_eq!(ReplicationStatus::resolve(false, true), ReplicationStatus::Failed);
        assert_eq!(ReplicationStatus::resolve(false, false), ReplicationStatus::Completed);
    }

    #[test]
    fn test_failure_from_tagged_error() {
        let error = Error::destination_failure(
            "closing destination",
            Error::ProcessExit {
                role: "destination",
                code: 1,
            },
        );
        let failure = FailureReason::from_error(&error, "42", 1);
        assert_eq!(failure.failure_origin, FailureOrigin::Destination);
        assert_eq!(failure.failure_type, Some(FailureType::SystemError));
        assert_eq!(
            failure.internal_message.as_deref(),
            Some("destination process exited with non-zero exit code 1")
        );
        assert!(failure.stacktrace.unwrap().contains("caused by"));
        assert_eq!(failure.metadata["attempt_number"], json!(1));
    }

    #[test]
    fn test_failure_from_trace() {
        let mut message = AirbyteMessage::error_trace("bad credentials", 1234.0);
        let trace = message.trace.as_mut().unwrap();
        trace.error.as_mut().unwrap().failure_type = Some(TraceFailureType::ConfigError);

        let failure = FailureReason::from_trace(trace, FailureOrigin::Source, "42", 0);
        assert_eq!(failure.failure_type, Some(FailureType::ConfigError));
        assert_eq!(failure.external_message.as_deref(), Some("bad credentials"));
        assert_eq!(failure.timestamp, 1234);
        assert_eq!(failure.metadata["from_trace_message"], json!(true));
    }

    #[test]
    fn test_fail_with_puts_reason_first() {
        let summary = ReplicationAttemptSummary {
            status: ReplicationStatus::Cancelled,
            records_synced: 3,
            bytes_synced: 30,
            start_time: 0,
            end_time: 1,
            total_stats: SyncStats::default(),
            stream_stats: Vec::new(),
            unreliable_state_timing_metrics: false,
        };
        let trace = FailureReason::from_trace(
            AirbyteMessage::error_trace("late", 5.0).trace.as_ref().unwrap(),
            FailureOrigin::Destination,
            "42",
            0,
        );
        let output = ReplicationOutput {
            replication_attempt_summary: summary,
            state: None,
            output_catalog: ConfiguredAirbyteCatalog { streams: Vec::new() },
            failures: vec![trace],
        };

        let timeout = FailureReason::from_error(&Error::HeartbeatTimeout(Duration::from_secs(90)), "42", 0);
        let output = output.fail_with(timeout);
        assert_eq!(output.status(), ReplicationStatus::Failed);
        assert_eq!(output.failures.len(), 2);
        assert_eq!(output.failures[0].failure_type, Some(FailureType::HeartbeatTimeout));
        assert_eq!(output.replication_attempt_summary.records_synced, 3);
    }

    #[test]
    fn test_stats_omit_missing_timings() {
        let encoded = serde_json::to_value(SyncStats::default()).unwrap();
        assert!(encoded.get("max_seconds_before_source_state_message_emitted").is_none());
        let stats: SyncStats = serde_json::from_value(json!({
            "records_emitted": 1,
            "bytes_emitted": 2,
            "source_state_messages_emitted": 0,
            "destination_state_messages_emitted": 0,
            "mean_seconds_between_state_message_emitted_and_committed": 7
        }))
        .unwrap();
        assert_eq!(stats.mean_seconds_between_state_message_emitted_and_committed, Some(7));
    }

    #[test]
    fn test_sync_input_defaults() {
        let input: StandardSyncInput = serde_json::from_value(json!({
            "source_configuration": {},
            "destination_configuration": {},
            "catalog": {"streams": []}
        }))
        .unwrap();
        assert_eq!(input.namespace_definition, NamespaceDefinition::Source);
        assert!(input.state.is_none());
    }
}
