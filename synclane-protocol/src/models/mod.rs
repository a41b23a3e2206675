//! Connector protocol models for the current major version
//!
//! Messages travel as one JSON object per line. Every payload struct keeps
//! unknown keys in a flattened map so migrations and pass-through never drop
//! fields they do not understand.

pub mod v0;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AirbyteMessageType {
    /// A data record
    Record,
    /// A checkpoint
    State,
    /// Operational log line
    Log,
    /// Handshake / connector specification
    Spec,
    /// Result of a connection check
    ConnectionStatus,
    /// Discovered catalog
    Catalog,
    /// Error or estimate trace
    Trace,
    /// Orchestrator control message
    Control,
}

impl AirbyteMessageType {
    /// Wire name of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "RECORD",
            Self::State => "STATE",
            Self::Log => "LOG",
            Self::Spec => "SPEC",
            Self::ConnectionStatus => "CONNECTION_STATUS",
            Self::Catalog => "CATALOG",
            Self::Trace => "TRACE",
            Self::Control => "CONTROL",
        }
    }
}

/// Envelope for every protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteMessage {
    #[serde(rename = "type")]
    pub message_type: AirbyteMessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<AirbyteLogMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ConnectorSpecification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<AirbyteConnectionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<AirbyteCatalog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<AirbyteRecordMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AirbyteStateMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<AirbyteTraceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<AirbyteControlMessage>,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

impl AirbyteMessage {
    fn empty(message_type: AirbyteMessageType) -> Self {
        Self {
            message_type,
            log: None,
            spec: None,
            connection_status: None,
            catalog: None,
            record: None,
            state: None,
            trace: None,
            control: None,
            additional_properties: Map::new(),
        }
    }

    /// RECORD message for `stream`
    pub fn record(stream: impl Into<String>, namespace: Option<String>, data: Value) -> Self {
        Self {
            record: Some(AirbyteRecordMessage {
                stream: stream.into(),
                namespace,
                data,
                emitted_at: 0,
                additional_properties: Map::new(),
            }),
            ..Self::empty(AirbyteMessageType::Record)
        }
    }

    /// STATE message wrapping an arbitrary state payload
    pub fn state(state: AirbyteStateMessage) -> Self {
        Self {
            state: Some(state),
            ..Self::empty(AirbyteMessageType::State)
        }
    }

    /// Legacy STATE message carrying an opaque blob
    pub fn legacy_state(data: Value) -> Self {
        Self::state(AirbyteStateMessage::legacy(data))
    }

    /// LOG message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            log: Some(AirbyteLogMessage {
                level,
                message: message.into(),
                stack_trace: None,
            }),
            ..Self::empty(AirbyteMessageType::Log)
        }
    }

    /// SPEC handshake message, optionally declaring the emitter's protocol version
    pub fn spec(protocol_version: Option<String>) -> Self {
        Self {
            spec: Some(ConnectorSpecification {
                protocol_version,
                documentation_url: None,
                connection_specification: Value::Object(Map::new()),
                additional_properties: Map::new(),
            }),
            ..Self::empty(AirbyteMessageType::Spec)
        }
    }

    /// CATALOG message
    pub fn catalog(catalog: AirbyteCatalog) -> Self {
        Self {
            catalog: Some(catalog),
            ..Self::empty(AirbyteMessageType::Catalog)
        }
    }

    /// ERROR trace message
    pub fn error_trace(message: impl Into<String>, emitted_at: f64) -> Self {
        Self {
            trace: Some(AirbyteTraceMessage {
                trace_type: TraceType::Error,
                emitted_at,
                error: Some(AirbyteErrorTraceMessage {
                    message: message.into(),
                    internal_message: None,
                    stack_trace: None,
                    failure_type: Some(TraceFailureType::SystemError),
                }),
                estimate: None,
            }),
            ..Self::empty(AirbyteMessageType::Trace)
        }
    }

    /// ESTIMATE trace message
    pub fn estimate_trace(estimate: AirbyteEstimateTraceMessage, emitted_at: f64) -> Self {
        Self {
            trace: Some(AirbyteTraceMessage {
                trace_type: TraceType::Estimate,
                emitted_at,
                error: None,
                estimate: Some(estimate),
            }),
            ..Self::empty(AirbyteMessageType::Trace)
        }
    }

    /// CONTROL message carrying an updated connector configuration
    pub fn connector_config(config: Value, emitted_at: f64) -> Self {
        Self {
            control: Some(AirbyteControlMessage {
                control_type: ControlType::ConnectorConfig,
                emitted_at,
                connector_config: Some(AirbyteControlConnectorConfigMessage { config }),
            }),
            ..Self::empty(AirbyteMessageType::Control)
        }
    }

    /// CONNECTION_STATUS message
    pub fn connection_status(status: ConnectionStatus, message: Option<String>) -> Self {
        Self {
            connection_status: Some(AirbyteConnectionStatus { status, message }),
            ..Self::empty(AirbyteMessageType::ConnectionStatus)
        }
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteLogMessage {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Connector handshake payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpecification {
    /// Protocol version the connector speaks, if it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(
        default,
        rename = "documentationUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub documentation_url: Option<String>,
    #[serde(default, rename = "connectionSpecification")]
    pub connection_specification: Value,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteConnectionStatus {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Data record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteRecordMessage {
    #[serde(default)]
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub emitted_at: i64,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

/// Checkpoint shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AirbyteStateType {
    Legacy,
    Stream,
    Global,
}

/// Stream name plus optional namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteStreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteGlobalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<Value>,
    #[serde(default)]
    pub stream_states: Vec<AirbyteStreamState>,
}

/// Checkpoint message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteStateMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub state_type: Option<AirbyteStateType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<AirbyteStreamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<AirbyteGlobalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AirbyteStateMessage {
    /// Legacy (untyped) checkpoint
    pub fn legacy(data: Value) -> Self {
        Self {
            state_type: Some(AirbyteStateType::Legacy),
            stream: None,
            global: None,
            data: Some(data),
        }
    }

    /// Per-stream checkpoint
    pub fn stream(descriptor: StreamDescriptor, stream_state: Value) -> Self {
        Self {
            state_type: Some(AirbyteStateType::Stream),
            stream: Some(AirbyteStreamState {
                stream_descriptor: descriptor,
                stream_state: Some(stream_state),
            }),
            global: None,
            data: None,
        }
    }

    /// Global checkpoint
    pub fn global(global: AirbyteGlobalState) -> Self {
        Self {
            state_type: Some(AirbyteStateType::Global),
            stream: None,
            global: Some(global),
            data: None,
        }
    }

    /// Declared type, defaulting to LEGACY for connectors that omit it
    pub fn effective_type(&self) -> AirbyteStateType {
        self.state_type.unwrap_or(AirbyteStateType::Legacy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraceType {
    Error,
    Estimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceFailureType {
    SystemError,
    ConfigError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteErrorTraceMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<TraceFailureType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EstimateType {
    Stream,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteEstimateTraceMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "type")]
    pub estimate_type: EstimateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_estimate: Option<i64>,
}

/// Trace message (errors and estimates)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteTraceMessage {
    #[serde(rename = "type")]
    pub trace_type: TraceType,
    /// Milliseconds since epoch
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AirbyteErrorTraceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<AirbyteEstimateTraceMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    ConnectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteControlMessage {
    #[serde(rename = "type")]
    pub control_type: ControlType,
    pub emitted_at: f64,
    #[serde(
        rename = "connectorConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connector_config: Option<AirbyteControlConnectorConfigMessage>,
}

/// Replacement configuration a connector asks the platform to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteControlConnectorConfigMessage {
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
}

/// Stream as discovered by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteStream {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub json_schema: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_defined_cursor: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_cursor_field: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_defined_primary_key: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl AirbyteStream {
    /// Stream with a name and schema, everything else defaulted
    pub fn new(name: impl Into<String>, json_schema: Value) -> Self {
        Self {
            name: name.into(),
            json_schema,
            supported_sync_modes: Vec::new(),
            source_defined_cursor: None,
            default_cursor_field: Vec::new(),
            source_defined_primary_key: Vec::new(),
            namespace: None,
        }
    }
}

/// Discovered catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirbyteCatalog {
    #[serde(default)]
    pub streams: Vec<AirbyteStream>,
}

/// Stream as configured for a sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredAirbyteStream {
    pub stream: AirbyteStream,
    pub sync_mode: SyncMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_field: Vec<String>,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<Vec<String>>,
}

impl ConfiguredAirbyteStream {
    /// Full-refresh/append configuration of `stream`
    pub fn full_refresh(stream: AirbyteStream) -> Self {
        Self {
            stream,
            sync_mode: SyncMode::FullRefresh,
            cursor_field: Vec::new(),
            destination_sync_mode: DestinationSyncMode::Append,
            primary_key: Vec::new(),
        }
    }
}

/// Catalog as configured for a sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredAirbyteCatalog {
    #[serde(default)]
    pub streams: Vec<ConfiguredAirbyteStream>,
}

impl ConfiguredAirbyteCatalog {
    /// Find a configured stream by name and namespace
    pub fn find_stream(&self, name: &str, namespace: Option<&str>) -> Option<&ConfiguredAirbyteStream> {
        self.streams
            .iter()
            .find(|s| s.stream.name == name && s.stream.namespace.as_deref() == namespace)
    }
}

/// Identity of a stream in stats and lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AirbyteStreamNameNamespacePair {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl AirbyteStreamNameNamespacePair {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
        }
    }

    pub fn from_record(record: &AirbyteRecordMessage) -> Self {
        Self::new(record.stream.clone(), record.namespace.clone())
    }

    pub fn from_configured_stream(stream: &ConfiguredAirbyteStream) -> Self {
        Self::new(stream.stream.name.clone(), stream.stream.namespace.clone())
    }

    pub fn from_descriptor(descriptor: &StreamDescriptor) -> Self {
        Self::new(descriptor.name.clone(), descriptor.namespace.clone())
    }
}

impl fmt::Display for AirbyteStreamNameNamespacePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}
