//! Source endpoint
//!
//! The replication pump reads a source through the [`Source`] trait.
//! [`ProcessSource`] runs the connector's `read` entrypoint, keeps RECORD,
//! STATE and TRACE messages, and beats the heartbeat monitor for every
//! message the connector emits.

use crate::config::WorkerConfig;
use crate::endpoint::{ConnectorHandle, EndpointState, OutputSpec};
use crate::heartbeat::HeartbeatMonitor;
use crate::process::{
    ConnectorCommand, INPUT_STATE_JSON, IntegrationLauncher, SOURCE_CATALOG_JSON, SOURCE_CONFIG_JSON,
};
use crate::{Error, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use synclane_protocol::models::{AirbyteMessage, AirbyteMessageType, ConfiguredAirbyteCatalog};
use synclane_protocol::{ProtocolRegistry, Version};
use tracing::{debug, info};

/// Inputs handed to a source at start
#[derive(Debug, Clone)]
pub struct WorkerSourceConfig {
    pub source_connection_configuration: Value,
    pub catalog: ConfiguredAirbyteCatalog,
    pub state: Option<Value>,
}

/// A message producer read by the replication pump
///
/// Reads happen on the pump thread; lifecycle calls come from the
/// orchestrator, so implementations synchronize internally.
pub trait Source: Send + Sync {
    fn start(&self, config: &WorkerSourceConfig, job_root: &Path) -> Result<()>;

    /// No more messages will ever be returned
    fn is_finished(&self) -> bool;

    fn exit_value(&self) -> Result<i32>;

    /// Next message, or `None` if nothing is ready yet
    fn attempt_read(&self) -> Result<Option<AirbyteMessage>>;

    /// Wait for exit, escalate to kill, and check the exit code. Idempotent.
    fn close(&self) -> Result<()>;

    /// Stop immediately. Idempotent; failures are logged, not returned.
    fn cancel(&self) -> Result<()>;
}

fn is_replicated(message: &AirbyteMessage) -> bool {
    matches!(
        message.message_type,
        AirbyteMessageType::Record
            | AirbyteMessageType::State
            | AirbyteMessageType::Trace
            | AirbyteMessageType::Control
    )
}

/// [`Source`] backed by a launched connector process
pub struct ProcessSource {
    launcher: Arc<dyn IntegrationLauncher>,
    registry: Arc<ProtocolRegistry>,
    protocol_version: Version,
    detect_version: bool,
    heartbeat: Arc<HeartbeatMonitor>,
    config: WorkerConfig,
    handle: ConnectorHandle,
}

impl ProcessSource {
    pub fn new(
        launcher: Arc<dyn IntegrationLauncher>,
        registry: Arc<ProtocolRegistry>,
        protocol_version: Version,
        heartbeat: Arc<HeartbeatMonitor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            launcher,
            registry,
            protocol_version,
            detect_version: false,
            heartbeat,
            config,
            handle: ConnectorHandle::new("source"),
        }
    }

    /// Detect the emitted version from a SPEC message before decoding
    pub fn with_version_detection(mut self, enabled: bool) -> Self {
        self.detect_version = enabled;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }
}

impl Source for ProcessSource {
    fn start(&self, config: &WorkerSourceConfig, job_root: &Path) -> Result<()> {
        self.handle.begin()?;

        let catalog = self
            .registry
            .catalog_for_version(&config.catalog, &self.protocol_version)?;
        let mut files = vec![
            (
                SOURCE_CONFIG_JSON.to_string(),
                serde_json::to_string(&config.source_connection_configuration)?,
            ),
            (SOURCE_CATALOG_JSON.to_string(), serde_json::to_string(&catalog)?),
        ];
        let state = match &config.state {
            Some(state) => {
                files.push((INPUT_STATE_JSON.to_string(), serde_json::to_string(state)?));
                Some(INPUT_STATE_JSON.to_string())
            }
            None => None,
        };
        let command = ConnectorCommand::Read {
            config: SOURCE_CONFIG_JSON.to_string(),
            catalog: SOURCE_CATALOG_JSON.to_string(),
            state,
        };

        let process = self.launcher.launch(job_root, &command, &files)?;
        info!(pid = ?process.pid(), version = %self.protocol_version, "source started");
        self.handle.attach(
            process,
            OutputSpec {
                registry: Arc::clone(&self.registry),
                version: self.protocol_version.clone(),
                catalog: Some(config.catalog.clone()),
                detect_version: self.detect_version,
                keep: is_replicated,
                heartbeat: Some(Arc::clone(&self.heartbeat)),
            },
        )?;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn exit_value(&self) -> Result<i32> {
        self.handle.exit_value()
    }

    fn attempt_read(&self) -> Result<Option<AirbyteMessage>> {
        self.handle.attempt_read()
    }

    fn close(&self) -> Result<()> {
        if self.handle.state() == EndpointState::NotStarted {
            debug!("source was never started, nothing to close");
            self.handle.finish();
            return Ok(());
        }
        if !self.handle.finish() {
            return Ok(());
        }

        let code = self
            .handle
            .shutdown(self.config.source_graceful_shutdown, self.config.forced_shutdown)?;
        match code {
            Some(code) if !self.config.is_clean_exit(code) => {
                Err(Error::ProcessExit { role: "source", code })
            }
            _ => Ok(()),
        }
    }

    fn cancel(&self) -> Result<()> {
        info!("cancelling source");
        self.handle.cancel();
        Ok(())
    }
}
