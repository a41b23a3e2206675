//! Destination endpoint
//!
//! [`ProcessDestination`] runs the connector's `write` entrypoint, writes
//! messages to its stdin at the connector's protocol version, and reads
//! STATE, TRACE and CONTROL messages back from its stdout.

use crate::config::WorkerConfig;
use crate::endpoint::{ConnectorHandle, EndpointState, OutputSpec};
use crate::process::{
    ConnectorCommand, DESTINATION_CATALOG_JSON, DESTINATION_CONFIG_JSON, IntegrationLauncher,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use synclane_protocol::models::{AirbyteMessage, AirbyteMessageType, ConfiguredAirbyteCatalog};
use synclane_protocol::{ProtocolRegistry, Version, VersionedMessageWriter};
use tracing::{debug, info, warn};

/// Inputs handed to a destination at start
#[derive(Debug, Clone)]
pub struct WorkerDestinationConfig {
    pub destination_connection_configuration: Value,
    pub catalog: ConfiguredAirbyteCatalog,
    pub state: Option<Value>,
}

/// A message consumer fed by the replication pump and read by the destination-output pump
pub trait Destination: Send + Sync {
    fn start(&self, config: &WorkerDestinationConfig, job_root: &Path) -> Result<()>;

    fn accept(&self, message: AirbyteMessage) -> Result<()>;

    /// Flush and close the write side. Later calls are no-ops.
    fn notify_end_of_input(&self) -> Result<()>;

    fn is_finished(&self) -> bool;

    fn exit_value(&self) -> Result<i32>;

    fn attempt_read(&self) -> Result<Option<AirbyteMessage>>;

    /// Signal end-of-input if needed, wait, escalate, check the exit code. Idempotent.
    fn close(&self) -> Result<()>;

    fn cancel(&self) -> Result<()>;
}

fn is_destination_output(message: &AirbyteMessage) -> bool {
    matches!(
        message.message_type,
        AirbyteMessageType::State | AirbyteMessageType::Trace | AirbyteMessageType::Control
    )
}

type StdinWriter = VersionedMessageWriter<BufWriter<Box<dyn Write + Send>>>;

/// [`Destination`] backed by a launched connector process
pub struct ProcessDestination {
    launcher: Arc<dyn IntegrationLauncher>,
    registry: Arc<ProtocolRegistry>,
    protocol_version: Version,
    config: WorkerConfig,
    handle: ConnectorHandle,
    writer: Mutex<Option<StdinWriter>>,
}

impl ProcessDestination {
    pub fn new(
        launcher: Arc<dyn IntegrationLauncher>,
        registry: Arc<ProtocolRegistry>,
        protocol_version: Version,
        config: WorkerConfig,
    ) -> Self {
        Self {
            launcher,
            registry,
            protocol_version,
            config,
            handle: ConnectorHandle::new("destination"),
            writer: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }
}

impl Destination for ProcessDestination {
    fn start(&self, config: &WorkerDestinationConfig, job_root: &Path) -> Result<()> {
        self.handle.begin()?;

        let catalog = self
            .registry
            .catalog_for_version(&config.catalog, &self.protocol_version)?;
        let files = vec![
            (
                DESTINATION_CONFIG_JSON.to_string(),
                serde_json::to_string(&config.destination_connection_configuration)?,
            ),
            (DESTINATION_CATALOG_JSON.to_string(), serde_json::to_string(&catalog)?),
        ];
        let command = ConnectorCommand::Write {
            config: DESTINATION_CONFIG_JSON.to_string(),
            catalog: DESTINATION_CATALOG_JSON.to_string(),
        };

        let process = self.launcher.launch(job_root, &command, &files)?;
        info!(pid = ?process.pid(), version = %self.protocol_version, "destination started");
        let stdin = self
            .handle
            .attach(
                process,
                OutputSpec {
                    registry: Arc::clone(&self.registry),
                    version: self.protocol_version.clone(),
                    catalog: Some(config.catalog.clone()),
                    detect_version: false,
                    keep: is_destination_output,
                    heartbeat: None,
                },
            )?
            .ok_or_else(|| Error::worker("destination process has no stdin"))?;

        let writer = self.registry.writer(
            BufWriter::new(stdin),
            &self.protocol_version,
            Some(config.catalog.clone()),
        )?;
        *self.writer.lock() = Some(writer);
        Ok(())
    }

    fn accept(&self, message: AirbyteMessage) -> Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .filter(|w| !w.is_closed())
            .ok_or_else(|| Error::worker("destination is not accepting messages"))?;
        writer.write(message)?;
        Ok(())
    }

    fn notify_end_of_input(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            if !writer.is_closed() {
                debug!("signalling end of input to destination");
                writer.close()?;
            }
        }
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
            debug!("destination was never started, nothing to close");
            self.handle.finish();
            return Ok(());
        }
        if !self.handle.finish() {
            return Ok(());
        }

        // A broken pipe here usually means the connector already died; its
        // exit code is the more useful error
        let notified = self.notify_end_of_input();
        let code = self.handle.shutdown(
            self.config.destination_graceful_shutdown,
            self.config.forced_shutdown,
        )?;
        match code {
            Some(code) if !self.config.is_clean_exit(code) => Err(Error::ProcessExit {
                role: "destination",
                code,
            }),
            _ => notified,
        }
    }

    fn cancel(&self) -> Result<()> {
        info!("cancelling destination");
        // Kill first: a pump blocked writing into a full stdin pipe holds the
        // writer lock until the pipe breaks
        self.handle.cancel();
        match self.writer.try_lock() {
            Some(mut guard) => {
                if let Some(mut writer) = guard.take() {
                    if let Err(e) = writer.close() {
                        warn!(error = %e, "error closing destination stdin during cancel");
                    }
                }
            }
            None => debug!("destination stdin is busy, the pending write fails once the pipe breaks"),
        }
        Ok(())
    }
}
