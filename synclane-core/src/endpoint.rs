//! Plumbing shared by the process-backed source and destination
//!
//! A [`ConnectorHandle`] owns the child process, a stderr gobbler thread and
//! a stdout reader thread. The reader runs the versioned message reader and
//! pushes the messages it keeps into a bounded channel that the owning pump
//! drains through [`ConnectorHandle::attempt_read`].

use crate::heartbeat::HeartbeatMonitor;
use crate::process::ConnectorProcess;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use synclane_protocol::models::{AirbyteMessage, ConfiguredAirbyteCatalog};
use synclane_protocol::{ProtocolRegistry, Version};
use tracing::{debug, info, warn};

/// Messages buffered between a connector's stdout and its pump
const CHANNEL_CAPACITY: usize = 1024;

/// How long a single read waits before giving the pump a chance to check its flags
pub(crate) const READ_POLL: Duration = Duration::from_millis(100);

/// Granularity of exit waits, so `cancel` is never blocked behind a long wait
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointState {
    NotStarted,
    Running,
    Closed,
}

/// How a connector's stdout is decoded and filtered
pub(crate) struct OutputSpec {
    pub registry: Arc<ProtocolRegistry>,
    pub version: Version,
    pub catalog: Option<ConfiguredAirbyteCatalog>,
    pub detect_version: bool,
    pub keep: fn(&AirbyteMessage) -> bool,
    pub heartbeat: Option<Arc<HeartbeatMonitor>>,
}

pub(crate) struct ConnectorHandle {
    role: &'static str,
    process: Mutex<Option<Box<dyn ConnectorProcess>>>,
    messages: OnceLock<Receiver<Result<AirbyteMessage>>>,
    output_done: Arc<AtomicBool>,
    exit_code: OnceLock<i32>,
    state: Mutex<EndpointState>,
    cancelled: AtomicBool,
}

impl ConnectorHandle {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            process: Mutex::new(None),
            messages: OnceLock::new(),
            output_done: Arc::new(AtomicBool::new(false)),
            exit_code: OnceLock::new(),
            state: Mutex::new(EndpointState::NotStarted),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock()
    }

    /// NOT_STARTED -> RUNNING
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != EndpointState::NotStarted {
            return Err(Error::worker(format!("{} was already started", self.role)));
        }
        *state = EndpointState::Running;
        Ok(())
    }

    /// RUNNING -> CLOSED; `false` if it was already closed
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        let first = *state != EndpointState::Closed;
        *state = EndpointState::Closed;
        first
    }

    /// Wire up stdio threads and keep the process; returns its stdin
    pub fn attach(
        &self,
        mut process: Box<dyn ConnectorProcess>,
        output: OutputSpec,
    ) -> Result<Option<Box<dyn Write + Send>>> {
        if let Some(stderr) = process.take_stderr() {
            spawn_stderr_gobbler(self.role, stderr)?;
        }
        let stdout = process
            .take_stdout()
            .ok_or_else(|| Error::worker(format!("{} process has no stdout", self.role)))?;
        let stdin = process.take_stdin();

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        spawn_output_reader(self.role, stdout, output, tx, Arc::clone(&self.output_done))?;
        self.messages
            .set(rx)
            .map_err(|_| Error::worker(format!("{} output already attached", self.role)))?;
        *self.process.lock() = Some(process);
        Ok(stdin)
    }

    /// Next kept message, or `None` if nothing arrived within [`READ_POLL`]
    pub fn attempt_read(&self) -> Result<Option<AirbyteMessage>> {
        let rx = self
            .messages
            .get()
            .ok_or_else(|| Error::worker(format!("{} was not started", self.role)))?;
        match rx.recv_timeout(READ_POLL) {
            Ok(Ok(message)) => Ok(Some(message)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // Output is closed but the process may still be exiting
                thread::sleep(WAIT_SLICE);
                Ok(None)
            }
        }
    }

    /// Process gone and every buffered message consumed
    pub fn is_finished(&self) -> bool {
        let drained = self.output_done.load(Ordering::SeqCst)
            && self.messages.get().is_none_or(|rx| rx.is_empty());
        drained && !self.is_alive()
    }

    pub fn is_alive(&self) -> bool {
        self.process.lock().as_mut().is_some_and(|p| p.is_alive())
    }

    /// Exit code, fetched from the process once and cached
    pub fn exit_value(&self) -> Result<i32> {
        if let Some(&code) = self.exit_code.get() {
            return Ok(code);
        }
        let mut guard = self.process.lock();
        let process = guard
            .as_mut()
            .ok_or_else(|| Error::worker(format!("{} process was never started", self.role)))?;
        match process.wait_timeout(Duration::ZERO)? {
            Some(code) => Ok(*self.exit_code.get_or_init(|| code)),
            None => Err(Error::worker(format!("{} process has not exited", self.role))),
        }
    }

    /// Wait for a voluntary exit, then kill; `None` if there never was a process
    pub fn shutdown(&self, graceful: Duration, forced: Duration) -> Result<Option<i32>> {
        if self.process.lock().is_none() {
            return Ok(None);
        }
        if let Some(code) = self.wait_for_exit(graceful)? {
            return Ok(Some(code));
        }

        warn!(
            role = self.role,
            graceful_secs = graceful.as_secs(),
            "connector did not exit in time, killing it"
        );
        self.kill()?;
        match self.wait_for_exit(forced)? {
            Some(code) => Ok(Some(code)),
            None => Err(Error::worker(format!(
                "{} process could not be terminated",
                self.role
            ))),
        }
    }

    fn wait_for_exit(&self, timeout: Duration) -> Result<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(&code) = self.exit_code.get() {
                return Ok(Some(code));
            }
            let slice = WAIT_SLICE.min(deadline.saturating_duration_since(Instant::now()));
            let exited = match self.process.lock().as_mut() {
                Some(process) => process.wait_timeout(slice)?,
                None => return Ok(None),
            };
            if let Some(code) = exited {
                return Ok(Some(*self.exit_code.get_or_init(|| code)));
            }
            if self.cancelled.load(Ordering::SeqCst) || Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn kill(&self) -> Result<()> {
        if let Some(process) = self.process.lock().as_mut() {
            process.kill()?;
        }
        Ok(())
    }

    /// Kill the process if there is one; errors are logged, never returned
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Err(e) = self.kill() {
            warn!(role = self.role, error = %e, "failed to kill connector");
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.lock().as_ref().and_then(|p| p.pid())
    }
}

fn spawn_stderr_gobbler(role: &'static str, stderr: Box<dyn Read + Send>) -> Result<()> {
    thread::Builder::new()
        .name(format!("{role}-stderr"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => info!(connector = role, "{line}"),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(connector = role, error = %e, "stderr closed");
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

fn spawn_output_reader(
    role: &'static str,
    stdout: Box<dyn Read + Send>,
    spec: OutputSpec,
    tx: Sender<Result<AirbyteMessage>>,
    done: Arc<AtomicBool>,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("{role}-stdout"))
        .spawn(move || {
            let reader = spec
                .registry
                .reader(BufReader::new(stdout), &spec.version, spec.catalog)
                .with_version_detection(spec.detect_version)
                .with_connector_name(role);
            for item in reader {
                match item {
                    Ok(message) => {
                        if let Some(heartbeat) = &spec.heartbeat {
                            heartbeat.beat();
                        }
                        if !(spec.keep)(&message) {
                            debug!(connector = role, kind = message.message_type.as_str(), "dropping message");
                            continue;
                        }
                        if tx.send(Ok(message)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into()));
                        break;
                    }
                }
            }
            done.store(true, Ordering::SeqCst);
        })?;
    Ok(())
}
