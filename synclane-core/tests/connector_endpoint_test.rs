//! Process-backed source and destination endpoints

#![cfg(unix)]

use serde_json::json;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use synclane_core::{
    CommandLauncher, ConnectorCommand, ConnectorProcess, Destination, Error, HeartbeatMonitor,
    IntegrationLauncher, ProcessDestination, ProcessSource, ReplicationStatus, ReplicationWorker, Result,
    Source, StandardSyncInput, State, WorkerConfig, WorkerDestinationConfig, WorkerSourceConfig,
};
use synclane_protocol::models::{
    AirbyteMessage, AirbyteMessageType, AirbyteStream, ConfiguredAirbyteCatalog, ConfiguredAirbyteStream,
};
use synclane_protocol::{ProtocolRegistry, Version};

const V0: Version = Version::new(0, 3, 0);

fn registry() -> Arc<ProtocolRegistry> {
    Arc::new(ProtocolRegistry::standard().unwrap())
}

fn users_catalog() -> ConfiguredAirbyteCatalog {
    let schema = json!({"type": "object", "properties": {"id": {"type": "string"}}});
    ConfiguredAirbyteCatalog {
        streams: vec![ConfiguredAirbyteStream::full_refresh(AirbyteStream::new("users", schema))],
    }
}

fn sh(script: &str, name: &str) -> Arc<dyn IntegrationLauncher> {
    Arc::new(CommandLauncher::new("sh").with_args(["-c", script, name]))
}

fn fast_config() -> WorkerConfig {
    WorkerConfig::default().with_shutdown_windows(
        Duration::from_secs(5),
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
}

fn drain(source: &dyn Source) -> Vec<AirbyteMessage> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut messages = Vec::new();
    while !source.is_finished() {
        assert!(Instant::now() < deadline, "source did not finish in time");
        if let Some(message) = source.attempt_read().unwrap() {
            messages.push(message);
        }
    }
    messages
}

const SOURCE_SCRIPT: &str = r#"
printf '%s\n' '{"type":"LOG","log":{"level":"INFO","message":"starting"}}'
printf '%s\n' 'not json at all'
printf '%s\n' '{"type":"RECORD","record":{"stream":"users","data":{"id":"1"},"emitted_at":1}}'
printf '%s\n' '{"type":"STATE","state":{"data":{"cursor":1}}}'
"#;

/// Only records, state and traces reach the worker; the heartbeat follows the output
#[test]
fn test_source_filters_and_beats() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat = Arc::new(HeartbeatMonitor::new(Duration::from_secs(60)));
    let source = ProcessSource::new(
        sh(SOURCE_SCRIPT, "source"),
        registry(),
        V0,
        Arc::clone(&heartbeat),
        fast_config(),
    );
    assert_eq!(heartbeat.is_beating(), None);

    let config = WorkerSourceConfig {
        source_connection_configuration: json!({"host": "localhost"}),
        catalog: users_catalog(),
        state: Some(json!({"cursor": 0})),
    };
    source.start(&config, dir.path()).unwrap();
    let messages = drain(&source);

    let types: Vec<AirbyteMessageType> = messages.iter().map(|m| m.message_type).collect();
    assert_eq!(types, vec![AirbyteMessageType::Record, AirbyteMessageType::State]);
    assert_eq!(heartbeat.is_beating(), Some(true));
    source.close().unwrap();
    assert_eq!(source.exit_value().unwrap(), 0);

    assert!(dir.path().join("source_config.json").exists());
    assert!(dir.path().join("input_state.json").exists());
}

/// A non-zero exit surfaces on close, and closing again is a no-op
#[test]
fn test_source_exit_code_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let source = ProcessSource::new(
        sh("exit 3", "source"),
        registry(),
        V0,
        Arc::new(HeartbeatMonitor::new(Duration::from_secs(60))),
        fast_config(),
    );
    let config = WorkerSourceConfig {
        source_connection_configuration: json!({}),
        catalog: users_catalog(),
        state: None,
    };
    source.start(&config, dir.path()).unwrap();
    drain(&source);

    let err = source.close().unwrap_err();
    assert!(matches!(err, Error::ProcessExit { role: "source", code: 3 }));
    assert!(source.close().is_ok());
}

/// Closing a source that never started succeeds
#[test]
fn test_close_unstarted_source() {
    let source = ProcessSource::new(
        sh("exit 0", "source"),
        registry(),
        V0,
        Arc::new(HeartbeatMonitor::new(Duration::from_secs(60))),
        fast_config(),
    );
    assert!(source.close().is_ok());
}

/// Stdin that counts flushes and drops
struct CountingStdin {
    flushes: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

impl Write for CountingStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for CountingStdin {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connector that has already exited with a fixed code
struct ExitedProcess {
    stdin: Option<Box<dyn Write + Send>>,
    code: i32,
}

impl ConnectorProcess for ExitedProcess {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        Some(Box::new(io::empty()))
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        None
    }

    fn is_alive(&mut self) -> bool {
        false
    }

    fn wait_timeout(&mut self, _timeout: Duration) -> io::Result<Option<i32>> {
        Ok(Some(self.code))
    }

    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

struct CountingLauncher {
    flushes: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
    code: i32,
}

impl IntegrationLauncher for CountingLauncher {
    fn launch(
        &self,
        _job_root: &Path,
        command: &ConnectorCommand,
        _files: &[(String, String)],
    ) -> Result<Box<dyn ConnectorProcess>> {
        assert!(matches!(command, ConnectorCommand::Write { .. }));
        Ok(Box::new(ExitedProcess {
            stdin: Some(Box::new(CountingStdin {
                flushes: Arc::clone(&self.flushes),
                drops: Arc::clone(&self.drops),
            })),
            code: self.code,
        }))
    }
}

/// Close without a prior end-of-input flushes and closes stdin exactly once, then reports the exit code
#[test]
fn test_destination_close_flushes_once_and_reports_exit() {
    let flushes = Arc::new(AtomicUsize::new(0));
    let drops = Arc::new(AtomicUsize::new(0));
    let launcher = Arc::new(CountingLauncher {
        flushes: Arc::clone(&flushes),
        drops: Arc::clone(&drops),
        code: 1,
    });
    let destination = ProcessDestination::new(launcher, registry(), V0, fast_config());
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerDestinationConfig {
        destination_connection_configuration: json!({}),
        catalog: users_catalog(),
        state: None,
    };
    destination.start(&config, dir.path()).unwrap();

    let err = destination.close().unwrap_err();
    assert!(matches!(
        err,
        Error::ProcessExit {
            role: "destination",
            code: 1
        }
    ));
    assert_eq!(flushes.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    assert!(destination.close().is_ok());
    destination.notify_end_of_input().unwrap();
    assert_eq!(flushes.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// Writes after end-of-input are refused
#[test]
fn test_destination_rejects_after_end_of_input() {
    let launcher = Arc::new(CountingLauncher {
        flushes: Arc::new(AtomicUsize::new(0)),
        drops: Arc::new(AtomicUsize::new(0)),
        code: 0,
    });
    let destination = ProcessDestination::new(launcher, registry(), V0, fast_config());
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerDestinationConfig {
        destination_connection_configuration: json!({}),
        catalog: users_catalog(),
        state: None,
    };
    destination.start(&config, dir.path()).unwrap();
    destination
        .accept(AirbyteMessage::record("users", None, json!({"id": "1"})))
        .unwrap();
    destination.notify_end_of_input().unwrap();
    assert!(
        destination
            .accept(AirbyteMessage::record("users", None, json!({"id": "2"})))
            .is_err()
    );
    destination.close().unwrap();
}

const ECHO_STATE_DESTINATION: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"STATE"'*) printf '%s\n' "$line" ;;
  esac
done
"#;

/// Full attempt between two shell connectors speaking the old protocol major
#[test]
fn test_worker_over_shell_connectors() {
    let registry = registry();
    let config = fast_config();
    let source = Arc::new(ProcessSource::new(
        sh(SOURCE_SCRIPT, "source"),
        Arc::clone(&registry),
        V0,
        Arc::new(HeartbeatMonitor::new(Duration::from_secs(60))),
        config.clone(),
    ));
    let destination = Arc::new(ProcessDestination::new(
        sh(ECHO_STATE_DESTINATION, "destination"),
        registry,
        V0,
        config.clone(),
    ));
    let worker = ReplicationWorker::new("shell", 0, source, destination, config);

    let input = StandardSyncInput::new(json!({}), json!({}), users_catalog());
    let dir = tempfile::tempdir().unwrap();
    let output = worker.run(&input, dir.path()).unwrap();

    assert_eq!(output.status(), ReplicationStatus::Completed, "{:?}", output.failures);
    let stats = &output.replication_attempt_summary.total_stats;
    assert_eq!(stats.records_emitted, 1);
    assert_eq!(stats.records_committed, Some(1));
    assert_eq!(stats.destination_state_messages_emitted, 1);
    assert_eq!(output.state, Some(State { state: json!({"cursor": 1}) }));
}

/// Endless stream of ~4 KiB records, enough to fill any pipe quickly
const FLOODING_SOURCE: &str = r#"
payload=$(printf '%04096d' 0)
while :; do
  printf '{"type":"RECORD","record":{"stream":"users","data":{"id":"%s"},"emitted_at":1}}\n' "$payload"
done
"#;

/// A destination that never reads its stdin
const STALLED_DESTINATION: &str = "exec sleep 30";

fn large_record() -> AirbyteMessage {
    AirbyteMessage::record("users", None, json!({"id": "0".repeat(4096)}))
}

/// Cancel kills a destination whose stdin is full, which unblocks the pending write
#[test]
fn test_destination_cancel_unblocks_stalled_write() {
    let dir = tempfile::tempdir().unwrap();
    let destination = ProcessDestination::new(sh(STALLED_DESTINATION, "destination"), registry(), V0, fast_config());
    let config = WorkerDestinationConfig {
        destination_connection_configuration: json!({}),
        catalog: users_catalog(),
        state: None,
    };
    destination.start(&config, dir.path()).unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    std::thread::scope(|scope| {
        let destination = &destination;
        scope.spawn(move || {
            let mut written = 0u64;
            while destination.accept(large_record()).is_ok() {
                written += 1;
            }
            let _ = done_tx.send(written);
        });

        // 64 KiB of pipe buffer is long gone by now
        std::thread::sleep(Duration::from_millis(300));
        assert!(done_rx.is_empty(), "writer should be blocked on the full pipe");

        let started = Instant::now();
        destination.cancel().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2), "cancel blocked for {:?}", started.elapsed());

        let written = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("blocked write was not released by cancel");
        assert!(written > 0);
    });

    // Idempotent, and close after cancel does not hang either
    destination.cancel().unwrap();
    let started = Instant::now();
    let _ = destination.close();
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Cancelling a worker whose destination stopped reading ends the attempt as cancelled
#[test]
fn test_worker_cancel_with_stalled_destination() {
    let registry = registry();
    let mut config = fast_config();
    config.cancel_quiesce_timeout = Duration::from_millis(500);
    let source = Arc::new(ProcessSource::new(
        sh(FLOODING_SOURCE, "source"),
        Arc::clone(&registry),
        V0,
        Arc::new(HeartbeatMonitor::new(Duration::from_secs(60))),
        config.clone(),
    ));
    let destination = Arc::new(ProcessDestination::new(
        sh(STALLED_DESTINATION, "destination"),
        registry,
        V0,
        config.clone(),
    ));
    let worker = Arc::new(ReplicationWorker::new("stalled", 0, source, destination, config));

    let (output_tx, output_rx) = crossbeam_channel::bounded(1);
    let runner = Arc::clone(&worker);
    let dir = tempfile::tempdir().unwrap();
    let job_root = dir.path().to_path_buf();
    std::thread::spawn(move || {
        let input = StandardSyncInput::new(json!({}), json!({}), users_catalog());
        let _ = output_tx.send(runner.run(&input, &job_root));
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    while worker.tracker().get_total_records_emitted() < 8 {
        assert!(Instant::now() < deadline, "source never started flooding");
        std::thread::sleep(Duration::from_millis(20));
    }
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    worker.cancel();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancel took {:?}",
        started.elapsed()
    );

    let output = output_rx
        .recv_timeout(Duration::from_secs(20))
        .expect("run did not return after cancel")
        .unwrap();
    assert_eq!(output.status(), ReplicationStatus::Cancelled);
}
