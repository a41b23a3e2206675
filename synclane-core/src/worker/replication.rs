//! Two-pump replication of one sync attempt
//!
//! ```text
//!   source stdout ──> [replication pump] ──> destination stdin
//!                        │ validate, track, map
//!                        ▼
//!                   MessageTracker  <── [destination-output pump] <── destination stdout
//! ```
//!
//! Both pumps run on scoped threads inside one `replication` span. The
//! orchestrator waits on a fan-in channel so either pump's failure is seen
//! as soon as it happens, reacts to it, then waits for the other pump.
//!
//! Only RECORD and STATE messages reach the destination. CONTROL messages
//! from either side go to the [`ConnectorConfigUpdater`].

use super::types::{
    FailureReason, ReplicationAttemptSummary, ReplicationOutput, ReplicationStatus, StandardSyncInput,
    StreamSyncStats, SyncStats,
};
use crate::config::{FeatureFlags, WorkerConfig};
use crate::config_updater::{ConnectorConfigUpdater, LoggingConfigUpdater, requested_config};
use crate::destination::{Destination, WorkerDestinationConfig};
use crate::heartbeat::{HeartbeatGuard, HeartbeatMonitor};
use crate::mapper::NamespacingMapper;
use crate::metrics::WorkerMetrics;
use crate::record_validator::{RecordSchemaValidator, ValidationReport};
use crate::source::{Source, WorkerSourceConfig};
use crate::tracking::MessageTracker;
use crate::{Error, Result};
use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use synclane_protocol::models::{
    AirbyteMessage, AirbyteMessageType, AirbyteRecordMessage, AirbyteStreamNameNamespacePair,
};
use uuid::Uuid;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pump {
    Replication,
    DestinationOutput,
}

/// Connector ids handed to the config updater
#[derive(Debug, Clone, Copy)]
struct ConnectorIds {
    source: Option<Uuid>,
    destination: Option<Uuid>,
}

/// Counts a pump as active for as long as it lives
struct ActivePump<'a>(&'a AtomicUsize);

impl<'a> ActivePump<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActivePump<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Moves one attempt's data from a source to a destination
pub struct ReplicationWorker {
    job_id: String,
    attempt: u32,
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    tracker: Arc<MessageTracker>,
    config: WorkerConfig,
    metrics: Arc<WorkerMetrics>,
    config_updater: Arc<dyn ConnectorConfigUpdater>,
    last_output: Mutex<Option<ReplicationOutput>>,
    cancelled: AtomicBool,
    has_failed: AtomicBool,
    active_pumps: AtomicUsize,
}

impl ReplicationWorker {
    pub fn new(
        job_id: impl Into<String>,
        attempt: u32,
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
        config: WorkerConfig,
    ) -> Self {
        let tracker = Arc::new(MessageTracker::new(
            config.state_tracker_memory_limit,
            config.log_connector_messages,
        ));
        Self {
            job_id: job_id.into(),
            attempt,
            source,
            destination,
            tracker,
            config,
            metrics: Arc::new(WorkerMetrics::new()),
            config_updater: Arc::new(LoggingConfigUpdater),
            last_output: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            has_failed: AtomicBool::new(false),
            active_pumps: AtomicUsize::new(0),
        }
    }

    /// Share a metrics registry with the caller
    pub fn with_metrics(mut self, metrics: Arc<WorkerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Where connector-requested configuration updates are persisted
    pub fn with_config_updater(mut self, updater: Arc<dyn ConnectorConfigUpdater>) -> Self {
        self.config_updater = updater;
        self
    }

    /// Output of the last finished [`run`](Self::run), kept even when a
    /// heartbeat timeout turns the guarded run into an error
    pub fn last_output(&self) -> Option<ReplicationOutput> {
        self.last_output.lock().clone()
    }

    pub fn tracker(&self) -> &Arc<MessageTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run the attempt to completion, failure or cancellation
    ///
    /// Connector failures are reported through the output's status and
    /// failure list; `Err` is reserved for the worker itself breaking.
    pub fn run(&self, input: &StandardSyncInput, job_root: &Path) -> Result<ReplicationOutput> {
        let span = info_span!("replication", job_id = %self.job_id, attempt = self.attempt);
        let _entered = span.enter();
        let start_time = chrono::Utc::now().timestamp_millis();
        info!(job_root = %job_root.display(), "starting replication");

        let mut mapper = NamespacingMapper::new(
            input.namespace_definition,
            input.namespace_format.clone(),
            input.prefix.clone(),
        );
        let destination_config = WorkerDestinationConfig {
            destination_connection_configuration: input.destination_configuration.clone(),
            catalog: mapper.map_catalog(&input.catalog),
            state: input.state.as_ref().map(|s| s.state.clone()),
        };
        let source_config = WorkerSourceConfig {
            source_connection_configuration: input.source_configuration.clone(),
            catalog: input.catalog.clone(),
            state: input.state.as_ref().map(|s| s.state.clone()),
        };
        let validator = RecordSchemaValidator::new(&input.catalog);
        let ids = ConnectorIds {
            source: input.source_id,
            destination: input.destination_id,
        };

        let mut replication_failure: Option<Error> = None;
        let mut destination_failure: Option<Error> = None;

        // Destination first so it is ready before the source emits anything
        let started = match self.destination.start(&destination_config, job_root) {
            Err(e) => {
                destination_failure = Some(Error::destination_failure("starting destination", e));
                false
            }
            Ok(()) => match self.source.start(&source_config, job_root) {
                Err(e) => {
                    replication_failure = Some(Error::source_failure("starting source", e));
                    false
                }
                Ok(()) => true,
            },
        };

        if started {
            let stop = AtomicBool::new(false);
            let (done_tx, done_rx) = unbounded::<(Pump, Result<()>)>();
            thread::scope(|scope| -> Result<()> {
                let tx = done_tx.clone();
                let pump_span = span.clone();
                let (mapper, validator, stop_ref) = (&mapper, &validator, &stop);
                thread::Builder::new()
                    .name("replication-pump".into())
                    .spawn_scoped(scope, move || {
                        let _entered = pump_span.enter();
                        let result = self.replicate(mapper, validator, ids, stop_ref);
                        let _ = tx.send((Pump::Replication, result));
                    })?;

                let tx = done_tx.clone();
                let pump_span = span.clone();
                thread::Builder::new()
                    .name("destination-output-pump".into())
                    .spawn_scoped(scope, move || {
                        let _entered = pump_span.enter();
                        let result = self.read_destination_output(mapper, ids);
                        let _ = tx.send((Pump::DestinationOutput, result));
                    })?;
                drop(done_tx);

                for (pump, result) in done_rx.iter() {
                    let Err(e) = result else {
                        debug!(pump = ?pump, "pump finished");
                        continue;
                    };
                    self.has_failed.store(true, Ordering::SeqCst);
                    error!(pump = ?pump, error = %e, "pump failed");
                    match pump {
                        Pump::Replication => {
                            // Let the destination drain and flush what it already has
                            if let Err(e) = self.destination.notify_end_of_input() {
                                warn!(error = %e, "could not signal end of input to destination");
                            }
                            replication_failure = Some(e);
                        }
                        Pump::DestinationOutput => {
                            stop.store(true, Ordering::SeqCst);
                            if let Err(e) = self.source.cancel() {
                                warn!(error = %e, "could not cancel source");
                            }
                            destination_failure = Some(e);
                        }
                    }
                }
                Ok(())
            })?;
        }

        // Reverse of start order, after both pumps are gone
        self.close_endpoint("source", self.source.close(), &mut replication_failure, |e| {
            Error::source_failure("closing source", e)
        });
        self.close_endpoint("destination", self.destination.close(), &mut destination_failure, |e| {
            Error::destination_failure("closing destination", e)
        });
        if replication_failure.is_some() || destination_failure.is_some() {
            self.has_failed.store(true, Ordering::SeqCst);
        }

        let status = ReplicationStatus::resolve(self.is_cancelled(), self.has_failed.load(Ordering::SeqCst));
        let (total_stats, stream_stats) = self.collect_stats(status);
        let summary = ReplicationAttemptSummary {
            status,
            records_synced: total_stats.records_emitted,
            bytes_synced: total_stats.bytes_emitted,
            start_time,
            end_time: chrono::Utc::now().timestamp_millis(),
            total_stats,
            stream_stats,
            unreliable_state_timing_metrics: self.tracker.state_timing_metrics_unreliable(),
        };

        let failures: Vec<FailureReason> = [
            self.tracker.error_trace_message_failure(&self.job_id, self.attempt),
            replication_failure
                .as_ref()
                .map(|e| FailureReason::from_error(e, &self.job_id, self.attempt)),
            destination_failure
                .as_ref()
                .map(|e| FailureReason::from_error(e, &self.job_id, self.attempt)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let state = match self.tracker.get_destination_output_state() {
            Some(state) => {
                info!("state capture: updated state to the last acknowledged checkpoint");
                Some(state)
            }
            None if input.state.is_some() => {
                warn!("state capture: no new state, falling back on input state");
                input.state.clone()
            }
            None => {
                warn!("state capture: no state retained");
                None
            }
        };

        let output = ReplicationOutput {
            replication_attempt_summary: summary,
            state,
            output_catalog: destination_config.catalog,
            failures,
        };
        log_output(&output, &self.metrics);
        *self.last_output.lock() = Some(output.clone());
        Ok(output)
    }

    /// [`run`](Self::run) under the heartbeat guard, cancelling itself on timeout
    pub fn run_with_heartbeat(
        &self,
        input: &StandardSyncInput,
        job_root: &Path,
        monitor: Arc<HeartbeatMonitor>,
        flags: Arc<dyn FeatureFlags>,
    ) -> Result<ReplicationOutput> {
        let guard = HeartbeatGuard::new(
            monitor,
            self.config.heartbeat_check_interval,
            flags,
            input.workspace_id,
            Arc::clone(&self.metrics),
        );
        let result = guard.run(|| self.run(input, job_root), || self.cancel());
        if let Err(Error::HeartbeatTimeout(elapsed)) = &result {
            let committed = self
                .last_output()
                .and_then(|output| output.state)
                .map(|state| state.state.to_string());
            warn!(
                elapsed_secs = elapsed.as_secs(),
                last_committed_state = committed.as_deref().unwrap_or("none"),
                "replication stopped by heartbeat timeout, partial output kept"
            );
        }
        result
    }

    /// Stop the pumps, then cancel both connectors; never fails
    pub fn cancel(&self) {
        info!(job_id = %self.job_id, attempt = self.attempt, "cancelling replication worker");
        self.cancelled.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.cancel_quiesce_timeout;
        while self.active_pumps.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        if self.active_pumps.load(Ordering::SeqCst) > 0 {
            warn!("pumps did not stop in time, cancelling connectors anyway");
        }

        if let Err(e) = self.destination.cancel() {
            warn!(error = %e, "error cancelling destination");
        }
        if let Err(e) = self.source.cancel() {
            warn!(error = %e, "error cancelling source");
        }
    }

    fn replicate(
        &self,
        mapper: &NamespacingMapper,
        validator: &RecordSchemaValidator,
        ids: ConnectorIds,
        stop: &AtomicBool,
    ) -> Result<()> {
        let _active = ActivePump::enter(&self.active_pumps);
        let mut report = ValidationReport::new(self.config.max_schema_validation_errors);
        let pumped = self.pump_source(mapper, validator, ids, stop, &mut report);
        report.report(&self.metrics);
        let records = pumped?;

        if self.is_cancelled() || stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            records,
            bytes = %format_bytes(self.tracker.get_total_bytes_emitted()),
            "source has no more messages, closing it"
        );
        self.source
            .close()
            .map_err(|e| Error::source_failure("closing source", e))?;
        self.destination
            .notify_end_of_input()
            .map_err(|e| Error::destination_failure("signalling end of input", e))?;

        let code = self
            .source
            .exit_value()
            .map_err(|e| Error::source_failure("reading source exit code", e))?;
        if !self.config.is_clean_exit(code) {
            return Err(Error::source_failure(
                "source finished",
                Error::ProcessExit { role: "source", code },
            ));
        }
        Ok(())
    }

    fn pump_source(
        &self,
        mapper: &NamespacingMapper,
        validator: &RecordSchemaValidator,
        ids: ConnectorIds,
        stop: &AtomicBool,
        report: &mut ValidationReport,
    ) -> Result<u64> {
        let mut records = 0u64;
        while !self.is_cancelled() && !stop.load(Ordering::SeqCst) && !self.source.is_finished() {
            let Some(mut message) = self
                .source
                .attempt_read()
                .map_err(|e| Error::source_failure("reading from source", e))?
            else {
                continue;
            };

            let is_record = match message.record.as_mut() {
                Some(record) => {
                    if self.config.field_selection_enabled {
                        select_fields(record, validator);
                    }
                    report.check(validator, record);
                    true
                }
                None => false,
            };

            self.tracker.accept_from_source(&message);
            match message.message_type {
                AirbyteMessageType::Record | AirbyteMessageType::State => self
                    .destination
                    .accept(mapper.map_message(message))
                    .map_err(|e| Error::destination_failure("writing to destination", e))?,
                AirbyteMessageType::Control => self.update_connector_config(Pump::Replication, &message, ids),
                _ => {}
            }

            if is_record {
                records += 1;
                if records % self.config.progress_log_interval.max(1) == 0 {
                    info!(
                        records,
                        bytes = %format_bytes(self.tracker.get_total_bytes_emitted()),
                        "records read"
                    );
                }
            }
        }
        Ok(records)
    }

    fn read_destination_output(&self, mapper: &NamespacingMapper, ids: ConnectorIds) -> Result<()> {
        let _active = ActivePump::enter(&self.active_pumps);
        while !self.is_cancelled() && !self.destination.is_finished() {
            let Some(message) = self
                .destination
                .attempt_read()
                .map_err(|e| Error::destination_failure("reading destination output", e))?
            else {
                continue;
            };
            let message = mapper.revert_message(message);
            if message.state.is_some() {
                debug!("destination acknowledged a checkpoint");
            }
            if message.message_type == AirbyteMessageType::Control {
                self.update_connector_config(Pump::DestinationOutput, &message, ids);
            }
            self.tracker.accept_from_destination(&message);
        }

        if !self.is_cancelled() {
            let code = self
                .destination
                .exit_value()
                .map_err(|e| Error::destination_failure("reading destination exit code", e))?;
            if !self.config.is_clean_exit(code) {
                return Err(Error::destination_failure(
                    "destination finished",
                    Error::ProcessExit {
                        role: "destination",
                        code,
                    },
                ));
            }
        }
        Ok(())
    }

    /// Hand a CONNECTOR_CONFIG control message to the updater; failures are only logged
    fn update_connector_config(&self, pump: Pump, message: &AirbyteMessage, ids: ConnectorIds) {
        let Some(config) = message.control.as_ref().and_then(requested_config) else {
            warn!(pump = ?pump, "control message without a configuration, ignoring");
            return;
        };
        let result = match pump {
            Pump::Replication => self.config_updater.update_source(ids.source, config),
            Pump::DestinationOutput => self.config_updater.update_destination(ids.destination, config),
        };
        match result {
            Ok(()) => info!(pump = ?pump, "connector configuration updated"),
            Err(e) => error!(pump = ?pump, error = %e, "could not persist connector configuration update"),
        }
    }

    /// Record a close failure unless the attempt already failed or was cancelled
    fn close_endpoint(
        &self,
        role: &str,
        result: Result<()>,
        slot: &mut Option<Error>,
        tag: impl FnOnce(Error) -> Error,
    ) {
        let Err(e) = result else {
            return;
        };
        let already_failed = self.has_failed.load(Ordering::SeqCst) || slot.is_some();
        if self.is_cancelled() || already_failed {
            warn!(role, error = %e, "error closing connector after the attempt already ended");
        } else {
            error!(role, error = %e, "error closing connector");
            *slot = Some(tag(e));
        }
    }

    fn collect_stats(&self, status: ReplicationStatus) -> (SyncStats, Vec<StreamSyncStats>) {
        let emitted_records = self.tracker.get_stream_to_emitted_records();
        let emitted_bytes = self.tracker.get_stream_to_emitted_bytes();
        let estimated_records = self.tracker.get_stream_to_estimated_records();
        let estimated_bytes = self.tracker.get_stream_to_estimated_bytes();
        let source_states = self.tracker.get_stream_to_source_state_messages_emitted();
        let destination_states = self.tracker.get_stream_to_destination_state_messages_emitted();

        // Everything emitted counts as committed once the destination exited cleanly
        let committed = if status == ReplicationStatus::Completed {
            Some(emitted_records.clone())
        } else {
            let committed = self.tracker.get_stream_to_committed_records();
            if committed.is_none() {
                self.metrics.record_unreliable_committed_counts();
            }
            committed
        };

        let streams: BTreeSet<&AirbyteStreamNameNamespacePair> = emitted_records
            .keys()
            .chain(estimated_records.keys())
            .chain(estimated_bytes.keys())
            .chain(source_states.keys())
            .chain(destination_states.keys())
            .collect();
        let stream_stats = streams
            .into_iter()
            .map(|pair| StreamSyncStats {
                stream_name: pair.name.clone(),
                stream_namespace: pair.namespace.clone(),
                stats: SyncStats {
                    records_emitted: emitted_records.get(pair).copied().unwrap_or(0),
                    bytes_emitted: emitted_bytes.get(pair).copied().unwrap_or(0),
                    estimated_records: estimated_records.get(pair).copied(),
                    estimated_bytes: estimated_bytes.get(pair).copied(),
                    source_state_messages_emitted: source_states.get(pair).copied().unwrap_or(0),
                    destination_state_messages_emitted: destination_states.get(pair).copied().unwrap_or(0),
                    records_committed: committed
                        .as_ref()
                        .map(|c| c.get(pair).copied().unwrap_or(0)),
                    ..SyncStats::default()
                },
            })
            .collect();

        let total = SyncStats {
            records_emitted: self.tracker.get_total_records_emitted(),
            bytes_emitted: self.tracker.get_total_bytes_emitted(),
            estimated_records: self.tracker.get_total_records_estimated(),
            estimated_bytes: self.tracker.get_total_bytes_estimated(),
            source_state_messages_emitted: self.tracker.get_total_source_state_messages_emitted(),
            destination_state_messages_emitted: self
                .tracker
                .get_total_destination_state_messages_emitted(),
            records_committed: committed.as_ref().map(|c| c.values().sum()),
            max_seconds_before_source_state_message_emitted: self
                .tracker
                .get_max_seconds_to_receive_source_state(),
            mean_seconds_before_source_state_message_emitted: self
                .tracker
                .get_mean_seconds_to_receive_source_state(),
            max_seconds_between_state_message_emitted_and_committed: self
                .tracker
                .get_max_seconds_between_state_emitted_and_committed(),
            mean_seconds_between_state_message_emitted_and_committed: self
                .tracker
                .get_mean_seconds_between_state_emitted_and_committed(),
        };
        if self.tracker.state_timing_metrics_unreliable() {
            self.metrics.record_state_timing_error();
        }
        (total, stream_stats)
    }
}

fn select_fields(record: &mut AirbyteRecordMessage, validator: &RecordSchemaValidator) {
    let pair = AirbyteStreamNameNamespacePair::from_record(record);
    if let (Some(declared), Some(data)) = (validator.declared_fields(&pair), record.data.as_object_mut()) {
        data.retain(|key, _| declared.contains(key.as_str()));
    }
}

fn log_output(output: &ReplicationOutput, metrics: &WorkerMetrics) {
    let summary = serde_json::to_string_pretty(&output.replication_attempt_summary).unwrap_or_default();
    info!(status = ?output.status(), "sync summary: {summary}");
    if !output.failures.is_empty() {
        let failures = serde_json::to_string_pretty(&output.failures).unwrap_or_default();
        info!("failures: {failures}");
    }
    debug!(metrics = ?metrics.snapshot(), "worker metrics");
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
