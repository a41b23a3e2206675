//! Per-attempt accounting of everything crossing the pumps
//!
//! Both pumps feed the same [`MessageTracker`]; all bookkeeping sits behind
//! one mutex. Records are counted per stream, checkpoints close deltas in
//! the [`StateDeltaTracker`], and destination acknowledgements commit them.
//! Any ledger failure (memory bound, duplicate hash) flips the tracker into
//! "unreliable committed counts" mode instead of failing the sync. Checkpoint
//! timing follows the same rule with its own flag.

use super::state_aggregator::{State, StateAggregator};
use super::state_delta_tracker::StateDeltaTracker;
use super::state_metrics_tracker::{CheckpointKey, DEFAULT_MAX_PENDING_STATES, StateMetricsTracker};
use crate::heartbeat::Clock;
use crate::worker::{FailureOrigin, FailureReason};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use synclane_protocol::models::{
    AirbyteEstimateTraceMessage, AirbyteMessage, AirbyteMessageType, AirbyteRecordMessage,
    AirbyteStateMessage, AirbyteStateType, AirbyteStreamNameNamespacePair, AirbyteTraceMessage,
    EstimateType, TraceType,
};
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64;

type StreamPair = AirbyteStreamNameNamespacePair;

/// Which side a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorSide {
    Source,
    Destination,
}

#[derive(Debug)]
struct Inner {
    stream_indexes: HashMap<StreamPair, u16>,
    index_streams: Vec<StreamPair>,
    running_counts: BTreeMap<u16, u64>,
    emitted_records: HashMap<StreamPair, u64>,
    emitted_bytes: HashMap<StreamPair, u64>,
    estimate_type: Option<EstimateType>,
    record_estimates: HashMap<StreamPair, i64>,
    byte_estimates: HashMap<StreamPair, i64>,
    sync_record_estimate: Option<i64>,
    sync_byte_estimate: Option<i64>,
    source_states: StateAggregator,
    destination_states: StateAggregator,
    source_state_messages: u64,
    destination_state_messages: u64,
    source_stream_states: HashMap<StreamPair, u64>,
    destination_stream_states: HashMap<StreamPair, u64>,
    source_error: Option<AirbyteTraceMessage>,
    destination_error: Option<AirbyteTraceMessage>,
    deltas: StateDeltaTracker,
    unreliable_committed_counts: bool,
    timings: StateMetricsTracker,
    unreliable_state_timing: bool,
}

/// Thread-safe message accounting for one replication attempt
pub struct MessageTracker {
    inner: Mutex<Inner>,
    log_messages: bool,
    clock: Clock,
    origin: Instant,
}

impl MessageTracker {
    pub fn new(state_tracker_memory_limit: usize, log_messages: bool) -> Self {
        let clock: Clock = Arc::new(Instant::now);
        let origin = clock();
        Self {
            inner: Mutex::new(Inner {
                stream_indexes: HashMap::new(),
                index_streams: Vec::new(),
                running_counts: BTreeMap::new(),
                emitted_records: HashMap::new(),
                emitted_bytes: HashMap::new(),
                estimate_type: None,
                record_estimates: HashMap::new(),
                byte_estimates: HashMap::new(),
                sync_record_estimate: None,
                sync_byte_estimate: None,
                source_states: StateAggregator::new(),
                destination_states: StateAggregator::new(),
                source_state_messages: 0,
                destination_state_messages: 0,
                source_stream_states: HashMap::new(),
                destination_stream_states: HashMap::new(),
                source_error: None,
                destination_error: None,
                deltas: StateDeltaTracker::new(state_tracker_memory_limit),
                unreliable_committed_counts: false,
                timings: StateMetricsTracker::new(DEFAULT_MAX_PENDING_STATES),
                unreliable_state_timing: false,
            }),
            log_messages,
            clock,
            origin,
        }
    }

    /// Measure checkpoint timing on `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.origin = clock();
        self.clock = clock;
        self
    }

    /// Cap on checkpoints awaiting acknowledgement before timing is given up
    pub fn with_max_pending_states(mut self, max_pending: usize) -> Self {
        self.inner.get_mut().timings = StateMetricsTracker::new(max_pending);
        self
    }

    fn now_ms(&self) -> u64 {
        let elapsed = (self.clock)().saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn accept_from_source(&self, message: &AirbyteMessage) {
        self.log_message(ConnectorSide::Source, message);
        let now = self.now_ms();
        let mut inner = self.inner.lock();
        match message.message_type {
            AirbyteMessageType::Record => {
                if let Some(record) = &message.record {
                    inner.handle_record(record);
                    inner.timings.record_received(now);
                }
            }
            AirbyteMessageType::State => {
                if let Some(state) = &message.state {
                    inner.handle_source_state(state, now);
                }
            }
            AirbyteMessageType::Trace => {
                if let Some(trace) = &message.trace {
                    inner.handle_trace(trace, ConnectorSide::Source);
                }
            }
            _ => {}
        }
    }

    pub fn accept_from_destination(&self, message: &AirbyteMessage) {
        self.log_message(ConnectorSide::Destination, message);
        let now = self.now_ms();
        let mut inner = self.inner.lock();
        match message.message_type {
            AirbyteMessageType::State => {
                if let Some(state) = &message.state {
                    inner.handle_destination_state(state, now);
                }
            }
            AirbyteMessageType::Trace => {
                if let Some(trace) = &message.trace {
                    inner.handle_trace(trace, ConnectorSide::Destination);
                }
            }
            _ => {}
        }
    }

    fn log_message(&self, side: ConnectorSide, message: &AirbyteMessage) {
        if self.log_messages {
            let json = serde_json::to_string(message).unwrap_or_default();
            info!(side = ?side, message = %json, "connector message");
        }
    }

    pub fn get_source_output_state(&self) -> Option<State> {
        self.inner.lock().source_states.get_aggregated()
    }

    pub fn get_destination_output_state(&self) -> Option<State> {
        self.inner.lock().destination_states.get_aggregated()
    }

    /// Records per stream covered by acknowledged checkpoints, `None` when unreliable
    pub fn get_stream_to_committed_records(&self) -> Option<HashMap<StreamPair, u64>> {
        let mut inner = self.inner.lock();
        if inner.unreliable_committed_counts {
            return None;
        }
        match inner.deltas.get_stream_index_to_total_record_count(true) {
            Ok(by_index) => Some(
                by_index
                    .into_iter()
                    .filter_map(|(index, count)| {
                        inner
                            .index_streams
                            .get(usize::from(index))
                            .map(|pair| (pair.clone(), count))
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "committed record counts are unavailable");
                inner.unreliable_committed_counts = true;
                None
            }
        }
    }

    pub fn get_stream_to_emitted_records(&self) -> HashMap<StreamPair, u64> {
        self.inner.lock().emitted_records.clone()
    }

    pub fn get_stream_to_emitted_bytes(&self) -> HashMap<StreamPair, u64> {
        self.inner.lock().emitted_bytes.clone()
    }

    pub fn get_stream_to_estimated_records(&self) -> HashMap<StreamPair, i64> {
        self.inner.lock().record_estimates.clone()
    }

    pub fn get_stream_to_estimated_bytes(&self) -> HashMap<StreamPair, i64> {
        self.inner.lock().byte_estimates.clone()
    }

    pub fn get_total_records_emitted(&self) -> u64 {
        self.inner.lock().emitted_records.values().sum()
    }

    pub fn get_total_bytes_emitted(&self) -> u64 {
        self.inner.lock().emitted_bytes.values().sum()
    }

    /// SYNC estimate if one was given, else the sum of STREAM estimates
    pub fn get_total_records_estimated(&self) -> Option<i64> {
        let inner = self.inner.lock();
        inner.sync_record_estimate.or_else(|| {
            (!inner.record_estimates.is_empty()).then(|| inner.record_estimates.values().sum())
        })
    }

    pub fn get_total_bytes_estimated(&self) -> Option<i64> {
        let inner = self.inner.lock();
        inner.sync_byte_estimate.or_else(|| {
            (!inner.byte_estimates.is_empty()).then(|| inner.byte_estimates.values().sum())
        })
    }

    pub fn get_total_records_committed(&self) -> Option<u64> {
        self.get_stream_to_committed_records()
            .map(|committed| committed.values().sum())
    }

    pub fn get_total_source_state_messages_emitted(&self) -> u64 {
        self.inner.lock().source_state_messages
    }

    pub fn get_total_destination_state_messages_emitted(&self) -> u64 {
        self.inner.lock().destination_state_messages
    }

    /// STATE messages per stream; a GLOBAL checkpoint counts once for every stream it covers
    pub fn get_stream_to_source_state_messages_emitted(&self) -> HashMap<StreamPair, u64> {
        self.inner.lock().source_stream_states.clone()
    }

    pub fn get_stream_to_destination_state_messages_emitted(&self) -> HashMap<StreamPair, u64> {
        self.inner.lock().destination_stream_states.clone()
    }

    pub fn get_max_seconds_to_receive_source_state(&self) -> Option<u64> {
        self.inner.lock().timings.max_seconds_to_receive_source_state()
    }

    pub fn get_mean_seconds_to_receive_source_state(&self) -> Option<u64> {
        self.inner.lock().timings.mean_seconds_to_receive_source_state()
    }

    /// `None` when timing became unreliable or nothing was acknowledged
    pub fn get_max_seconds_between_state_emitted_and_committed(&self) -> Option<u64> {
        let inner = self.inner.lock();
        if inner.unreliable_state_timing {
            return None;
        }
        inner.timings.max_seconds_to_commit_state()
    }

    pub fn get_mean_seconds_between_state_emitted_and_committed(&self) -> Option<u64> {
        let inner = self.inner.lock();
        if inner.unreliable_state_timing {
            return None;
        }
        inner.timings.mean_seconds_to_commit_state()
    }

    pub fn state_timing_metrics_unreliable(&self) -> bool {
        self.inner.lock().unreliable_state_timing
    }

    pub fn get_first_source_error_trace(&self) -> Option<AirbyteTraceMessage> {
        self.inner.lock().source_error.clone()
    }

    pub fn get_first_destination_error_trace(&self) -> Option<AirbyteTraceMessage> {
        self.inner.lock().destination_error.clone()
    }

    /// Failure derived from error traces; the earlier one wins when both sides emitted one
    pub fn error_trace_message_failure(&self, job_id: &str, attempt: u32) -> Option<FailureReason> {
        let inner = self.inner.lock();
        let (trace, origin) = match (&inner.source_error, &inner.destination_error) {
            (Some(src), Some(dst)) if src.emitted_at <= dst.emitted_at => (src, FailureOrigin::Source),
            (Some(_), Some(dst)) => (dst, FailureOrigin::Destination),
            (Some(src), None) => (src, FailureOrigin::Source),
            (None, Some(dst)) => (dst, FailureOrigin::Destination),
            (None, None) => return None,
        };
        Some(FailureReason::from_trace(trace, origin, job_id, attempt))
    }

    pub fn committed_counts_unreliable(&self) -> bool {
        self.inner.lock().unreliable_committed_counts
    }
}

impl Inner {
    fn stream_index(&mut self, pair: &StreamPair) -> Option<u16> {
        if let Some(&index) = self.stream_indexes.get(pair) {
            return Some(index);
        }
        let index = u16::try_from(self.index_streams.len()).ok()?;
        self.stream_indexes.insert(pair.clone(), index);
        self.index_streams.push(pair.clone());
        Some(index)
    }

    fn handle_record(&mut self, record: &AirbyteRecordMessage) {
        let pair = StreamPair::from_record(record);
        match self.stream_index(&pair) {
            Some(index) => *self.running_counts.entry(index).or_insert(0) += 1,
            None => self.mark_unreliable("too many streams to index"),
        }
        *self.emitted_records.entry(pair.clone()).or_insert(0) += 1;
        *self.emitted_bytes.entry(pair).or_insert(0) += estimated_json_size(&record.data);
    }

    fn handle_source_state(&mut self, state: &AirbyteStateMessage, now_ms: u64) {
        if let Err(e) = self.source_states.ingest(state) {
            warn!(error = %e, "could not aggregate source state");
        }
        self.source_state_messages += 1;
        count_per_stream(&mut self.source_stream_states, state);

        let hash = state_hash(state);
        let counts = std::mem::take(&mut self.running_counts);
        if !self.unreliable_committed_counts {
            if let Err(e) = self.deltas.add_state(hash, &counts) {
                self.mark_unreliable(&e.to_string());
            }
        }

        self.timings.state_received(now_ms);
        if !self.unreliable_state_timing {
            if let Err(e) = self.timings.add_state(checkpoint_key(state), hash, now_ms) {
                self.mark_state_timing_unreliable(&e.to_string());
            }
        }
    }

    fn handle_destination_state(&mut self, state: &AirbyteStateMessage, now_ms: u64) {
        if let Err(e) = self.destination_states.ingest(state) {
            warn!(error = %e, "could not aggregate destination state");
        }
        self.destination_state_messages += 1;
        count_per_stream(&mut self.destination_stream_states, state);

        let hash = state_hash(state);
        if !self.unreliable_committed_counts {
            if let Err(e) = self.deltas.commit_state_hash(hash) {
                self.mark_unreliable(&e.to_string());
            }
        }
        if !self.unreliable_state_timing {
            if let Err(e) = self.timings.commit_state(&checkpoint_key(state), hash, now_ms) {
                self.mark_state_timing_unreliable(&e.to_string());
            }
        }
    }

    fn handle_trace(&mut self, trace: &AirbyteTraceMessage, side: ConnectorSide) {
        match trace.trace_type {
            TraceType::Error => {
                let slot = match side {
                    ConnectorSide::Source => &mut self.source_error,
                    ConnectorSide::Destination => &mut self.destination_error,
                };
                if slot.is_none() {
                    *slot = Some(trace.clone());
                }
            }
            TraceType::Estimate => {
                if let Some(estimate) = &trace.estimate {
                    self.handle_estimate(estimate);
                }
            }
        }
    }

    fn handle_estimate(&mut self, estimate: &AirbyteEstimateTraceMessage) {
        if let Some(current) = self.estimate_type {
            if current != estimate.estimate_type {
                warn!(
                    current = ?current,
                    received = ?estimate.estimate_type,
                    "STREAM and SYNC estimates should not be emitted in the same sync, ignoring"
                );
                return;
            }
        }
        self.estimate_type = Some(estimate.estimate_type);

        match estimate.estimate_type {
            EstimateType::Stream => {
                let pair = StreamPair::new(estimate.name.clone(), estimate.namespace.clone());
                if let Some(rows) = estimate.row_estimate {
                    self.record_estimates.insert(pair.clone(), rows);
                }
                if let Some(bytes) = estimate.byte_estimate {
                    self.byte_estimates.insert(pair, bytes);
                }
            }
            EstimateType::Sync => {
                if estimate.row_estimate.is_some() {
                    self.sync_record_estimate = estimate.row_estimate;
                }
                if estimate.byte_estimate.is_some() {
                    self.sync_byte_estimate = estimate.byte_estimate;
                }
            }
        }
    }

    fn mark_unreliable(&mut self, reason: &str) {
        if !self.unreliable_committed_counts {
            warn!(reason, "committed record counts are no longer tracked for this attempt");
        }
        self.unreliable_committed_counts = true;
    }

    fn mark_state_timing_unreliable(&mut self, reason: &str) {
        if !self.unreliable_state_timing {
            warn!(reason, "checkpoint commit timing is no longer tracked for this attempt");
        }
        self.unreliable_state_timing = true;
    }
}

impl std::fmt::Debug for MessageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTracker")
            .field("inner", &*self.inner.lock())
            .field("log_messages", &self.log_messages)
            .finish()
    }
}

fn checkpoint_key(state: &AirbyteStateMessage) -> CheckpointKey {
    match state.effective_type() {
        AirbyteStateType::Stream => state.stream.as_ref().map(|s| s.stream_descriptor.clone()),
        AirbyteStateType::Global | AirbyteStateType::Legacy => None,
    }
}

fn count_per_stream(counts: &mut HashMap<StreamPair, u64>, state: &AirbyteStateMessage) {
    match state.effective_type() {
        AirbyteStateType::Stream => {
            if let Some(stream) = &state.stream {
                *counts
                    .entry(StreamPair::from_descriptor(&stream.stream_descriptor))
                    .or_insert(0) += 1;
            }
        }
        AirbyteStateType::Global => {
            for stream in state.global.iter().flat_map(|g| &g.stream_states) {
                *counts
                    .entry(StreamPair::from_descriptor(&stream.stream_descriptor))
                    .or_insert(0) += 1;
            }
        }
        AirbyteStateType::Legacy => {}
    }
}

/// 32-bit hash identifying a checkpoint on both sides of the pipe
pub fn state_hash(state: &AirbyteStateMessage) -> u32 {
    let payload = match state.effective_type() {
        AirbyteStateType::Global => serde_json::to_vec(&state.global),
        AirbyteStateType::Stream => serde_json::to_vec(&state.stream),
        AirbyteStateType::Legacy => serde_json::to_vec(&state.data),
    }
    .unwrap_or_default();
    xxh3_64(&payload) as u32
}

/// Size `value` would take as compact JSON, computed without serializing
pub fn estimated_json_size(value: &Value) -> u64 {
    match value {
        Value::Null => 4,
        Value::Bool(true) => 4,
        Value::Bool(false) => 5,
        Value::Number(n) => n.to_string().len() as u64,
        Value::String(s) => s.len() as u64 + 2,
        Value::Array(items) => {
            let separators = items.len().saturating_sub(1) as u64;
            2 + separators + items.iter().map(estimated_json_size).sum::<u64>()
        }
        Value::Object(map) => {
            let separators = map.len().saturating_sub(1) as u64;
            2 + separators
                + map
                    .iter()
                    .map(|(k, v)| k.len() as u64 + 3 + estimated_json_size(v))
                    .sum::<u64>()
        }
    }
}
