//! Folding STATE messages into the checkpoint handed to the next attempt

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use synclane_protocol::models::{AirbyteStateMessage, AirbyteStateType, StreamDescriptor};

/// Opaque connection state as persisted between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state: Value,
}

/// Latest state per stream (STREAM) or latest state overall (LEGACY/GLOBAL)
#[derive(Debug, Default)]
pub struct StateAggregator {
    kind: Option<AirbyteStateType>,
    single: Option<AirbyteStateMessage>,
    streams: BTreeMap<StreamDescriptor, AirbyteStateMessage>,
}

impl StateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, message: &AirbyteStateMessage) -> Result<()> {
        let kind = message.effective_type();
        if let Some(current) = self.kind {
            let per_stream = |t: AirbyteStateType| t == AirbyteStateType::Stream;
            if per_stream(current) != per_stream(kind) {
                return Err(Error::state_tracker(format!(
                    "state of type {kind:?} cannot follow state of type {current:?}"
                )));
            }
        }
        self.kind = Some(kind);

        match kind {
            AirbyteStateType::Stream => {
                let descriptor = message
                    .stream
                    .as_ref()
                    .map(|s| s.stream_descriptor.clone())
                    .ok_or_else(|| Error::state_tracker("STREAM state without a stream descriptor"))?;
                self.streams.insert(descriptor, message.clone());
            }
            AirbyteStateType::Legacy | AirbyteStateType::Global => {
                self.single = Some(message.clone());
            }
        }
        Ok(())
    }

    /// Aggregated state, `None` until something was ingested
    ///
    /// LEGACY yields the raw `data` blob; GLOBAL and STREAM yield the list of
    /// state messages.
    pub fn get_aggregated(&self) -> Option<State> {
        match self.kind? {
            AirbyteStateType::Stream => {
                let messages: Vec<&AirbyteStateMessage> = self.streams.values().collect();
                serde_json::to_value(messages).ok().map(|state| State { state })
            }
            AirbyteStateType::Legacy => {
                let message = self.single.as_ref()?;
                Some(State {
                    state: message.data.clone().unwrap_or(Value::Null),
                })
            }
            AirbyteStateType::Global => {
                let message = self.single.as_ref()?;
                serde_json::to_value([message]).ok().map(|state| State { state })
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synclane_protocol::models::AirbyteGlobalState;

    fn stream_state(name: &str, cursor: i64) -> AirbyteStateMessage {
        AirbyteStateMessage::stream(
            StreamDescriptor {
                name: name.into(),
                namespace: None,
            },
            json!({"cursor": cursor}),
        )
    }

    #[test]
    fn test_legacy_keeps_latest_blob() {
        let mut aggregator = StateAggregator::new();
        assert!(aggregator.get_aggregated().is_none());

        let first = AirbyteStateMessage::legacy(json!({"cursor": 1}));
        let mut second = AirbyteStateMessage::legacy(json!({"cursor": 2}));
        second.state_type = None;
        aggregator.ingest(&first).unwrap();
        aggregator.ingest(&second).unwrap();

        assert_eq!(aggregator.get_aggregated().unwrap().state, json!({"cursor": 2}));
    }

    #[test]
    fn test_stream_states_are_kept_per_descriptor() {
        let mut aggregator = StateAggregator::new();
        aggregator.ingest(&stream_state("users", 1)).unwrap();
        aggregator.ingest(&stream_state("orders", 4)).unwrap();
        aggregator.ingest(&stream_state("users", 2)).unwrap();

        let state = aggregator.get_aggregated().unwrap().state;
        let list = state.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["stream"]["stream_descriptor"]["name"], "orders");
        assert_eq!(list[1]["stream"]["stream_state"], json!({"cursor": 2}));
    }

    #[test]
    fn test_global_keeps_latest() {
        let mut aggregator = StateAggregator::new();
        for cursor in [1, 2] {
            aggregator
                .ingest(&AirbyteStateMessage::global(AirbyteGlobalState {
                    shared_state: Some(json!({"lsn": cursor})),
                    stream_states: vec![],
                }))
                .unwrap();
        }
        let state = aggregator.get_aggregated().unwrap().state;
        assert_eq!(state[0]["global"]["shared_state"], json!({"lsn": 2}));
    }

    #[test]
    fn test_mixing_stream_with_global_fails() {
        let mut aggregator = StateAggregator::new();
        aggregator.ingest(&stream_state("users", 1)).unwrap();
        let global = AirbyteStateMessage::global(AirbyteGlobalState {
            shared_state: None,
            stream_states: vec![],
        });
        assert!(aggregator.ingest(&global).is_err());
    }
}
