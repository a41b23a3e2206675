//! Record and checkpoint accounting

pub mod message_tracker;
pub mod state_aggregator;
pub mod state_delta_tracker;
pub mod state_metrics_tracker;

pub use message_tracker::{ConnectorSide, MessageTracker, estimated_json_size, state_hash};
pub use state_aggregator::{State, StateAggregator};
pub use state_delta_tracker::StateDeltaTracker;
pub use state_metrics_tracker::StateMetricsTracker;
