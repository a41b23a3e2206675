//! Connector-requested configuration updates
//!
//! A connector may emit a CONNECTOR_CONFIG control message, for example after
//! rotating an OAuth refresh token. The pumps hand the new configuration to a
//! [`ConnectorConfigUpdater`]; failures are logged and never fail the sync.

use crate::Result;
use serde_json::Value;
use synclane_protocol::models::{AirbyteControlMessage, ControlType};
use tracing::info;
use uuid::Uuid;

/// Persists replacement connector configurations
pub trait ConnectorConfigUpdater: Send + Sync {
    fn update_source(&self, source_id: Option<Uuid>, config: &Value) -> Result<()>;

    fn update_destination(&self, destination_id: Option<Uuid>, config: &Value) -> Result<()>;
}

/// Logs requested updates and keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingConfigUpdater;

impl ConnectorConfigUpdater for LoggingConfigUpdater {
    fn update_source(&self, source_id: Option<Uuid>, _config: &Value) -> Result<()> {
        info!(source_id = ?source_id, "source requested a configuration update, not persisted");
        Ok(())
    }

    fn update_destination(&self, destination_id: Option<Uuid>, _config: &Value) -> Result<()> {
        info!(destination_id = ?destination_id, "destination requested a configuration update, not persisted");
        Ok(())
    }
}

/// The configuration carried by a CONNECTOR_CONFIG control message
pub fn requested_config(control: &AirbyteControlMessage) -> Option<&Value> {
    match control.control_type {
        ControlType::ConnectorConfig => control.connector_config.as_ref().map(|c| &c.config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synclane_protocol::models::AirbyteMessage;

    #[test]
    fn test_requested_config() {
        let message = AirbyteMessage::connector_config(json!({"token": "new"}), 10.0);
        let control = message.control.as_ref().unwrap();
        assert_eq!(requested_config(control), Some(&json!({"token": "new"})));

        let empty = AirbyteControlMessage {
            control_type: ControlType::ConnectorConfig,
            emitted_at: 1.0,
            connector_config: None,
        };
        assert_eq!(requested_config(&empty), None);
    }

    #[test]
    fn test_control_message_wire_format() {
        let message = AirbyteMessage::connector_config(json!({"token": "new"}), 10.0);
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["type"], "CONTROL");
        assert_eq!(encoded["control"]["type"], "CONNECTOR_CONFIG");
        assert_eq!(encoded["control"]["connectorConfig"]["config"]["token"], "new");
    }
}
