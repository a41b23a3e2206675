//! Major 0 to major 1
//!
//! Major 1 replaces inline primitive schema declarations with references into
//! `WellKnownTypes.json` and carries every numeric record value as a string.

pub mod record;
pub mod schema;

pub use record::{downgrade_record_data, upgrade_record_data};
pub use schema::{WellKnownType, downgrade_schema, upgrade_schema};

use crate::migration::{CatalogMigration, MessageMigration, Migration};
use crate::models::{self, AirbyteMessageType, ConfiguredAirbyteCatalog, v0};
use crate::{Result, Version};
use tracing::trace;

pub const PREVIOUS_VERSION: Version = Version::new(0, 3, 0);
pub const CURRENT_VERSION: Version = Version::new(1, 0, 0);

/// Message edge between majors 0 and 1
#[derive(Debug, Clone)]
pub struct AirbyteMessageMigrationV1 {
    previous: Version,
    current: Version,
}

impl Default for AirbyteMessageMigrationV1 {
    fn default() -> Self {
        Self {
            previous: PREVIOUS_VERSION,
            current: CURRENT_VERSION,
        }
    }
}

impl AirbyteMessageMigrationV1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Migration for AirbyteMessageMigrationV1 {
    fn previous_version(&self) -> &Version {
        &self.previous
    }

    fn current_version(&self) -> &Version {
        &self.current
    }
}

impl MessageMigration for AirbyteMessageMigrationV1 {
    type Previous = v0::AirbyteMessage;
    type Current = models::AirbyteMessage;

    fn upgrade(
        &self,
        message: v0::AirbyteMessage,
        _catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<models::AirbyteMessage> {
        let mut message = message.into_inner();
        match message.message_type {
            AirbyteMessageType::Catalog => {
                if let Some(catalog) = message.catalog.as_mut() {
                    for stream in &mut catalog.streams {
                        upgrade_schema(&mut stream.json_schema);
                    }
                }
            }
            AirbyteMessageType::Record => {
                if let Some(record) = message.record.as_mut() {
                    upgrade_record_data(&mut record.data);
                }
            }
            _ => {}
        }
        Ok(message)
    }

    fn downgrade(
        &self,
        message: models::AirbyteMessage,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<v0::AirbyteMessage> {
        let mut message = message;
        match message.message_type {
            AirbyteMessageType::Catalog => {
                if let Some(catalog) = message.catalog.as_mut() {
                    for stream in &mut catalog.streams {
                        downgrade_schema(&mut stream.json_schema);
                    }
                }
            }
            AirbyteMessageType::Record => {
                if let Some(record) = message.record.as_mut() {
                    let stream = catalog.and_then(|c| {
                        c.find_stream(&record.stream, record.namespace.as_deref())
                    });
                    match stream {
                        Some(configured) => {
                            downgrade_record_data(&mut record.data, &configured.stream.json_schema)
                        }
                        None => trace!(
                            stream = %record.stream,
                            "no configured stream for record, data left as is"
                        ),
                    }
                }
            }
            _ => {}
        }
        Ok(v0::AirbyteMessage(message))
    }
}

/// Configured catalog edge between majors 0 and 1
#[derive(Debug, Clone)]
pub struct ConfiguredAirbyteCatalogMigrationV1 {
    previous: Version,
    current: Version,
}

impl Default for ConfiguredAirbyteCatalogMigrationV1 {
    fn default() -> Self {
        Self {
            previous: PREVIOUS_VERSION,
            current: CURRENT_VERSION,
        }
    }
}

impl ConfiguredAirbyteCatalogMigrationV1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Migration for ConfiguredAirbyteCatalogMigrationV1 {
    fn previous_version(&self) -> &Version {
        &self.previous
    }

    fn current_version(&self) -> &Version {
        &self.current
    }
}

impl CatalogMigration for ConfiguredAirbyteCatalogMigrationV1 {
    type Previous = v0::ConfiguredAirbyteCatalog;
    type Current = ConfiguredAirbyteCatalog;

    fn upgrade(&self, catalog: v0::ConfiguredAirbyteCatalog) -> Result<ConfiguredAirbyteCatalog> {
        let mut catalog = catalog.into_inner();
        for configured in &mut catalog.streams {
            upgrade_schema(&mut configured.stream.json_schema);
        }
        Ok(catalog)
    }

    fn downgrade(&self, catalog: ConfiguredAirbyteCatalog) -> Result<v0::ConfiguredAirbyteCatalog> {
        let mut catalog = catalog;
        for configured in &mut catalog.streams {
            downgrade_schema(&mut configured.stream.json_schema);
        }
        Ok(v0::ConfiguredAirbyteCatalog(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AirbyteCatalog, AirbyteMessage, AirbyteStream, ConfiguredAirbyteStream};
    use serde_json::json;

    #[test]
    fn test_version_metadata() {
        let migration = AirbyteMessageMigrationV1::new();
        assert_eq!(migration.previous_version(), &Version::new(0, 3, 0));
        assert_eq!(migration.current_version(), &Version::new(1, 0, 0));
    }

    #[test]
    fn test_record_upgrade() {
        let old = v0::AirbyteMessage(AirbyteMessage::record("s", None, json!({"id": 42})));
        let upgraded = AirbyteMessageMigrationV1::new().upgrade(old, None).unwrap();
        assert_eq!(upgraded.record.unwrap().data, json!({"id": "42"}));
    }

    #[test]
    fn test_catalog_message_upgrade() {
        let catalog = AirbyteCatalog {
            streams: vec![AirbyteStream::new("s", json!({"type": "string"}))],
        };
        let old = v0::AirbyteMessage(AirbyteMessage::catalog(catalog));
        let upgraded = AirbyteMessageMigrationV1::new().upgrade(old, None).unwrap();
        assert_eq!(
            upgraded.catalog.unwrap().streams[0].json_schema,
            json!({"$ref": "WellKnownTypes.json#/definitions/String"})
        );
    }

    #[test]
    fn test_record_downgrade_uses_catalog() {
        let mut stream = AirbyteStream::new(
            "foo_stream",
            json!({"$ref": "WellKnownTypes.json#/definitions/Integer"}),
        );
        stream.namespace = Some("foo_namespace".into());
        let catalog = ConfiguredAirbyteCatalog {
            streams: vec![ConfiguredAirbyteStream::full_refresh(stream)],
        };
        let message = AirbyteMessage::record("foo_stream", Some("foo_namespace".into()), json!("42"));

        let migration = AirbyteMessageMigrationV1::new();
        let downgraded = migration.downgrade(message.clone(), Some(&catalog)).unwrap();
        assert_eq!(downgraded.0.record.unwrap().data, json!(42));

        let untouched = migration.downgrade(message, None).unwrap();
        assert_eq!(untouched.0.record.unwrap().data, json!("42"));
    }

    #[test]
    fn test_configured_catalog_round_trip() {
        let schema = json!({
            "type": "object",
            "properties": {"id": {"type": "number", "airbyte_type": "integer"}}
        });
        let catalog = ConfiguredAirbyteCatalog {
            streams: vec![ConfiguredAirbyteStream::full_refresh(AirbyteStream::new(
                "users",
                schema.clone(),
            ))],
        };
        let migration = ConfiguredAirbyteCatalogMigrationV1::new();
        let upgraded = migration.upgrade(v0::ConfiguredAirbyteCatalog(catalog.clone())).unwrap();
        assert_eq!(
            upgraded.streams[0].stream.json_schema["properties"]["id"],
            json!({"$ref": "WellKnownTypes.json#/definitions/Integer"})
        );
        let back = migration.downgrade(upgraded).unwrap();
        assert_eq!(back.0, catalog);
    }
}
