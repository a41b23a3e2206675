//! Process-wide protocol wiring
//!
//! Built once at startup, then shared read-only (usually behind an `Arc`).

use crate::codec::SerDeProvider;
use crate::factory::{VersionedMigrator, VersionedMigratorFactory};
use crate::migration::v1::{AirbyteMessageMigrationV1, ConfiguredAirbyteCatalogMigrationV1};
use crate::migration::{AirbyteMessageMigrator, ConfiguredAirbyteCatalogMigrator, downcast};
use crate::models::{ConfiguredAirbyteCatalog, v0};
use crate::reader::VersionedMessageReader;
use crate::validation::{JsonSchemaProtocolValidator, ProtocolValidator};
use crate::writer::VersionedMessageWriter;
use crate::{Error, Result, Version};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::info;

/// Serdes, migration chains and the envelope validator
#[derive(Clone)]
pub struct ProtocolRegistry {
    serde: Arc<SerDeProvider>,
    migrators: VersionedMigratorFactory,
    validator: Arc<dyn ProtocolValidator>,
}

impl ProtocolRegistry {
    pub fn new(
        serde: SerDeProvider,
        messages: AirbyteMessageMigrator,
        catalogs: ConfiguredAirbyteCatalogMigrator,
        validator: Arc<dyn ProtocolValidator>,
    ) -> Self {
        Self {
            serde: Arc::new(serde),
            migrators: VersionedMigratorFactory::new(Arc::new(messages), Arc::new(catalogs)),
            validator,
        }
    }

    /// Registry for every major this crate ships: 0 and 1
    pub fn standard() -> Result<Self> {
        let mut messages = AirbyteMessageMigrator::new();
        messages.register(AirbyteMessageMigrationV1::new())?;
        messages.initialize()?;

        let mut catalogs = ConfiguredAirbyteCatalogMigrator::new();
        catalogs.register(ConfiguredAirbyteCatalogMigrationV1::new())?;
        catalogs.initialize()?;

        let serde = SerDeProvider::with_defaults()?;
        let validator = Arc::new(JsonSchemaProtocolValidator::new()?);

        info!(
            migrations = ?messages.migration_keys()?,
            serdes = ?serde.deserializer_keys(),
            "protocol registry initialized"
        );
        Ok(Self::new(serde, messages, catalogs, validator))
    }

    pub fn serde(&self) -> &Arc<SerDeProvider> {
        &self.serde
    }

    pub fn migrators(&self) -> &VersionedMigratorFactory {
        &self.migrators
    }

    pub fn validator(&self) -> &Arc<dyn ProtocolValidator> {
        &self.validator
    }

    pub fn most_recent_version(&self) -> Result<Version> {
        self.migrators.most_recent_version()
    }

    pub fn migrator(&self, version: &Version) -> VersionedMigrator {
        self.migrators.get_versioned_migrator(version)
    }

    /// Reader yielding newest-major messages from a connector emitting `version`
    pub fn reader<R: BufRead>(
        &self,
        input: R,
        version: &Version,
        catalog: Option<ConfiguredAirbyteCatalog>,
    ) -> VersionedMessageReader<R> {
        VersionedMessageReader::new(
            input,
            Arc::clone(&self.serde),
            self.migrators.clone(),
            Arc::clone(&self.validator),
            version.clone(),
            catalog,
        )
    }

    /// Writer emitting `version`'s representation of newest-major messages
    pub fn writer<W: Write>(
        &self,
        output: W,
        version: &Version,
        catalog: Option<ConfiguredAirbyteCatalog>,
    ) -> Result<VersionedMessageWriter<W>> {
        let serializer = self
            .serde
            .get_serializer(version)
            .ok_or_else(|| Error::unsupported(format!("no serializer for {version}")))?;
        Ok(VersionedMessageWriter::new(
            output,
            serializer,
            self.migrator(version),
            catalog,
        ))
    }

    /// Newest-major catalog rendered as JSON for a connector speaking `version`
    pub fn catalog_for_version(
        &self,
        catalog: &ConfiguredAirbyteCatalog,
        version: &Version,
    ) -> Result<Value> {
        let downgraded = self.migrator(version).downgrade_catalog(catalog.clone())?;
        if downgraded.is::<v0::ConfiguredAirbyteCatalog>() {
            let legacy: v0::ConfiguredAirbyteCatalog = downcast(downgraded)?;
            return Ok(serde_json::to_value(legacy)?);
        }
        let current: ConfiguredAirbyteCatalog = downcast(downgraded)?;
        Ok(serde_json::to_value(current)?)
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("serde", &self.serde)
            .field("migrators", &self.migrators)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AirbyteStream, ConfiguredAirbyteStream};
    use serde_json::json;

    #[test]
    fn test_standard_registry() {
        let registry = ProtocolRegistry::standard().unwrap();
        assert_eq!(registry.most_recent_version().unwrap(), Version::new(1, 0, 0));
        assert_eq!(
            registry.migrators().most_recent_version().unwrap().major(),
            1
        );
    }

    #[test]
    fn test_catalog_for_legacy_connector() {
        let registry = ProtocolRegistry::standard().unwrap();
        let catalog = ConfiguredAirbyteCatalog {
            streams: vec![ConfiguredAirbyteStream::full_refresh(AirbyteStream::new(
                "users",
                json!({"type": "object", "properties": {"id": {"$ref": "WellKnownTypes.json#/definitions/Integer"}}}),
            ))],
        };

        let legacy = registry
            .catalog_for_version(&catalog, &Version::new(0, 2, 0))
            .unwrap();
        assert_eq!(
            legacy["streams"][0]["stream"]["json_schema"]["properties"]["id"],
            json!({"type": "number", "airbyte_type": "integer"})
        );

        let current = registry
            .catalog_for_version(&catalog, &Version::new(1, 0, 0))
            .unwrap();
        assert_eq!(current, serde_json::to_value(&catalog).unwrap());
    }
}
