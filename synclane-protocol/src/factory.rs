//! Binding of the message and catalog chains to one connector version

use crate::migration::{
    AirbyteMessageMigrator, AnyValue, ConfiguredAirbyteCatalogMigrator, downcast,
};
use crate::models::{AirbyteMessage, ConfiguredAirbyteCatalog};
use crate::{Result, Version};
use std::sync::Arc;

/// Hands out [`VersionedMigrator`]s sharing one pair of initialized chains
#[derive(Debug, Clone)]
pub struct VersionedMigratorFactory {
    messages: Arc<AirbyteMessageMigrator>,
    catalogs: Arc<ConfiguredAirbyteCatalogMigrator>,
}

impl VersionedMigratorFactory {
    pub fn new(
        messages: Arc<AirbyteMessageMigrator>,
        catalogs: Arc<ConfiguredAirbyteCatalogMigrator>,
    ) -> Self {
        Self { messages, catalogs }
    }

    /// Migrator converting between `version` and the newest major
    pub fn get_versioned_migrator(&self, version: &Version) -> VersionedMigrator {
        VersionedMigrator {
            messages: Arc::clone(&self.messages),
            catalogs: Arc::clone(&self.catalogs),
            version: version.clone(),
        }
    }

    pub fn most_recent_version(&self) -> Result<Version> {
        self.messages.most_recent_version().cloned()
    }
}

/// Message and catalog migrations for one connector version
///
/// Both travel together because record migrations may need the catalog that
/// describes them.
#[derive(Debug, Clone)]
pub struct VersionedMigrator {
    messages: Arc<AirbyteMessageMigrator>,
    catalogs: Arc<ConfiguredAirbyteCatalogMigrator>,
    version: Version,
}

impl VersionedMigrator {
    /// The connector version this migrator converts from and to
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Upgrade a message decoded at this version to the newest major
    pub fn upgrade(
        &self,
        message: AnyValue,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AirbyteMessage> {
        downcast(self.messages.upgrade_any(message, &self.version, catalog)?)
    }

    /// Downgrade a newest-major message to this version's representation
    pub fn downgrade(
        &self,
        message: AirbyteMessage,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        self.messages
            .downgrade_any(Box::new(message), &self.version, catalog)
    }

    pub fn upgrade_catalog(&self, catalog: AnyValue) -> Result<ConfiguredAirbyteCatalog> {
        downcast(self.catalogs.upgrade_any(catalog, &self.version)?)
    }

    pub fn downgrade_catalog(&self, catalog: ConfiguredAirbyteCatalog) -> Result<AnyValue> {
        self.catalogs.downgrade_any(Box::new(catalog), &self.version)
    }
}
