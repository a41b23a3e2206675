use super::{AnyValue, CatalogEdge, CatalogMigration, MigrationContainer, downcast};
use crate::{Result, Version};

/// Chain of [`CatalogMigration`] edges
#[derive(Debug)]
pub struct ConfiguredAirbyteCatalogMigrator {
    container: MigrationContainer,
}

impl Default for ConfiguredAirbyteCatalogMigrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfiguredAirbyteCatalogMigrator {
    pub fn new() -> Self {
        Self {
            container: MigrationContainer::new("catalog migration"),
        }
    }

    pub fn register<C: CatalogMigration>(&mut self, migration: C) -> Result<&mut Self> {
        self.container.register(Box::new(CatalogEdge(migration)))?;
        Ok(self)
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.container.initialize()
    }

    pub fn most_recent_version(&self) -> Result<&Version> {
        self.container.most_recent_version()
    }

    pub fn migration_keys(&self) -> Result<Vec<String>> {
        self.container.migration_keys()
    }

    pub fn upgrade<P: Send + 'static, C: 'static>(&self, catalog: P, from: &Version) -> Result<C> {
        downcast(self.upgrade_any(Box::new(catalog), from)?)
    }

    pub fn downgrade<C: Send + 'static, P: 'static>(&self, catalog: C, to: &Version) -> Result<P> {
        downcast(self.downgrade_any(Box::new(catalog), to)?)
    }

    pub fn upgrade_any(&self, catalog: AnyValue, from: &Version) -> Result<AnyValue> {
        self.container.upgrade(catalog, from, None)
    }

    pub fn downgrade_any(&self, catalog: AnyValue, to: &Version) -> Result<AnyValue> {
        self.container.downgrade(catalog, to, None)
    }
}
