use super::{AnyValue, MessageEdge, MessageMigration, MigrationContainer, downcast};
use crate::models::ConfiguredAirbyteCatalog;
use crate::{Result, Version};

/// Chain of [`MessageMigration`] edges
#[derive(Debug)]
pub struct AirbyteMessageMigrator {
    container: MigrationContainer,
}

impl Default for AirbyteMessageMigrator {
    fn default() -> Self {
        Self::new()
    }
}

impl AirbyteMessageMigrator {
    pub fn new() -> Self {
        Self {
            container: MigrationContainer::new("message migration"),
        }
    }

    /// Add an edge; collisions are reported by [`initialize`](Self::initialize)
    pub fn register<M: MessageMigration>(&mut self, migration: M) -> Result<&mut Self> {
        self.container.register(Box::new(MessageEdge(migration)))?;
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

    /// Upgrade a message of type `P` emitted at `from` to the newest major's type `C`
    pub fn upgrade<P: Send + 'static, C: 'static>(
        &self,
        message: P,
        from: &Version,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<C> {
        downcast(self.upgrade_any(Box::new(message), from, catalog)?)
    }

    /// Downgrade a newest-major message of type `C` to `to`'s type `P`
    pub fn downgrade<C: Send + 'static, P: 'static>(
        &self,
        message: C,
        to: &Version,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<P> {
        downcast(self.downgrade_any(Box::new(message), to, catalog)?)
    }

    pub fn upgrade_any(
        &self,
        message: AnyValue,
        from: &Version,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        self.container.upgrade(message, from, catalog)
    }

    pub fn downgrade_any(
        &self,
        message: AnyValue,
        to: &Version,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        self.container.downgrade(message, to, catalog)
    }
}
