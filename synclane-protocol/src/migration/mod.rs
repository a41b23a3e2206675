//! Protocol migrations
//!
//! A migration is one edge between two adjacent major versions. Edges are
//! written against concrete types ([`MessageMigration`], [`CatalogMigration`])
//! and stored type-erased inside a [`MigrationContainer`], which walks them in
//! order to upgrade or downgrade a value across several majors.

mod catalog;
mod container;
mod message;
pub mod v1;

pub use catalog::ConfiguredAirbyteCatalogMigrator;
pub use container::MigrationContainer;
pub use message::AirbyteMessageMigrator;

use crate::models::ConfiguredAirbyteCatalog;
use crate::{Error, Result, Version};
use std::any::{Any, type_name};

/// Type-erased value flowing through a migration chain
pub type AnyValue = Box<dyn Any + Send>;

/// Version metadata shared by every migration edge
pub trait Migration: Send + Sync + 'static {
    /// Version the edge upgrades from
    fn previous_version(&self) -> &Version;

    /// Version the edge upgrades to; its major must be `previous.major + 1`
    fn current_version(&self) -> &Version;
}

/// Edge converting a message between two adjacent majors
///
/// The catalog passed to both directions is the current-major configured
/// catalog, when one is available. Record downgrades need it to know which
/// positions were numeric in the older representation.
pub trait MessageMigration: Migration {
    type Previous: Send + 'static;
    type Current: Send + 'static;

    fn upgrade(
        &self,
        message: Self::Previous,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<Self::Current>;

    fn downgrade(
        &self,
        message: Self::Current,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<Self::Previous>;
}

/// Edge converting a configured catalog between two adjacent majors
pub trait CatalogMigration: Migration {
    type Previous: Send + 'static;
    type Current: Send + 'static;

    fn upgrade(&self, catalog: Self::Previous) -> Result<Self::Current>;

    fn downgrade(&self, catalog: Self::Current) -> Result<Self::Previous>;
}

/// Object-safe view of an edge, as stored by [`MigrationContainer`]
pub(crate) trait ErasedMigration: Send + Sync {
    fn previous_version(&self) -> &Version;
    fn current_version(&self) -> &Version;
    fn upgrade_any(
        &self,
        value: AnyValue,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue>;
    fn downgrade_any(
        &self,
        value: AnyValue,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue>;
}

pub(crate) struct MessageEdge<M>(pub M);

impl<M: MessageMigration> ErasedMigration for MessageEdge<M> {
    fn previous_version(&self) -> &Version {
        self.0.previous_version()
    }

    fn current_version(&self) -> &Version {
        self.0.current_version()
    }

    fn upgrade_any(
        &self,
        value: AnyValue,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        let message = downcast::<M::Previous>(value)?;
        Ok(Box::new(self.0.upgrade(message, catalog)?))
    }

    fn downgrade_any(
        &self,
        value: AnyValue,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        let message = downcast::<M::Current>(value)?;
        Ok(Box::new(self.0.downgrade(message, catalog)?))
    }
}

pub(crate) struct CatalogEdge<C>(pub C);

impl<C: CatalogMigration> ErasedMigration for CatalogEdge<C> {
    fn previous_version(&self) -> &Version {
        self.0.previous_version()
    }

    fn current_version(&self) -> &Version {
        self.0.current_version()
    }

    fn upgrade_any(
        &self,
        value: AnyValue,
        _catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        let catalog = downcast::<C::Previous>(value)?;
        Ok(Box::new(self.0.upgrade(catalog)?))
    }

    fn downgrade_any(
        &self,
        value: AnyValue,
        _catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        let catalog = downcast::<C::Current>(value)?;
        Ok(Box::new(self.0.downgrade(catalog)?))
    }
}

/// Recover a concrete value from the erased chain representation
pub fn downcast<T: 'static>(value: AnyValue) -> Result<T> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| Error::TypeMismatch {
            expected: type_name::<T>(),
        })
}
