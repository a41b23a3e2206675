//! Major-0 protocol models
//!
//! Major 0 shares the envelope shape of the current major but not its
//! semantics: numbers travel as JSON numbers and stream schemas use inline
//! primitive `type` declarations instead of `WellKnownTypes` references.
//! The wrappers keep the two majors apart in the type system so a migration
//! edge can only be fed the representation it was written for.

use serde::{Deserialize, Serialize};

/// Major-0 message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AirbyteMessage(pub super::AirbyteMessage);

impl AirbyteMessage {
    pub fn into_inner(self) -> super::AirbyteMessage {
        self.0
    }
}

impl From<super::AirbyteMessage> for AirbyteMessage {
    fn from(message: super::AirbyteMessage) -> Self {
        Self(message)
    }
}

/// Major-0 configured catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfiguredAirbyteCatalog(pub super::ConfiguredAirbyteCatalog);

impl ConfiguredAirbyteCatalog {
    pub fn into_inner(self) -> super::ConfiguredAirbyteCatalog {
        self.0
    }
}

impl From<super::ConfiguredAirbyteCatalog> for ConfiguredAirbyteCatalog {
    fn from(catalog: super::ConfiguredAirbyteCatalog) -> Self {
        Self(catalog)
    }
}
