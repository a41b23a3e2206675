use super::{
    AirbyteMessageDeserializer, AirbyteMessageSerializer, ErasedDeserializer, ErasedSerializer,
    JsonDeserializer, JsonSerializer,
};
use crate::migration::v1;
use crate::models::{self, v0};
use crate::{Error, Result, Version};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of serializers and deserializers keyed by protocol major
///
/// Registering a second entry for a major fails; looking up a major with no
/// entry returns `None` and leaves the decision to the caller.
#[derive(Default, Clone)]
pub struct SerDeProvider {
    serializers: BTreeMap<u64, Arc<dyn ErasedSerializer>>,
    deserializers: BTreeMap<u64, Arc<dyn ErasedDeserializer>>,
}

impl SerDeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with JSON serdes for every major this crate ships models for
    pub fn with_defaults() -> Result<Self> {
        let mut provider = Self::new();
        provider.register_serializer(JsonSerializer::<v0::AirbyteMessage>::new(
            v1::PREVIOUS_VERSION,
        ))?;
        provider.register_deserializer(JsonDeserializer::<v0::AirbyteMessage>::new(
            v1::PREVIOUS_VERSION,
        ))?;
        provider.register_serializer(JsonSerializer::<models::AirbyteMessage>::new(
            v1::CURRENT_VERSION,
        ))?;
        provider.register_deserializer(JsonDeserializer::<models::AirbyteMessage>::new(
            v1::CURRENT_VERSION,
        ))?;
        Ok(provider)
    }

    pub fn register_serializer<S: AirbyteMessageSerializer>(&mut self, serializer: S) -> Result<()> {
        let major = AirbyteMessageSerializer::target_version(&serializer).major();
        if self.serializers.contains_key(&major) {
            return Err(Error::collision("serializer", major.to_string()));
        }
        self.serializers.insert(major, Arc::new(serializer));
        Ok(())
    }

    pub fn register_deserializer<D: AirbyteMessageDeserializer>(
        &mut self,
        deserializer: D,
    ) -> Result<()> {
        let major = AirbyteMessageDeserializer::target_version(&deserializer).major();
        if self.deserializers.contains_key(&major) {
            return Err(Error::collision("deserializer", major.to_string()));
        }
        self.deserializers.insert(major, Arc::new(deserializer));
        Ok(())
    }

    pub fn get_serializer(&self, version: &Version) -> Option<Arc<dyn ErasedSerializer>> {
        if version.is_unspecified() {
            return None;
        }
        self.serializers.get(&version.major()).cloned()
    }

    pub fn get_deserializer(&self, version: &Version) -> Option<Arc<dyn ErasedDeserializer>> {
        if version.is_unspecified() {
            return None;
        }
        self.deserializers.get(&version.major()).cloned()
    }

    pub fn serializer_keys(&self) -> Vec<String> {
        self.serializers.keys().map(u64::to_string).collect()
    }

    pub fn deserializer_keys(&self) -> Vec<String> {
        self.deserializers.keys().map(u64::to_string).collect()
    }
}

impl std::fmt::Debug for SerDeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerDeProvider")
            .field("serializers", &self.serializer_keys())
            .field("deserializers", &self.deserializer_keys())
            .finish()
    }
}
