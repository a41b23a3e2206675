use super::{AirbyteMessageDeserializer, AirbyteMessageSerializer};
use crate::{Result, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// serde_json serializer bound to one protocol version
pub struct JsonSerializer<T> {
    version: Version,
    _message: PhantomData<fn(&T)>,
}

impl<T> JsonSerializer<T> {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            _message: PhantomData,
        }
    }
}

impl<T: Serialize + 'static> AirbyteMessageSerializer for JsonSerializer<T> {
    type Message = T;

    fn target_version(&self) -> &Version {
        &self.version
    }

    fn serialize(&self, message: &T) -> Result<String> {
        Ok(serde_json::to_string(message)?)
    }
}

/// serde_json deserializer bound to one protocol version
pub struct JsonDeserializer<T> {
    version: Version,
    _message: PhantomData<fn() -> T>,
}

impl<T> JsonDeserializer<T> {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            _message: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Send + 'static> AirbyteMessageDeserializer for JsonDeserializer<T> {
    type Message = T;

    fn target_version(&self) -> &Version {
        &self.version
    }

    fn deserialize(&self, value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}
