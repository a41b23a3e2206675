//! Wire (de)serialization per protocol major
//!
//! Each major has a serializer and a deserializer producing that major's
//! concrete message type. The [`SerDeProvider`] registry maps a major to its
//! pair; lookups by any `major.minor.patch` resolve on the major alone.

mod json;
mod provider;

pub use json::{JsonDeserializer, JsonSerializer};
pub use provider::SerDeProvider;

use crate::migration::AnyValue;
use crate::{Result, Version};
use serde_json::Value;
use std::any::Any;

/// Encode one major's message type to a single wire line
pub trait AirbyteMessageSerializer: Send + Sync + 'static {
    type Message: 'static;

    fn target_version(&self) -> &Version;

    fn serialize(&self, message: &Self::Message) -> Result<String>;
}

/// Decode one major's message type from an already-parsed JSON value
pub trait AirbyteMessageDeserializer: Send + Sync + 'static {
    type Message: Send + 'static;

    fn target_version(&self) -> &Version;

    fn deserialize(&self, value: Value) -> Result<Self::Message>;

    /// Parse and decode a raw line
    fn deserialize_str(&self, line: &str) -> Result<Self::Message> {
        self.deserialize(serde_json::from_str(line)?)
    }
}

/// Object-safe serializer as stored in the registry
pub trait ErasedSerializer: Send + Sync {
    fn target_version(&self) -> &Version;
    fn serialize_any(&self, message: &dyn Any) -> Result<String>;
}

/// Object-safe deserializer as stored in the registry
pub trait ErasedDeserializer: Send + Sync {
    fn target_version(&self) -> &Version;
    fn deserialize_any(&self, value: Value) -> Result<AnyValue>;
}

impl<S: AirbyteMessageSerializer> ErasedSerializer for S {
    fn target_version(&self) -> &Version {
        AirbyteMessageSerializer::target_version(self)
    }

    fn serialize_any(&self, message: &dyn Any) -> Result<String> {
        let message = message
            .downcast_ref::<S::Message>()
            .ok_or(crate::Error::TypeMismatch {
                expected: std::any::type_name::<S::Message>(),
            })?;
        self.serialize(message)
    }
}

impl<D: AirbyteMessageDeserializer> ErasedDeserializer for D {
    fn target_version(&self) -> &Version {
        AirbyteMessageDeserializer::target_version(self)
    }

    fn deserialize_any(&self, value: Value) -> Result<AnyValue> {
        Ok(Box::new(self.deserialize(value)?))
    }
}
