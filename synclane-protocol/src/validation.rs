//! Structural JSON-schema checks for protocol messages
//!
//! The envelope schema only checks what every major agrees on: a known `type`
//! tag and the matching payload key. Stream-level record schemas are handled
//! by the worker; [`inline_well_known_types`] prepares them for compilation.

use crate::migration::v1::schema::REF_PREFIX;
use crate::{Error, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::OnceLock;

const ENVELOPE_SCHEMA: &str = include_str!("../resources/airbyte_message_envelope.json");
const WELL_KNOWN_TYPES: &str = include_str!("../resources/WellKnownTypes.json");

/// Predicate applied to every parsed line before it is deserialized
pub trait ProtocolValidator: Send + Sync {
    fn test(&self, message: &Value) -> bool;

    /// Like [`test`](Self::test) but with the reasons for a rejection
    fn validate(&self, message: &Value) -> Result<()>;
}

/// [`ProtocolValidator`] backed by the embedded envelope schema
pub struct JsonSchemaProtocolValidator {
    schema: JSONSchema,
}

impl JsonSchemaProtocolValidator {
    pub fn new() -> Result<Self> {
        let raw: Value = serde_json::from_str(ENVELOPE_SCHEMA)?;
        Self::from_schema(&raw)
    }

    /// Validator for a caller-supplied envelope schema
    pub fn from_schema(schema: &Value) -> Result<Self> {
        let schema = JSONSchema::compile(schema)
            .map_err(|e| Error::validation(format!("invalid protocol schema: {e}")))?;
        Ok(Self { schema })
    }
}

impl ProtocolValidator for JsonSchemaProtocolValidator {
    fn test(&self, message: &Value) -> bool {
        self.schema.is_valid(message)
    }

    fn validate(&self, message: &Value) -> Result<()> {
        match self.schema.validate(message) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let reasons: Vec<String> = errors.map(|e| e.to_string()).take(5).collect();
                Err(Error::validation(reasons.join("; ")))
            }
        }
    }
}

/// Accepts everything; used when structural checks are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProtocolValidator;

impl ProtocolValidator for NoopProtocolValidator {
    fn test(&self, _message: &Value) -> bool {
        true
    }

    fn validate(&self, _message: &Value) -> Result<()> {
        Ok(())
    }
}

/// The `WellKnownTypes.json` document
pub fn well_known_types() -> &'static Value {
    static TYPES: OnceLock<Value> = OnceLock::new();
    TYPES.get_or_init(|| serde_json::from_str(WELL_KNOWN_TYPES).unwrap_or(Value::Null))
}

/// Replace every `WellKnownTypes.json#/definitions/X` reference with the definition itself
///
/// External references cannot be resolved by an offline validator, so record
/// schemas are inlined before they are compiled. Unknown references are left
/// in place.
pub fn inline_well_known_types(schema: &mut Value) {
    match schema {
        Value::Object(node) => {
            let definition = node
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix(REF_PREFIX))
                .and_then(|name| well_known_types().get("definitions")?.get(name));
            if let Some(definition) = definition {
                *schema = definition.clone();
                return;
            }
            node.values_mut().for_each(inline_well_known_types);
        }
        Value::Array(items) => items.iter_mut().for_each(inline_well_known_types),
        _ => {}
    }
}
