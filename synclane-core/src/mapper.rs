//! Namespace and stream-name mapping between source and destination
//!
//! Applied to the destination catalog, to RECORD messages and to STATE
//! stream descriptors on their way to the destination. Destination
//! acknowledgements are mapped back so checkpoints stay in the source's
//! naming.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use synclane_protocol::models::{
    AirbyteMessage, AirbyteStateMessage, AirbyteStreamNameNamespacePair, ConfiguredAirbyteCatalog,
    StreamDescriptor,
};

const SOURCE_NAMESPACE_PLACEHOLDER: &str = "${SOURCE_NAMESPACE}";

/// Where destination namespaces come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceDefinition {
    /// Keep the namespace the source emitted
    #[default]
    Source,
    /// Let the destination pick its default namespace
    Destination,
    /// Render `namespace_format`, substituting `${SOURCE_NAMESPACE}`
    CustomFormat,
}

#[derive(Debug, Clone, Default)]
pub struct NamespacingMapper {
    definition: NamespaceDefinition,
    format: Option<String>,
    prefix: String,
    reverse: HashMap<AirbyteStreamNameNamespacePair, AirbyteStreamNameNamespacePair>,
}

impl NamespacingMapper {
    pub fn new(
        definition: NamespaceDefinition,
        format: Option<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            definition,
            format,
            prefix: prefix.unwrap_or_default(),
            reverse: HashMap::new(),
        }
    }

    /// Rename every stream and remember how to map acknowledgements back
    pub fn map_catalog(&mut self, catalog: &ConfiguredAirbyteCatalog) -> ConfiguredAirbyteCatalog {
        let mut mapped = catalog.clone();
        for configured in &mut mapped.streams {
            let original = AirbyteStreamNameNamespacePair::from_configured_stream(configured);
            configured.stream.namespace = self.transform_namespace(configured.stream.namespace.as_deref());
            configured.stream.name = self.transform_stream_name(&configured.stream.name);
            let renamed = AirbyteStreamNameNamespacePair::from_configured_stream(configured);
            self.reverse.insert(renamed, original);
        }
        mapped
    }

    pub fn map_message(&self, mut message: AirbyteMessage) -> AirbyteMessage {
        if let Some(record) = message.record.as_mut() {
            record.namespace = self.transform_namespace(record.namespace.as_deref());
            record.stream = self.transform_stream_name(&record.stream);
        }
        if let Some(state) = message.state.as_mut() {
            for_each_descriptor(state, |descriptor| {
                descriptor.namespace = self.transform_namespace(descriptor.namespace.as_deref());
                descriptor.name = self.transform_stream_name(&descriptor.name);
            });
        }
        message
    }

    /// Undo [`map_message`](Self::map_message) on a destination STATE message
    pub fn revert_message(&self, mut message: AirbyteMessage) -> AirbyteMessage {
        if let Some(state) = message.state.as_mut() {
            for_each_descriptor(state, |descriptor| {
                let key = AirbyteStreamNameNamespacePair::from_descriptor(descriptor);
                if let Some(original) = self.reverse.get(&key) {
                    descriptor.name = original.name.clone();
                    descriptor.namespace = original.namespace.clone();
                }
            });
        }
        message
    }

    pub fn transform_namespace(&self, source_namespace: Option<&str>) -> Option<String> {
        match self.definition {
            NamespaceDefinition::Source => source_namespace.map(str::to_string),
            NamespaceDefinition::Destination => None,
            NamespaceDefinition::CustomFormat => {
                let format = self.format.as_deref().filter(|f| !f.trim().is_empty())?;
                let source = source_namespace.filter(|ns| !ns.trim().is_empty()).unwrap_or("");
                let rendered = format.replace(SOURCE_NAMESPACE_PLACEHOLDER, source);
                let sanitized = to_alphanumeric_and_underscore(rendered.trim());
                (!sanitized.is_empty()).then_some(sanitized)
            }
        }
    }

    pub fn transform_stream_name(&self, name: &str) -> String {
        if self.prefix.trim().is_empty() {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
}

fn for_each_descriptor(state: &mut AirbyteStateMessage, mut f: impl FnMut(&mut StreamDescriptor)) {
    if let Some(stream) = state.stream.as_mut() {
        f(&mut stream.stream_descriptor);
    }
    if let Some(global) = state.global.as_mut() {
        for stream in &mut global.stream_states {
            f(&mut stream.stream_descriptor);
        }
    }
}

fn to_alphanumeric_and_underscore(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synclane_protocol::models::{AirbyteStream, ConfiguredAirbyteStream};

    fn catalog() -> ConfiguredAirbyteCatalog {
        let mut stream = AirbyteStream::new("users", json!({"type": "object"}));
        stream.namespace = Some("public".into());
        ConfiguredAirbyteCatalog {
            streams: vec![ConfiguredAirbyteStream::full_refresh(stream)],
        }
    }

    #[test]
    fn test_source_namespace_with_prefix() {
        let mut mapper = NamespacingMapper::new(NamespaceDefinition::Source, None, Some("raw_".into()));
        let mapped = mapper.map_catalog(&catalog());
        assert_eq!(mapped.streams[0].stream.name, "raw_users");
        assert_eq!(mapped.streams[0].stream.namespace.as_deref(), Some("public"));

        let record = mapper.map_message(AirbyteMessage::record("users", Some("public".into()), json!({})));
        let record = record.record.unwrap();
        assert_eq!(record.stream, "raw_users");
        assert_eq!(record.namespace.as_deref(), Some("public"));
    }

    #[test]
    fn test_destination_namespace() {
        let mapper = NamespacingMapper::new(NamespaceDefinition::Destination, None, None);
        assert_eq!(mapper.transform_namespace(Some("public")), None);
        assert_eq!(mapper.transform_stream_name("users"), "users");
    }

    #[test]
    fn test_custom_format() {
        let mapper = NamespacingMapper::new(
            NamespaceDefinition::CustomFormat,
            Some("sync-${SOURCE_NAMESPACE}".into()),
            None,
        );
        assert_eq!(mapper.transform_namespace(Some("public")).as_deref(), Some("sync_public"));
        assert_eq!(mapper.transform_namespace(None).as_deref(), Some("sync_"));

        let blank = NamespacingMapper::new(NamespaceDefinition::CustomFormat, Some("  ".into()), None);
        assert_eq!(blank.transform_namespace(Some("public")), None);
    }

    #[test]
    fn test_state_descriptors_round_trip() {
        let mut mapper = NamespacingMapper::new(
            NamespaceDefinition::CustomFormat,
            Some("staging".into()),
            Some("raw_".into()),
        );
        mapper.map_catalog(&catalog());

        let state = AirbyteMessage::state(AirbyteStateMessage::stream(
            StreamDescriptor {
                name: "users".into(),
                namespace: Some("public".into()),
            },
            json!({"cursor": 3}),
        ));
        let mapped = mapper.map_message(state.clone());
        let descriptor = &mapped.state.as_ref().unwrap().stream.as_ref().unwrap().stream_descriptor;
        assert_eq!(descriptor.name, "raw_users");
        assert_eq!(descriptor.namespace.as_deref(), Some("staging"));

        assert_eq!(mapper.revert_message(mapped), state);
    }
}
