//! Line-oriented reader turning connector output into newest-major messages
//!
//! Per line: parse JSON, run the envelope predicate, decode with the active
//! major's deserializer, upgrade through the migration chain, and re-log LOG
//! messages instead of yielding them. Lines that are not JSON or fail the
//! predicate are logged and dropped; the stream keeps going.

use crate::codec::{ErasedDeserializer, SerDeProvider};
use crate::factory::{VersionedMigrator, VersionedMigratorFactory};
use crate::models::{AirbyteLogMessage, AirbyteMessage, AirbyteMessageType, ConfiguredAirbyteCatalog, LogLevel};
use crate::validation::ProtocolValidator;
use crate::{Error, Result, Version};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{BufRead, Lines};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Bytes of output inspected for a SPEC message before falling back to the default version
pub const DETECTION_WINDOW_BYTES: usize = 32_000;

/// Lazy, finite, non-restartable iterator over newest-major messages
pub struct VersionedMessageReader<R> {
    lines: Lines<R>,
    serde: Arc<SerDeProvider>,
    migrators: VersionedMigratorFactory,
    validator: Arc<dyn ProtocolValidator>,
    default_version: Version,
    catalog: Option<ConfiguredAirbyteCatalog>,
    detect_version: bool,
    connector: String,
    active: Option<(Arc<dyn ErasedDeserializer>, VersionedMigrator)>,
    replay: VecDeque<String>,
    done: bool,
}

impl<R: BufRead> VersionedMessageReader<R> {
    pub fn new(
        input: R,
        serde: Arc<SerDeProvider>,
        migrators: VersionedMigratorFactory,
        validator: Arc<dyn ProtocolValidator>,
        default_version: Version,
        catalog: Option<ConfiguredAirbyteCatalog>,
    ) -> Self {
        Self {
            lines: input.lines(),
            serde,
            migrators,
            validator,
            default_version,
            catalog,
            detect_version: false,
            connector: "connector".to_string(),
            active: None,
            replay: VecDeque::new(),
            done: false,
        }
    }

    /// Look for a SPEC message declaring the emitter's version before decoding
    pub fn with_version_detection(mut self, enabled: bool) -> Self {
        self.detect_version = enabled;
        self
    }

    /// Name used in log fields for lines coming from this stream
    pub fn with_connector_name(mut self, name: impl Into<String>) -> Self {
        self.connector = name.into();
        self
    }

    /// Version currently used for decoding, once resolved
    pub fn active_version(&self) -> Option<&Version> {
        self.active.as_ref().map(|(_, migrator)| migrator.version())
    }

    fn resolve_version(&mut self) -> Result<()> {
        let version = if self.detect_version {
            self.detect()?
        } else {
            self.default_version.clone()
        };

        let deserializer = self.serde.get_deserializer(&version).ok_or_else(|| {
            Error::unsupported(format!(
                "{}: no deserializer registered for protocol version {}",
                self.connector, version
            ))
        })?;
        let migrator = self.migrators.get_versioned_migrator(&version);
        debug!(connector = %self.connector, version = %version, "reading protocol messages");
        self.active = Some((deserializer, migrator));
        Ok(())
    }

    /// Buffer up to [`DETECTION_WINDOW_BYTES`] of lines looking for a SPEC message
    fn detect(&mut self) -> Result<Version> {
        let mut consumed = 0usize;
        while consumed < DETECTION_WINDOW_BYTES {
            let Some(line) = self.lines.next() else {
                break;
            };
            let line = line?;
            consumed += line.len() + 1;
            let declared = spec_protocol_version(&line);
            self.replay.push_back(line);

            if let Some(declared) = declared {
                return Ok(match declared {
                    Some(raw) => match Version::parse(&raw) {
                        Ok(version) => {
                            info!(connector = %self.connector, version = %version, "detected protocol version");
                            version
                        }
                        Err(e) => {
                            warn!(connector = %self.connector, error = %e, "unparsable protocol version, using default");
                            self.default_version.clone()
                        }
                    },
                    None => {
                        info!(
                            connector = %self.connector,
                            default = %self.default_version,
                            "spec does not declare a protocol version, using default"
                        );
                        self.default_version.clone()
                    }
                });
            }
        }

        info!(
            connector = %self.connector,
            default = %self.default_version,
            "no spec message found, using default protocol version"
        );
        Ok(self.default_version.clone())
    }

    fn process_line(&self, line: &str) -> Result<Option<AirbyteMessage>> {
        let Some((deserializer, migrator)) = self.active.as_ref() else {
            return Err(Error::NotInitialized("message reader"));
        };

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                info!(connector = %self.connector, "{}", line);
                return Ok(None);
            }
        };

        if !self.validator.test(&value) {
            error!(connector = %self.connector, "validation failed: {}", line);
            return Ok(None);
        }

        let decoded = match deserializer.deserialize_any(value) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(connector = %self.connector, error = %e, "could not decode message: {}", line);
                return Ok(None);
            }
        };

        let message = migrator.upgrade(decoded, self.catalog.as_ref())?;
        if message.message_type == AirbyteMessageType::Log {
            if let Some(log) = message.log.as_ref() {
                self.relog(log);
            }
            return Ok(None);
        }
        Ok(Some(message))
    }

    fn relog(&self, log: &AirbyteLogMessage) {
        let connector = self.connector.as_str();
        let message = log.message.as_str();
        match log.level {
            LogLevel::Fatal | LogLevel::Error => error!(connector, "{}", message),
            LogLevel::Warn => warn!(connector, "{}", message),
            LogLevel::Info => info!(connector, "{}", message),
            LogLevel::Debug => debug!(connector, "{}", message),
            LogLevel::Trace => trace!(connector, "{}", message),
        }
    }

    fn next_line(&mut self) -> Option<std::io::Result<String>> {
        match self.replay.pop_front() {
            Some(line) => Some(Ok(line)),
            None => self.lines.next(),
        }
    }
}

impl<R: BufRead> Iterator for VersionedMessageReader<R> {
    type Item = Result<AirbyteMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.active.is_none() {
            if let Err(e) = self.resolve_version() {
                self.done = true;
                return Some(Err(e));
            }
        }

        loop {
            let line = match self.next_line() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match self.process_line(&line) {
                Ok(Some(message)) => return Some(Ok(message)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// `Some(declared)` if `line` is a SPEC message, where `declared` is its protocol_version
fn spec_protocol_version(line: &str) -> Option<Option<String>> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type").and_then(Value::as_str) != Some(AirbyteMessageType::Spec.as_str()) {
        return None;
    }
    Some(
        value
            .get("spec")
            .and_then(|spec| spec.get("protocol_version"))
            .and_then(Value::as_str)
            .map(str::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProtocolRegistry;
    use serde_json::json;
    use std::io::Cursor;

    fn lines(values: &[Value]) -> Cursor<Vec<u8>> {
        let mut buf = String::new();
        for v in values {
            buf.push_str(&v.to_string());
            buf.push('\n');
        }
        Cursor::new(buf.into_bytes())
    }

    fn record(n: i64) -> Value {
        json!({"type": "RECORD", "record": {"stream": "s", "data": {"n": n}, "emitted_at": 1}})
    }

    #[test]
    fn test_legacy_source_is_upgraded() {
        let registry = ProtocolRegistry::standard().unwrap();
        let input = lines(&[record(7)]);
        let out: Vec<_> = registry
            .reader(input, &Version::new(0, 3, 0), None)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record.as_ref().unwrap().data, json!({"n": "7"}));
    }

    #[test]
    fn test_garbage_and_logs_are_dropped() {
        let registry = ProtocolRegistry::standard().unwrap();
        let mut raw = b"starting up...\n".to_vec();
        raw.extend_from_slice(
            json!({"type": "LOG", "log": {"level": "WARN", "message": "careful"}})
                .to_string()
                .as_bytes(),
        );
        raw.extend_from_slice(b"\n{\"type\":\"RECORD\"}\n");
        raw.extend_from_slice(record(1).to_string().as_bytes());
        raw.push(b'\n');

        let out: Vec<_> = registry
            .reader(Cursor::new(raw), &Version::new(1, 0, 0), None)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_type, AirbyteMessageType::Record);
    }

    #[test]
    fn test_detection_selects_declared_major() {
        let registry = ProtocolRegistry::standard().unwrap();
        let input = lines(&[
            json!({"type": "SPEC", "spec": {"protocol_version": "1.0.0", "connectionSpecification": {}}}),
            json!({"type": "RECORD", "record": {"stream": "s", "data": {"n": "5"}, "emitted_at": 1}}),
        ]);
        let mut reader = registry
            .reader(input, &Version::new(0, 3, 0), None)
            .with_version_detection(true);

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.message_type, AirbyteMessageType::Spec);
        assert_eq!(reader.active_version(), Some(&Version::new(1, 0, 0)));
        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.record.unwrap().data, json!({"n": "5"}));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_detection_falls_back_to_default() {
        let registry = ProtocolRegistry::standard().unwrap();
        let mut reader = registry
            .reader(lines(&[record(3)]), &Version::new(0, 3, 0), None)
            .with_version_detection(true);
        let message = reader.next().unwrap().unwrap();
        assert_eq!(reader.active_version(), Some(&Version::new(0, 3, 0)));
        assert_eq!(message.record.unwrap().data, json!({"n": "3"}));
    }

    #[test]
    fn test_unknown_detected_version_is_an_error() {
        let registry = ProtocolRegistry::standard().unwrap();
        let input = lines(&[json!({"type": "SPEC", "spec": {"protocol_version": "9.0.0"}})]);
        let mut reader = registry
            .reader(input, &Version::new(0, 3, 0), None)
            .with_version_detection(true);
        assert!(matches!(reader.next(), Some(Err(Error::UnsupportedVersion(_)))));
        assert!(reader.next().is_none());
    }
}
