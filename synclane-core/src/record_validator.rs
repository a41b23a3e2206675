//! Per-stream record schema validation
//!
//! Stream schemas reference `WellKnownTypes.json`, which is inlined before
//! compilation. Validation is best effort: failures are collected and
//! reported once at the end of the replication pump, never fatal.

use crate::metrics::WorkerMetrics;
use crate::{Error, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use synclane_protocol::models::{
    AirbyteRecordMessage, AirbyteStreamNameNamespacePair, ConfiguredAirbyteCatalog,
};
use synclane_protocol::validation::inline_well_known_types;
use tracing::warn;

type StreamPair = AirbyteStreamNameNamespacePair;

/// Compiled stream schemas plus their declared top-level fields
pub struct RecordSchemaValidator {
    schemas: HashMap<StreamPair, JSONSchema>,
    fields: HashMap<StreamPair, HashSet<String>>,
}

impl RecordSchemaValidator {
    pub fn new(catalog: &ConfiguredAirbyteCatalog) -> Self {
        let mut schemas = HashMap::new();
        let mut fields = HashMap::new();
        for configured in &catalog.streams {
            let pair = StreamPair::from_configured_stream(configured);
            let mut schema = configured.stream.json_schema.clone();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                fields.insert(pair.clone(), properties.keys().cloned().collect());
            }
            inline_well_known_types(&mut schema);
            match JSONSchema::compile(&schema) {
                Ok(compiled) => {
                    schemas.insert(pair, compiled);
                }
                Err(e) => {
                    warn!(stream = %pair, error = %e, "stream schema does not compile, records will not be validated");
                }
            }
        }
        Self { schemas, fields }
    }

    /// Distinct error descriptions for `record`; empty when valid or unknown
    pub fn validation_errors(&self, record: &AirbyteRecordMessage) -> Vec<String> {
        let pair = StreamPair::from_record(record);
        let Some(schema) = self.schemas.get(&pair) else {
            return Vec::new();
        };
        match schema.validate(&record.data) {
            Ok(()) => Vec::new(),
            Err(errors) => {
                let distinct: BTreeSet<String> = errors
                    .map(|e| format!("{} failed {}", display_path(&e.instance_path.to_string()), e.schema_path))
                    .collect();
                distinct.into_iter().collect()
            }
        }
    }

    pub fn validate_schema(&self, record: &AirbyteRecordMessage) -> Result<()> {
        let errors = self.validation_errors(record);
        if errors.is_empty() {
            return Ok(());
        }
        Err(Error::SchemaValidation {
            stream: StreamPair::from_record(record).to_string(),
            errors: errors.join("; "),
        })
    }

    /// Top-level fields of `record` the stream schema does not declare
    pub fn unexpected_fields(&self, record: &AirbyteRecordMessage) -> Vec<String> {
        let Some(declared) = self.fields.get(&StreamPair::from_record(record)) else {
            return Vec::new();
        };
        record
            .data
            .as_object()
            .map(|data| {
                data.keys()
                    .filter(|k| !declared.contains(k.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Properties declared for `stream`, if its schema lists any
    pub fn declared_fields(&self, stream: &StreamPair) -> Option<&HashSet<String>> {
        self.fields.get(stream)
    }
}

fn display_path(pointer: &str) -> &str {
    if pointer.is_empty() { "/" } else { pointer }
}

/// Validation outcomes accumulated by the replication pump
#[derive(Debug)]
pub struct ValidationReport {
    max_errors: usize,
    errors: HashMap<StreamPair, (BTreeSet<String>, u64)>,
    unexpected: HashMap<StreamPair, BTreeSet<String>>,
}

impl ValidationReport {
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            errors: HashMap::new(),
            unexpected: HashMap::new(),
        }
    }

    /// Validate `record` unless its stream already hit the error cap
    pub fn check(&mut self, validator: &RecordSchemaValidator, record: &AirbyteRecordMessage) {
        let pair = StreamPair::from_record(record);
        let capped = self
            .errors
            .get(&pair)
            .is_some_and(|(kinds, _)| kinds.len() >= self.max_errors);
        if !capped {
            let found = validator.validation_errors(record);
            if !found.is_empty() {
                let (kinds, count) = self.errors.entry(pair.clone()).or_default();
                for error in found {
                    if kinds.len() >= self.max_errors {
                        break;
                    }
                    kinds.insert(error);
                }
                *count += 1;
            }
        }

        let unexpected = validator.unexpected_fields(record);
        if !unexpected.is_empty() {
            self.unexpected.entry(pair).or_default().extend(unexpected);
        }
    }

    pub fn error_kinds(&self, stream: &StreamPair) -> Option<&BTreeSet<String>> {
        self.errors.get(stream).map(|(kinds, _)| kinds)
    }

    pub fn unexpected_fields(&self, stream: &StreamPair) -> Option<&BTreeSet<String>> {
        self.unexpected.get(stream)
    }

    /// Log one line per affected stream and feed the metrics
    pub fn report(&self, metrics: &WorkerMetrics) {
        for (stream, (kinds, count)) in &self.errors {
            warn!(
                stream = %stream,
                invalid_records = count,
                errors = ?kinds,
                "schema validation errors found"
            );
            metrics.record_schema_validation_failure(&stream.to_string());
        }
        for (stream, fields) in &self.unexpected {
            warn!(stream = %stream, fields = ?fields, "records contain fields not declared in the schema");
        }
    }
}
