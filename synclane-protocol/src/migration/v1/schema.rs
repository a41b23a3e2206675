//! Stream schema conversion between inline primitive types (major 0) and
//! `WellKnownTypes` references (major 1)

use serde_json::{Map, Value, json};

pub const REF_PREFIX: &str = "WellKnownTypes.json#/definitions/";

const REF: &str = "$ref";
const TYPE: &str = "type";
const FORMAT: &str = "format";
const AIRBYTE_TYPE: &str = "airbyte_type";
const CONTENT_ENCODING: &str = "contentEncoding";
const ONE_OF: &str = "oneOf";

const OBJECT_KEYWORDS: [&str; 3] = ["properties", "patternProperties", "additionalProperties"];
const ARRAY_KEYWORDS: [&str; 3] = ["items", "additionalItems", "contains"];
const COMBINATORS: [&str; 3] = ["oneOf", "anyOf", "allOf"];

/// Well-known primitive types of major 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownType {
    String,
    BinaryData,
    Date,
    TimestampWithTimezone,
    TimestampWithoutTimezone,
    TimeWithTimezone,
    TimeWithoutTimezone,
    Number,
    Integer,
    Boolean,
}

impl WellKnownType {
    pub const ALL: [WellKnownType; 10] = [
        Self::String,
        Self::BinaryData,
        Self::Date,
        Self::TimestampWithTimezone,
        Self::TimestampWithoutTimezone,
        Self::TimeWithTimezone,
        Self::TimeWithoutTimezone,
        Self::Number,
        Self::Integer,
        Self::Boolean,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::BinaryData => "BinaryData",
            Self::Date => "Date",
            Self::TimestampWithTimezone => "TimestampWithTimezone",
            Self::TimestampWithoutTimezone => "TimestampWithoutTimezone",
            Self::TimeWithTimezone => "TimeWithTimezone",
            Self::TimeWithoutTimezone => "TimeWithoutTimezone",
            Self::Number => "Number",
            Self::Integer => "Integer",
            Self::Boolean => "Boolean",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Parse a `WellKnownTypes.json#/definitions/X` reference
    pub fn from_ref(reference: &str) -> Option<Self> {
        reference.strip_prefix(REF_PREFIX).and_then(Self::from_name)
    }

    /// `{"$ref": ...}` node for this type
    pub fn reference(&self) -> Value {
        json!({ REF: format!("{}{}", REF_PREFIX, self.name()) })
    }

    /// Major-0 inline declaration for this type
    pub fn legacy_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::BinaryData => json!({"type": "string", "contentEncoding": "base64"}),
            Self::Date => json!({"type": "string", "format": "date"}),
            Self::TimestampWithTimezone => json!({
                "type": "string", "format": "date-time", "airbyte_type": "timestamp_with_timezone"
            }),
            Self::TimestampWithoutTimezone => json!({
                "type": "string", "format": "date-time", "airbyte_type": "timestamp_without_timezone"
            }),
            Self::TimeWithTimezone => json!({
                "type": "string", "format": "time", "airbyte_type": "time_with_timezone"
            }),
            Self::TimeWithoutTimezone => json!({
                "type": "string", "format": "time", "airbyte_type": "time_without_timezone"
            }),
            Self::Number => json!({"type": "number"}),
            Self::Integer => json!({"type": "number", "airbyte_type": "integer"}),
            Self::Boolean => json!({"type": "boolean"}),
        }
    }

    /// Whether record values of this type travel as strings in major 1 and numbers in major 0
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }

    fn from_airbyte_type(airbyte_type: &str) -> Option<Self> {
        match airbyte_type {
            "integer" | "big_integer" => Some(Self::Integer),
            "number" | "big_number" => Some(Self::Number),
            "timestamp_with_timezone" => Some(Self::TimestampWithTimezone),
            "timestamp_without_timezone" => Some(Self::TimestampWithoutTimezone),
            "time_with_timezone" => Some(Self::TimeWithTimezone),
            "time_without_timezone" => Some(Self::TimeWithoutTimezone),
            _ => None,
        }
    }

    fn from_primitive(type_name: &str, node: &Map<String, Value>) -> Option<Self> {
        match type_name {
            "string" => {
                if node.get(CONTENT_ENCODING).and_then(Value::as_str) == Some("base64") {
                    return Some(Self::BinaryData);
                }
                Some(match node.get(FORMAT).and_then(Value::as_str) {
                    Some("date-time") => Self::TimestampWithTimezone,
                    Some("time") => Self::TimeWithTimezone,
                    Some("date") => Self::Date,
                    _ => Self::String,
                })
            }
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Rewrite a major-0 schema in place into its major-1 form
pub fn upgrade_schema(schema: &mut Value) {
    let Value::Object(node) = schema else {
        return;
    };
    if node.contains_key(REF) {
        return;
    }

    if let Some(known) = node
        .get(AIRBYTE_TYPE)
        .and_then(Value::as_str)
        .and_then(WellKnownType::from_airbyte_type)
    {
        *schema = known.reference();
        return;
    }

    let types = declared_types(node);
    match types.as_slice() {
        [] => upgrade_children(node),
        [single] => {
            if let Some(known) = WellKnownType::from_primitive(single, node) {
                *schema = known.reference();
            } else {
                node.insert(TYPE.to_string(), Value::String(single.clone()));
                upgrade_children(node);
            }
        }
        many => {
            let options = many
                .iter()
                .map(|type_name| {
                    let mut option = option_for_type(type_name, node);
                    upgrade_schema(&mut option);
                    option
                })
                .collect();
            let mut replacement = Map::new();
            replacement.insert(ONE_OF.to_string(), Value::Array(options));
            *schema = Value::Object(replacement);
        }
    }
}

/// Rewrite a major-1 schema in place into its major-0 form
pub fn downgrade_schema(schema: &mut Value) {
    let Value::Object(node) = schema else {
        return;
    };

    if let Some(known) = node
        .get(REF)
        .and_then(Value::as_str)
        .and_then(WellKnownType::from_ref)
    {
        *schema = known.legacy_schema();
        return;
    }

    downgrade_children(node);

    if let Some(merged) = node
        .get(ONE_OF)
        .and_then(Value::as_array)
        .and_then(|options| collapse_one_of(options))
    {
        node.remove(ONE_OF);
        for (key, value) in merged {
            node.insert(key, value);
        }
    }
}

/// Non-null type names declared by a node, in declaration order
fn declared_types(node: &Map<String, Value>) -> Vec<String> {
    match node.get(TYPE) {
        Some(Value::String(t)) if t != "null" => vec![t.clone()],
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .filter(|t| *t != "null")
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Single-type slice of a multi-type node, keeping only the keywords relevant to `type_name`
fn option_for_type(type_name: &str, node: &Map<String, Value>) -> Value {
    let mut option = Map::new();
    option.insert(TYPE.to_string(), Value::String(type_name.to_string()));
    let keep: &[&str] = match type_name {
        "object" => &OBJECT_KEYWORDS,
        "array" => &ARRAY_KEYWORDS,
        "string" => &[FORMAT, CONTENT_ENCODING],
        _ => &[],
    };
    for key in keep {
        if let Some(value) = node.get(*key) {
            option.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(option)
}

fn for_each_subschema(node: &mut Map<String, Value>, f: fn(&mut Value)) {
    for key in ["properties", "patternProperties"] {
        if let Some(Value::Object(children)) = node.get_mut(key) {
            children.values_mut().for_each(f);
        }
    }
    for key in ["additionalProperties", "additionalItems", "contains"] {
        if let Some(child) = node.get_mut(key) {
            f(child);
        }
    }
    match node.get_mut("items") {
        Some(Value::Array(items)) => items.iter_mut().for_each(f),
        Some(child) => f(child),
        None => {}
    }
    for key in COMBINATORS {
        if let Some(Value::Array(options)) = node.get_mut(key) {
            options.iter_mut().for_each(f);
        }
    }
}

fn upgrade_children(node: &mut Map<String, Value>) {
    for_each_subschema(node, upgrade_schema);
}

fn downgrade_children(node: &mut Map<String, Value>) {
    for_each_subschema(node, downgrade_schema);
}

/// Merge downgraded `oneOf` options back into one multi-type node
///
/// Only possible when every option is an object declaring a single distinct
/// type and the options do not disagree on any other keyword.
fn collapse_one_of(options: &[Value]) -> Option<Map<String, Value>> {
    if options.is_empty() {
        return None;
    }

    let mut types = Vec::with_capacity(options.len());
    let mut merged = Map::new();
    for option in options {
        let Value::Object(fields) = option else {
            return None;
        };
        let type_name = fields.get(TYPE)?.as_str()?;
        if types.iter().any(|t: &Value| t.as_str() == Some(type_name)) {
            return None;
        }
        types.push(Value::String(type_name.to_string()));

        for (key, value) in fields {
            if key == TYPE {
                continue;
            }
            match merged.get(key) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }

    merged.insert(TYPE.to_string(), Value::Array(types));
    Some(merged)
}
