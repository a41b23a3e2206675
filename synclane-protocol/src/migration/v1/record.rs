//! Record data conversion: major 1 carries numbers as strings

use super::schema::WellKnownType;
use serde_json::{Map, Number, Value};

/// Replace every numeric leaf with its string rendering
pub fn upgrade_record_data(data: &mut Value) {
    match data {
        Value::Number(n) => *data = Value::String(n.to_string()),
        Value::Object(fields) => fields.values_mut().for_each(upgrade_record_data),
        Value::Array(items) => items.iter_mut().for_each(upgrade_record_data),
        _ => {}
    }
}

/// Turn numeric strings back into numbers wherever `schema` declares a numeric type
///
/// Values that do not fit the schema are left untouched. For `oneOf`/`anyOf`
/// the first option the value fully matches is used; failing that, the first
/// option whose top-level shape matches.
pub fn downgrade_record_data(data: &mut Value, schema: &Value) {
    let Value::Object(node) = schema else {
        return;
    };

    if let Some(known) = well_known(node) {
        if known.is_numeric() {
            if let Some(number) = data.as_str().and_then(parse_number) {
                *data = Value::Number(number);
            }
        }
        return;
    }

    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(options)) = node.get(key) {
            let chosen = options
                .iter()
                .find(|option| matches_fully(data, option))
                .or_else(|| options.iter().find(|option| matches_shape(data, option)));
            if let Some(option) = chosen {
                downgrade_record_data(data, option);
            }
            return;
        }
    }

    if let Some(Value::Array(all)) = node.get("allOf") {
        for option in all {
            downgrade_record_data(data, option);
        }
    }

    match data {
        Value::Object(fields) => downgrade_object(fields, node),
        Value::Array(items) => downgrade_array(items, node),
        _ => {}
    }
}

fn downgrade_object(fields: &mut Map<String, Value>, node: &Map<String, Value>) {
    let properties = node.get("properties").and_then(Value::as_object);
    let additional = node
        .get("additionalProperties")
        .filter(|_| !node.contains_key("patternProperties"));

    for (key, value) in fields.iter_mut() {
        match properties.and_then(|p| p.get(key)) {
            Some(subschema) => downgrade_record_data(value, subschema),
            None => {
                if let Some(subschema) = additional {
                    downgrade_record_data(value, subschema);
                }
            }
        }
    }
}

fn downgrade_array(items: &mut [Value], node: &Map<String, Value>) {
    match node.get("items") {
        Some(Value::Array(tuple)) => {
            let additional = node.get("additionalItems");
            for (index, item) in items.iter_mut().enumerate() {
                if let Some(subschema) = tuple.get(index).or(additional) {
                    downgrade_record_data(item, subschema);
                }
            }
        }
        Some(subschema) => items
            .iter_mut()
            .for_each(|item| downgrade_record_data(item, subschema)),
        None => {}
    }
}

fn well_known(node: &Map<String, Value>) -> Option<WellKnownType> {
    node.get("$ref")
        .and_then(Value::as_str)
        .and_then(WellKnownType::from_ref)
}

fn parse_number(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str::<Number>(trimmed).ok()
}

/// Top-level shape check, no recursion
fn matches_shape(value: &Value, schema: &Value) -> bool {
    let node = match schema {
        Value::Bool(accepts) => return *accepts,
        Value::Object(node) => node,
        _ => return true,
    };
    if value.is_null() {
        return true;
    }

    if let Some(known) = well_known(node) {
        return match known {
            WellKnownType::Boolean => value.is_boolean(),
            WellKnownType::Number | WellKnownType::Integer => {
                value.is_number() || value.as_str().and_then(parse_number).is_some()
            }
            _ => value.is_string(),
        };
    }

    let types: Vec<&str> = match node.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => {
            if node.contains_key("properties") {
                return value.is_object();
            }
            if node.contains_key("items") {
                return value.is_array();
            }
            return true;
        }
    };
    types.iter().any(|t| match *t {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    })
}

/// Recursive match: shape plus every declared property and item
fn matches_fully(value: &Value, schema: &Value) -> bool {
    if !matches_shape(value, schema) {
        return false;
    }
    let Value::Object(node) = schema else {
        return true;
    };

    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(options)) = node.get(key) {
            if !options.is_empty() && !options.iter().any(|o| matches_fully(value, o)) {
                return false;
            }
        }
    }

    match value {
        Value::Object(fields) => {
            let Some(properties) = node.get("properties").and_then(Value::as_object) else {
                return true;
            };
            fields.iter().all(|(key, field)| {
                properties
                    .get(key)
                    .is_none_or(|subschema| matches_fully(field, subschema))
            })
        }
        Value::Array(items) => match node.get("items") {
            Some(Value::Array(tuple)) => items
                .iter()
                .zip(tuple.iter())
                .all(|(item, subschema)| matches_fully(item, subschema)),
            Some(subschema) => items.iter().all(|item| matches_fully(item, subschema)),
            None => true,
        },
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(name: &str) -> Value {
        WellKnownType::from_name(name).unwrap().reference()
    }

    fn downgraded(schema: Value, data: Value) -> Value {
        let mut data = data;
        downgrade_record_data(&mut data, &schema);
        data
    }

    #[test]
    fn test_upgrade_stringifies_numbers() {
        let mut data = json!({
            "int": 42,
            "float": 42.2,
            "flag": true,
            "nested": {"n": 1, "s": "x"},
            "list": [42, "a", false]
        });
        upgrade_record_data(&mut data);
        assert_eq!(
            data,
            json!({
                "int": "42",
                "float": "42.2",
                "flag": true,
                "nested": {"n": "1", "s": "x"},
                "list": ["42", "a", false]
            })
        );
    }

    #[test]
    fn test_downgrade_nested() {
        let schema = json!({
            "type": "object",
            "properties": {
                "int": r("Integer"),
                "num": r("Number"),
                "obj": {"type": "object", "properties": {"arr": {"type": "array", "items": r("Integer")}}},
                "tuple": {"type": "array", "items": [r("Integer"), r("String")]}
            }
        });
        let data = json!({
            "int": "42",
            "num": "43.2",
            "string": "42",
            "obj": {"arr": ["1", "2"]},
            "tuple": ["42", "42"]
        });
        assert_eq!(
            downgraded(schema, data),
            json!({
                "int": 42,
                "num": 43.2,
                "string": "42",
                "obj": {"arr": [1, 2]},
                "tuple": [42, "42"]
            })
        );
    }

    #[test]
    fn test_downgrade_leaves_bad_values() {
        let schema = json!({"type": "object", "properties": {"bad": r("Integer"), "raw": r("Integer")}});
        let data = json!({"bad": "arst", "raw": 42});
        assert_eq!(downgraded(schema, data.clone()), data);
    }

    #[test]
    fn test_downgrade_picks_matching_option() {
        let schema = json!({
            "type": "object",
            "properties": {
                "valid": {"oneOf": [r("Boolean"), r("Integer"), r("String")]},
                "all_invalid": {"oneOf": [
                    {"type": "array", "items": r("Integer")},
                    {"type": "array", "items": r("Boolean")}
                ]},
                "tuple": {"oneOf": [
                    {"type": "array", "items": r("Integer")},
                    {"type": "array", "items": [r("String"), r("String"), r("Integer")]}
                ]},
                "mismatched": {"oneOf": [
                    {"type": "object", "properties": {"foo": {"type": "object"}, "bar": r("String")}},
                    {"type": "object", "properties": {"foo": r("Boolean"), "bar": r("Integer")}}
                ]},
                "empty": {"oneOf": []}
            }
        });
        let data = json!({
            "valid": "42",
            "all_invalid": ["42", "arst"],
            "tuple": ["arst", "41", "42"],
            "mismatched": {"foo": true, "bar": "42"},
            "empty": "42"
        });
        assert_eq!(
            downgraded(schema, data),
            json!({
                "valid": 42,
                "all_invalid": [42, "arst"],
                "tuple": ["arst", "41", 42],
                "mismatched": {"foo": true, "bar": 42},
                "empty": "42"
            })
        );
    }

    #[test]
    fn test_downgrade_union_of_array_and_object() {
        let schema = json!({
            "type": ["array", "object"],
            "items": {"type": "object", "properties": {"id": r("Integer")}},
            "properties": {"id": r("Integer")}
        });
        assert_eq!(downgraded(schema.clone(), json!([{"id": "1"}])), json!([{"id": 1}]));
        assert_eq!(downgraded(schema, json!({"id": "2"})), json!({"id": 2}));
    }
}
