// Input validation and JSON Schema export for tool definitions

use super::definition::{ParamSpec, ToolDefinition, ValueType};
use crate::types::FieldViolation;
use serde_json::{Map, Value};

/// Check `payload` against the definition's parameters. Returns every
/// violation found, in declaration order followed by unknown fields.
pub fn violations(def: &ToolDefinition, payload: &Value) -> Vec<FieldViolation> {
    let empty = Map::new();
    let fields = match payload {
        Value::Object(map) => map,
        // A tool without parameters may be called with no payload at all
        Value::Null => &empty,
        other => {
            return vec![FieldViolation::new(
                "$",
                format!("expected a JSON object, got {}", json_type(other)),
            )]
        }
    };

    let mut found = Vec::new();

    for param in def.params() {
        match fields.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    found.push(FieldViolation::new(&param.name, "is required"));
                }
            }
            Some(value) => check_value(&param.name, param, &param.value_type, value, &mut found),
        }
    }

    let mut unknown: Vec<&String> = fields
        .keys()
        .filter(|key| !def.params().iter().any(|p| &p.name == *key))
        .collect();
    unknown.sort();
    for key in unknown {
        found.push(FieldViolation::new(key.as_str(), "unknown parameter"));
    }

    found
}

fn check_value(
    field: &str,
    param: &ParamSpec,
    expected: &ValueType,
    value: &Value,
    found: &mut Vec<FieldViolation>,
) {
    let matches = match expected {
        ValueType::String => value.is_string(),
        ValueType::Integer => value.is_i64() || value.is_u64(),
        ValueType::Number => value.is_number(),
        ValueType::Boolean => value.is_boolean(),
        ValueType::Json => !value.is_null(),
        ValueType::Array { items } => match value.as_array() {
            Some(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    check_value(&format!("{}[{}]", field, i), param, items, element, found);
                }
                true
            }
            None => false,
        },
    };

    if !matches {
        found.push(FieldViolation::new(
            field,
            format!("expected {}, got {}", expected.name(), json_type(value)),
        ));
        return;
    }

    if let (Some(allowed), Some(s)) = (&param.allowed_values, value.as_str()) {
        if !allowed.iter().any(|a| a == s) {
            found.push(FieldViolation::new(
                field,
                format!("must be one of [{}]", allowed.join(", ")),
            ));
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render the definition's parameters as a JSON Schema object
pub fn json_schema(def: &ToolDefinition) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in def.params() {
        let mut schema = value_schema(&param.value_type);
        if let Some(description) = &param.description {
            schema["description"] = Value::String(description.clone());
        }
        if let Some(allowed) = &param.allowed_values {
            // Allowed values constrain the elements of array parameters
            innermost_items(&mut schema)["enum"] = serde_json::json!(allowed);
        }
        if param.required {
            required.push(param.name.clone());
        }
        properties.insert(param.name.clone(), schema);
    }

    json_schema_object(Value::Object(properties), required)
}

fn innermost_items(schema: &mut Value) -> &mut Value {
    if schema.get("items").is_some() {
        innermost_items(&mut schema["items"])
    } else {
        schema
    }
}

fn value_schema(value_type: &ValueType) -> Value {
    match value_type {
        ValueType::String => serde_json::json!({ "type": "string" }),
        ValueType::Integer => serde_json::json!({ "type": "integer" }),
        ValueType::Number => serde_json::json!({ "type": "number" }),
        ValueType::Boolean => serde_json::json!({ "type": "boolean" }),
        ValueType::Json => serde_json::json!({}),
        ValueType::Array { items } => serde_json::json!({
            "type": "array",
            "items": value_schema(items)
        }),
    }
}

pub fn json_schema_object(properties: Value, required: Vec<String>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}
