//! Schema inference from example values.
//!
//! The inferred schema is plain JSON Schema (draft 7 subset) so it can be sent
//! to providers and validated with the same value.
//!
//! | Example | Inferred |
//! |---------|----------|
//! | `null` | `{"type": "null"}` |
//! | `true` | `{"type": "boolean"}` |
//! | `3` / `3.0` | `{"type": "integer"}` |
//! | `3.5` | `{"type": "number"}` |
//! | `"a@b.io"` | `{"type": "string", "format": "email"}` |
//! | `"2024-01-31"` | `{"type": "string", "format": "date"}` |
//! | `"09:30"` | `{"type": "string", "format": "time"}` |
//! | `[]` | `{"type": "array"}` |
//! | `[{..}]` | `{"type": "array", "items": <first element>}` |

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::descriptor::{Description, Descriptions};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email pattern")
});
static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date pattern"));
static TIME_HM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}:\d{2}$").expect("valid time pattern"));
static TIME_HMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}$").expect("valid time pattern"));

/// Infer a schema for `example`, applying `descriptions` at each object level.
pub fn infer_schema(example: &Value, descriptions: Option<&Descriptions>) -> Value {
    infer_node(example, descriptions)
}

fn infer_node(value: &Value, nested: Option<&Descriptions>) -> Value {
    match value {
        Value::Null => json!({ "type": "null" }),
        Value::Bool(_) => json!({ "type": "boolean" }),
        Value::Number(n) => {
            let integral =
                n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0);
            let ty = if integral { "integer" } else { "number" };
            json!({ "type": ty })
        }
        Value::String(s) => infer_string(s),
        Value::Array(items) => match items.first() {
            None => json!({ "type": "array" }),
            Some(first) => json!({ "type": "array", "items": infer_node(first, nested) }),
        },
        Value::Object(map) => infer_object(map, nested),
    }
}

fn infer_string(s: &str) -> Value {
    if EMAIL.is_match(s) {
        json!({ "type": "string", "format": "email" })
    } else if DATE.is_match(s) {
        json!({
            "type": "string",
            "format": "date",
            "description": "Date in YYYY-MM-DD format",
        })
    } else if TIME_HMS.is_match(s) {
        json!({
            "type": "string",
            "format": "time",
            "description": "Time in HH:MM:SS format",
        })
    } else if TIME_HM.is_match(s) {
        json!({
            "type": "string",
            "format": "time",
            "description": "Time in HH:MM format",
        })
    } else {
        json!({ "type": "string" })
    }
}

fn infer_object(map: &Map<String, Value>, descriptions: Option<&Descriptions>) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for (key, value) in map {
        let description = descriptions.and_then(|d| d.get(key));
        let nested = description.and_then(Description::nested);
        let mut schema = infer_node(value, nested);

        let field = description.and_then(Description::field);
        if let Some(text) = description.and_then(Description::text) {
            schema["description"] = Value::String(text.to_string());
        }
        let is_required = field.map_or(true, |f| f.is_required());
        if let Some(f) = field {
            if let Some(values) = &f.enum_values {
                schema["enum"] = Value::Array(values.clone());
            }
            if let Some(default) = &f.default {
                schema["default"] = default.clone();
            }
        }
        if !is_required || field.map_or(false, |f| f.enum_allows_null()) {
            widen_with_null(&mut schema);
        }
        if is_required {
            required.push(Value::String(key.clone()));
        }
        properties.insert(key.clone(), schema);
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Turn `"type": T` into `"type": [T, "null"]`.
fn widen_with_null(schema: &mut Value) {
    let widened = match schema.get("type") {
        Some(Value::String(t)) if t == "null" => return,
        Some(Value::String(t)) => json!([t, "null"]),
        Some(Value::Array(types)) if types.iter().any(|t| t == "null") => return,
        Some(Value::Array(types)) => {
            let mut types = types.clone();
            types.push(json!("null"));
            Value::Array(types)
        }
        _ => return,
    };
    schema["type"] = widened;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::descriptor::FieldDescriptor;

    #[test]
    fn test_primitives() {
        assert_eq!(infer_schema(&json!(null), None)["type"], "null");
        assert_eq!(infer_schema(&json!(true), None)["type"], "boolean");
        assert_eq!(infer_schema(&json!(3), None)["type"], "integer");
        assert_eq!(infer_schema(&json!(3.0), None)["type"], "integer");
        assert_eq!(infer_schema(&json!(3.5), None)["type"], "number");
        assert_eq!(infer_schema(&json!("x"), None)["type"], "string");
    }

    #[test]
    fn test_string_formats() {
        assert_eq!(infer_schema(&json!("ada@example.com"), None)["format"], "email");
        let date = infer_schema(&json!("2024-01-31"), None);
        assert_eq!(date["format"], "date");
        assert_eq!(date["description"], "Date in YYYY-MM-DD format");
        assert_eq!(
            infer_schema(&json!("09:30"), None)["description"],
            "Time in HH:MM format"
        );
        assert_eq!(
            infer_schema(&json!("09:30:15"), None)["description"],
            "Time in HH:MM:SS format"
        );
        assert!(infer_schema(&json!("9:30 am"), None).get("format").is_none());
    }

    #[test]
    fn test_arrays() {
        assert_eq!(infer_schema(&json!([]), None), json!({"type": "array"}));
        assert_eq!(infer_schema(&json!([1, 2]), None)["items"]["type"], "integer");
        let s = infer_schema(&json!([{"name": ""}]), None);
        assert_eq!(s["items"]["type"], "object");
        assert_eq!(s["items"]["required"], json!(["name"]));
    }

    #[test]
    fn test_descriptions_and_optional_fields() {
        let example = json!({
            "name": "",
            "nickname": "",
            "mood": "",
            "countries": [{"capital": ""}]
        });
        let d = Descriptions::new()
            .text("name", "Full name")
            .field("nickname", FieldDescriptor::new("Nickname").optional())
            .field(
                "mood",
                FieldDescriptor::new("Mood")
                    .with_enum(vec![json!("happy"), Value::Null])
                    .with_default(json!("happy")),
            )
            .nested("countries", Descriptions::new().text("capital", "Capital city"));
        let s = infer_schema(&example, Some(&d));

        assert_eq!(s["properties"]["name"]["description"], "Full name");
        assert_eq!(s["properties"]["nickname"]["type"], json!(["string", "null"]));
        assert_eq!(s["properties"]["mood"]["type"], json!(["string", "null"]));
        assert_eq!(s["properties"]["mood"]["default"], "happy");
        assert_eq!(
            s["properties"]["countries"]["items"]["properties"]["capital"]["description"],
            "Capital city"
        );
        let required: Vec<&str> = s["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"mood"));
        assert!(!required.contains(&"nickname"));
    }

    #[test]
    fn test_inference_is_deterministic() {
        let example = json!({"b": [{"x": 1.5}], "a": "2024-02-02", "c": {"d": null}});
        assert_eq!(infer_schema(&example, None), infer_schema(&example, None));
    }
}
