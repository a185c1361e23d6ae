//! JSON mode support for structured output.
//!
//! Builds the provider `response_format`, the schema instruction appended to
//! the system prompt, and turns the model's reply back into a validated value.
//! Root-level arrays are wrapped under [`ROOT_ARRAY_KEY`] because several
//! providers only accept object-shaped structured output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::descriptor::{Description, Descriptions};
use super::infer::infer_schema;
use super::validator::OutputValidator;
use crate::types::ResponseFormat;
use crate::{Error, Result};

pub const ROOT_ARRAY_KEY: &str = "out";

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").expect("valid fence pattern")
});

/// Options for `json()` calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonOptions {
    /// Append the schema to the system prompt.
    pub add_schema: bool,
    /// Append the example value to the system prompt.
    pub add_example: bool,
    /// Extra instruction appended after the schema.
    pub note: Option<String>,
    /// Ask providers with native structured output to enforce the schema.
    pub native: bool,
    pub strict: bool,
    pub schema_name: String,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            add_schema: true,
            add_example: false,
            note: None,
            native: true,
            strict: false,
            schema_name: "response".to_string(),
        }
    }
}

impl JsonOptions {
    pub fn with_example(mut self) -> Self {
        self.add_example = true;
        self
    }

    pub fn without_schema(mut self) -> Self {
        self.add_schema = false;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Everything one structured-output call needs, built once per call.
#[derive(Debug)]
pub struct StructuredPlan {
    pub schema: Value,
    pub response_format: Option<ResponseFormat>,
    /// Text appended to the system prompt, if any.
    pub instruction: Option<String>,
    wrapped: bool,
    validator: OutputValidator,
}

impl StructuredPlan {
    /// Plan from an example value; the schema is inferred.
    pub fn from_example(
        example: &Value,
        descriptions: Option<&Descriptions>,
        options: &JsonOptions,
    ) -> Result<Self> {
        let wrapped = example.is_array();
        let (example, descriptions) = if wrapped {
            let mut d = Descriptions::new();
            if let Some(inner) = descriptions {
                d.insert(ROOT_ARRAY_KEY, Description::Nested(inner.clone()));
            }
            (json!({ ROOT_ARRAY_KEY: example }), Some(d))
        } else {
            (example.clone(), descriptions.cloned())
        };
        let schema = infer_schema(&example, descriptions.as_ref());
        Self::build(schema, Some(&example), wrapped, options)
    }

    /// Plan from a ready-made schema (e.g. derived with `schemars`).
    pub fn from_schema(schema: Value, options: &JsonOptions) -> Result<Self> {
        let wrapped = schema.get("type").and_then(|t| t.as_str()) == Some("array");
        let schema = if wrapped { wrap_root_array(schema) } else { schema };
        Self::build(schema, None, wrapped, options)
    }

    fn build(
        schema: Value,
        example: Option<&Value>,
        wrapped: bool,
        options: &JsonOptions,
    ) -> Result<Self> {
        let validator = OutputValidator::new(schema.clone())?;
        let response_format = options.native.then(|| ResponseFormat {
            name: options.schema_name.clone(),
            schema: schema.clone(),
            strict: options.strict,
        });
        let instruction = instruction(&schema, example, options);
        Ok(Self {
            schema,
            response_format,
            instruction,
            wrapped,
            validator,
        })
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Extract, validate and unwrap the reply text.
    pub fn finish(&self, provider: &str, text: &str) -> Result<Value> {
        let value = extract_json(text).ok_or_else(|| {
            Error::parse_with_raw(provider, "reply does not contain JSON", text)
        })?;
        self.validator.validate(&value)?;
        Ok(self.unwrap_root(value))
    }

    fn unwrap_root(&self, value: Value) -> Value {
        if !self.wrapped {
            return value;
        }
        match value {
            Value::Object(mut map) => map.remove(ROOT_ARRAY_KEY).unwrap_or(Value::Null),
            other => other,
        }
    }
}

/// Nest an array schema under [`ROOT_ARRAY_KEY`].
///
/// `$ref`s point at `#/definitions/...` from the document root, so the
/// definition tables move up to the wrapper. Document-level keywords are
/// dropped.
fn wrap_root_array(mut schema: Value) -> Value {
    let mut wrapper = json!({
        "type": "object",
        "required": [ROOT_ARRAY_KEY],
    });
    if let (Value::Object(inner), Value::Object(outer)) = (&mut schema, &mut wrapper) {
        for key in ["definitions", "$defs"] {
            if let Some(table) = inner.remove(key) {
                outer.insert(key.to_string(), table);
            }
        }
        inner.remove("$schema");
        inner.remove("title");
    }
    wrapper["properties"] = json!({ ROOT_ARRAY_KEY: schema });
    wrapper
}

fn instruction(schema: &Value, example: Option<&Value>, options: &JsonOptions) -> Option<String> {
    let mut sections = Vec::new();
    if options.add_schema {
        sections.push(format!(
            "Respond only with a JSON value that matches this JSON Schema:\n{}",
            pretty(schema)
        ));
    }
    if options.add_example {
        if let Some(example) = example {
            sections.push(format!("Example of the expected shape:\n{}", pretty(example)));
        }
    }
    if let Some(note) = options.note.as_ref().filter(|n| !n.is_empty()) {
        sections.push(note.clone());
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Parse JSON out of a reply: the whole text, else the first fenced block,
/// else the widest `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    if let Some(inner) = FENCED.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.as_str().trim()) {
            return Some(v);
        }
    }
    let spans = [('{', '}'), ('[', ']')];
    let mut candidates: Vec<(usize, &str)> = spans
        .iter()
        .filter_map(|(open, close)| {
            let start = trimmed.find(*open)?;
            let end = trimmed.rfind(*close)?;
            (end > start).then(|| (start, &trimmed[start..=end]))
        })
        .collect();
    candidates.sort_by_key(|(start, _)| *start);
    candidates
        .into_iter()
        .find_map(|(_, span)| serde_json::from_str::<Value>(span).ok())
}

/// Schema for a Rust type via `schemars`.
pub fn json_schema_from_type<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| json!({}))
}
