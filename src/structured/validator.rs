//! Output validator for structured responses, backed by `jsonschema`.
//!
//! `format` keywords are informational here: inferred formats such as
//! `HH:MM` times are looser than the RFC 3339 formats draft 7 defines, so they
//! are removed from the compiled copy of the schema.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::fmt;

use crate::{Error, Result};

pub struct OutputValidator {
    schema: Value,
    compiled: JSONSchema,
}

impl fmt::Debug for OutputValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputValidator")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl OutputValidator {
    pub fn new(schema: Value) -> Result<Self> {
        let mut stripped = schema.clone();
        strip_formats(&mut stripped);
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&stripped)
            .map_err(|e| Error::configuration(format!("invalid output schema: {}", e)))?;
        Ok(Self { schema, compiled })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.compiled.is_valid(value)
    }

    /// Validate `value`, collecting every violation into one `Error::Validation`.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if let Err(errors) = self.compiled.validate(value) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(Error::validation(
                format!(
                    "structured output does not match schema:\n  - {}",
                    messages.join("\n  - ")
                ),
                messages,
                Some(value.clone()),
            ));
        }
        Ok(())
    }
}

fn strip_formats(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if map.get("format").map_or(false, Value::is_string) {
                map.remove("format");
            }
            for (key, v) in map.iter_mut() {
                // property names may legitimately be called "format"
                if key == "properties" {
                    if let Value::Object(props) = v {
                        props.values_mut().for_each(strip_formats);
                    }
                } else {
                    strip_formats(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_formats),
        _ => {}
    }
}
