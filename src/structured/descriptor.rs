//! Field descriptors supplied alongside an example value.
//!
//! Descriptions mirror the example's shape. Each property maps to either a
//! plain description string, a descriptor record (`description`, `required`,
//! `enum`, `default`) or, for nested objects and arrays of objects, another
//! description map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const DESCRIPTOR_KEYS: [&str; 4] = ["description", "required", "enum", "default"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `Some(false)` marks the field optional; absent means required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDescriptor {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = Some(false);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }

    pub fn enum_allows_null(&self) -> bool {
        self.enum_values
            .as_ref()
            .map_or(false, |values| values.iter().any(Value::is_null))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Description {
    Text(String),
    Field(FieldDescriptor),
    Nested(Descriptions),
}

impl Description {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Description::Text(s.clone())),
            Value::Object(map) if is_descriptor_record(map) => {
                serde_json::from_value(value.clone()).ok().map(Description::Field)
            }
            Value::Object(_) => Some(Description::Nested(Descriptions::from_value(value))),
            // descriptions for an array of objects are given by its first element
            Value::Array(items) => items.first().and_then(Description::from_value),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Description::Text(t) => Some(t),
            Description::Field(f) => f.description.as_deref(),
            Description::Nested(_) => None,
        }
    }

    pub fn field(&self) -> Option<&FieldDescriptor> {
        match self {
            Description::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn nested(&self) -> Option<&Descriptions> {
        match self {
            Description::Nested(d) => Some(d),
            _ => None,
        }
    }
}

fn is_descriptor_record(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty()
        && map.keys().all(|k| DESCRIPTOR_KEYS.contains(&k.as_str()))
        && map.get("description").map_or(true, Value::is_string)
}

/// Property name to description, for one object level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Descriptions {
    entries: BTreeMap<String, Description>,
}

impl Descriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a description map from JSON; unrecognized entries are ignored.
    pub fn from_value(value: &Value) -> Self {
        let entries = value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Description::from_value(v).map(|d| (k.clone(), d)))
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    pub fn insert(&mut self, key: impl Into<String>, description: Description) {
        self.entries.insert(key.into(), description);
    }

    pub fn text(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(key, Description::Text(text.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, field: FieldDescriptor) -> Self {
        self.insert(key, Description::Field(field));
        self
    }

    pub fn nested(mut self, key: impl Into<String>, nested: Descriptions) -> Self {
        self.insert(key, Description::Nested(nested));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Description> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
