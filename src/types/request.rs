//! Provider-agnostic request shape handed to adapters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::Message;
use super::tool::ToolSpec;

/// Generation knobs shared by every provider.
///
/// `extra` is merged verbatim into the provider body after the adapter has
/// written its own fields, so it can override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Vec<String>,
    pub extra: Map<String, Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: Some(2000),
            temperature: Some(1.0),
            top_p: None,
            stop: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl GenerationParams {
    /// Overlay `other` on top of `self`: set fields in `other` win.
    pub fn merged_with(&self, other: &GenerationParams) -> GenerationParams {
        let mut extra = self.extra.clone();
        for (k, v) in &other.extra {
            extra.insert(k.clone(), v.clone());
        }
        GenerationParams {
            max_tokens: other.max_tokens.or(self.max_tokens),
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            stop: if other.stop.is_empty() {
                self.stop.clone()
            } else {
                other.stop.clone()
            },
            extra,
        }
    }

    /// Empty overlay: no field set, used for overrides.
    pub fn unset() -> Self {
        Self {
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Structured-output request attached by `json()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

/// One logical generation request, before any provider mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub params: GenerationParams,
    pub tools: Vec<ToolSpec>,
    pub response_format: Option<ResponseFormat>,
    pub stream: bool,
}

impl NormalizedRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            system_prompt: None,
            params: GenerationParams::default(),
            tools: Vec::new(),
            response_format: None,
            stream: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}
