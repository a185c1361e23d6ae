//! Normalized response and streaming delta shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool::ToolCall;

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }

    /// Sum usage across the turns of a tool loop.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.total += other.total;
    }
}

/// Unified response returned by `raw()` / `stream()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Provider and model that produced this response.
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    /// Non-fatal conditions hit while producing the response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Raw provider payload for diagnostics (last turn for tool loops; null for streams).
    #[serde(default)]
    pub raw: Value,
}

impl NormalizedResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Result of parsing one raw stream chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    /// Incremental answer text.
    pub text: Option<String>,
    /// Incremental reasoning text.
    pub reasoning: Option<String>,
    /// Usage reported by this chunk, if any.
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    /// The provider signalled the end of the stream.
    pub is_final: bool,
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            is_final: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.reasoning.is_none()
            && self.usage.is_none()
            && self.finish_reason.is_none()
            && !self.is_final
    }
}
