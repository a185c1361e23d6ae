//! Provider 适配层：通过 trait 实现多厂商 API 的请求/响应转换
//!
//! Provider adapter layer. Each adapter translates a [`NormalizedRequest`] into one
//! provider's wire shape and parses that provider's responses and stream chunks
//! back into [`NormalizedResponse`] / [`StreamDelta`].
//!
//! The set of wire formats is closed ([`WireFormat`]); concrete adapters are
//! created through [`create_adapter`] from an [`AdapterKind`] and shared as
//! `Arc<dyn ProviderAdapter>` by the registry.
//!
//! | Concern | OpenAI-compatible | Anthropic | Gemini | Ollama |
//! |---------|-------------------|-----------|--------|--------|
//! | System prompt | first `system` message | top-level `system` | `system_instruction` | first `system` message |
//! | Images | data-URI `image_url` part | base64 `image` block | `inline_data` part | `images` array |
//! | Streaming | `data:` lines + `[DONE]` | `event:`/`data:` lines | `data:` lines, EOS | NDJSON, `done: true` |
//! | Auth | `Authorization: Bearer` | `x-api-key` | `x-goog-api-key` | optional bearer |

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::{NormalizedRequest, NormalizedResponse, StreamDelta, TokenUsage};
use crate::utils::tool_call_assembler::ToolCallAssembler;
use crate::Result;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

/// Explicitly supplied provider credential. Never read from the environment.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    None,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Credentials::ApiKey(key.into())
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Credentials::ApiKey(k) => Some(k.as_str()),
            Credentials::None => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(***)"),
            Credentials::None => f.write_str("None"),
        }
    }
}

/// Wire-level request produced by an adapter.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub stream: bool,
}

/// Provider API families understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    OpenAiChat,
    AnthropicMessages,
    GeminiGenerate,
    OllamaChat,
}

/// Closed set of known providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    OpenAi,
    Anthropic,
    Gemini,
    Groq,
    Together,
    OpenRouter,
    DeepSeek,
    Mistral,
    Xai,
    LmStudio,
    Ollama,
}

impl AdapterKind {
    pub fn name(&self) -> &'static str {
        match self {
            AdapterKind::OpenAi => "openai",
            AdapterKind::Anthropic => "anthropic",
            AdapterKind::Gemini => "gemini",
            AdapterKind::Groq => "groq",
            AdapterKind::Together => "together",
            AdapterKind::OpenRouter => "openrouter",
            AdapterKind::DeepSeek => "deepseek",
            AdapterKind::Mistral => "mistral",
            AdapterKind::Xai => "xai",
            AdapterKind::LmStudio => "lmstudio",
            AdapterKind::Ollama => "ollama",
        }
    }

    pub fn wire_format(&self) -> WireFormat {
        match self {
            AdapterKind::Anthropic => WireFormat::AnthropicMessages,
            AdapterKind::Gemini => WireFormat::GeminiGenerate,
            AdapterKind::Ollama => WireFormat::OllamaChat,
            _ => WireFormat::OpenAiChat,
        }
    }
}

/// Running state threaded through `parse_stream_chunk` for one stream.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Last SSE `event:` name seen (Anthropic sends it on its own line).
    pub event: Option<String>,
    pub tool_calls: ToolCallAssembler,
    pub usage: TokenUsage,
    pub chunks: usize,
}

/// Core trait for provider-specific API adaptation.
///
/// Adapters are pure translators: they never perform I/O. Malformed provider
/// content is reported as [`Error::Parse`](crate::Error::Parse), which the
/// engine treats as a candidate failure (non-stream) or a skipped chunk (stream).
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Unique adapter name (e.g. "openai", "groq").
    fn name(&self) -> &str;

    fn wire_format(&self) -> WireFormat;

    /// Model-identifier prefixes this adapter claims.
    fn prefixes(&self) -> &[String];

    fn matches_identifier(&self, model: &str) -> bool {
        self.prefixes().iter().any(|p| model.starts_with(p.as_str()))
    }

    /// Build a provider-specific HTTP request from the normalized request.
    fn build_request(&self, request: &NormalizedRequest, model: &str) -> Result<ProviderRequest>;

    /// Parse a non-streaming response body.
    fn parse_response(&self, body: &Value) -> Result<NormalizedResponse>;

    /// Parse one framed line of a streaming response.
    fn parse_stream_chunk(&self, raw: &str, state: &mut StreamState) -> Result<StreamDelta>;
}

/// Factory for the closed adapter set, using each provider's public endpoint.
pub fn create_adapter(kind: AdapterKind, credentials: Credentials) -> Arc<dyn ProviderAdapter> {
    match kind {
        AdapterKind::Anthropic => Arc::new(AnthropicAdapter::new(credentials)),
        AdapterKind::Gemini => Arc::new(GeminiAdapter::new(credentials)),
        AdapterKind::Ollama => Arc::new(OllamaAdapter::new()),
        other => Arc::new(OpenAiAdapter::for_kind(other, credentials)),
    }
}

/// One SSE/NDJSON line, classified.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame<'a> {
    Skip,
    Event(&'a str),
    Done,
    Data(&'a str),
}

/// Classify a raw line: strips the `data:` prefix, recognizes `[DONE]`,
/// `event:` lines and SSE comments.
pub(crate) fn frame(raw: &str) -> Frame<'_> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with(':') {
        return Frame::Skip;
    }
    if let Some(name) = line.strip_prefix("event:") {
        return Frame::Event(name.trim());
    }
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None => line,
    };
    if payload == "[DONE]" {
        return Frame::Done;
    }
    if payload.is_empty() {
        return Frame::Skip;
    }
    Frame::Data(payload)
}

pub(crate) fn parse_json_chunk(provider: &str, payload: &str) -> Result<Value> {
    serde_json::from_str(payload).map_err(|e| {
        crate::Error::parse_with_raw(
            provider,
            format!("Failed to parse stream chunk: {}", e),
            payload,
        )
    })
}

/// Split a leading `<think>…</think>` block out of a reply.
pub(crate) fn split_think_tags(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        if let Some(end) = rest.find("</think>") {
            let reasoning = rest[..end].trim().to_string();
            let answer = rest[end + "</think>".len()..].trim_start().to_string();
            return (Some(reasoning).filter(|r| !r.is_empty()), answer);
        }
    }
    (None, text.to_string())
}

/// Merge caller pass-through fields into the provider body.
pub(crate) fn merge_extra(body: &mut Value, extra: &serde_json::Map<String, Value>) {
    if let Value::Object(map) = body {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
