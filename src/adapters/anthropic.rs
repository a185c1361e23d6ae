//! Anthropic Messages API adapter. Key differences from OpenAI:
//! - The system prompt is a top-level `system` parameter, not part of `messages`.
//! - Content uses typed blocks; images are `{type: image, source: {type: base64, media_type, data}}`.
//! - Tool calls are `tool_use` blocks; results go back as `tool_result` blocks in a user turn.
//! - Streaming sends `event:` lines followed by `data:` payloads; `message_stop` ends it.
//! - `max_tokens` is required.

use serde_json::{json, Value};

use crate::types::{
    ContentPart, Message, MessageRole, NormalizedRequest, NormalizedResponse, StreamDelta,
    TokenUsage, ToolCall,
};
use crate::{Error, Result};

use super::{
    frame, join_url, merge_extra, parse_json_chunk, Credentials, Frame, ProviderAdapter,
    ProviderRequest, StreamState, WireFormat,
};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter.
#[derive(Debug)]
pub struct AnthropicAdapter {
    base_url: String,
    credentials: Credentials,
    prefixes: Vec<String>,
}

impl AnthropicAdapter {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            credentials,
            prefixes: vec!["claude-".to_string()],
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_prefixes(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.prefixes = prefixes.into_iter().collect();
        self
    }

    fn convert_message(m: &Message) -> Option<Value> {
        let role = match m.role {
            MessageRole::Assistant => "assistant",
            // tool results travel in a user turn
            MessageRole::User | MessageRole::Tool => "user",
            MessageRole::System => return None,
        };
        let blocks: Vec<Value> = m
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
                ContentPart::Image { source } => Some(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": source.media_type,
                        "data": source.data,
                    }
                })),
                ContentPart::ToolCall(c) => Some(json!({
                    "type": "tool_use",
                    "id": c.id,
                    "name": c.name,
                    "input": if c.arguments.is_object() { c.arguments.clone() } else { json!({}) },
                })),
                ContentPart::ToolResult(r) => Some(json!({
                    "type": "tool_result",
                    "tool_use_id": r.call_id,
                    "content": r.content,
                    "is_error": r.is_error,
                })),
            })
            .collect();
        if blocks.is_empty() {
            return None;
        }
        Some(json!({ "role": role, "content": blocks }))
    }

    fn normalize_stop_reason(r: &str) -> String {
        match r {
            "end_turn" | "stop_sequence" => "stop".to_string(),
            "max_tokens" => "length".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::AnthropicMessages
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn build_request(&self, request: &NormalizedRequest, model: &str) -> Result<ProviderRequest> {
        let mut system_parts: Vec<String> = request
            .system_prompt
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        // stray system-role entries are folded into the top-level prompt
        system_parts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(|m| m.text()),
        );
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter_map(Self::convert_message)
            .collect();

        let params = &request.params;
        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": request.stream,
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = json!(p);
        }
        if !params.stop.is_empty() {
            body["stop_sequences"] = json!(params.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }
        merge_extra(&mut body, &params.extra);

        let mut headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("anthropic-version".to_string(), API_VERSION.to_string()),
        ];
        if let Some(key) = self.credentials.key() {
            headers.push(("x-api-key".into(), key.to_string()));
        }

        Ok(ProviderRequest {
            url: join_url(&self.base_url, "messages"),
            headers,
            body,
            stream: request.stream,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<NormalizedResponse> {
        if body.get("type").and_then(|t| t.as_str()) == Some("error") {
            return Err(Error::parse_with_raw(
                "anthropic",
                "provider returned an error object",
                body.to_string(),
            ));
        }
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                Error::parse_with_raw("anthropic", "missing content array", body.to_string())
            })?;

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();
        for b in blocks {
            match b.get("type").and_then(|t| t.as_str()) {
                Some("text") => text.push_str(b["text"].as_str().unwrap_or_default()),
                Some("thinking") => reasoning.push_str(b["thinking"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(ToolCall {
                    id: b["id"].as_str().unwrap_or_default().to_string(),
                    name: b["name"].as_str().unwrap_or_default().to_string(),
                    arguments: b.get("input").cloned().unwrap_or_else(|| json!({})),
                }),
                _ => {}
            }
        }

        let usage = body
            .get("usage")
            .map(|u| {
                TokenUsage::new(
                    u["input_tokens"].as_u64().unwrap_or(0),
                    u["output_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text,
            reasoning_text: Some(reasoning).filter(|r| !r.is_empty()),
            tool_calls,
            usage,
            finish_reason: body
                .get("stop_reason")
                .and_then(|v| v.as_str())
                .map(Self::normalize_stop_reason),
            provider: "anthropic".to_string(),
            model: body["model"].as_str().unwrap_or_default().to_string(),
            warnings: Vec::new(),
            raw: body.clone(),
        })
    }

    fn parse_stream_chunk(&self, raw: &str, state: &mut StreamState) -> Result<StreamDelta> {
        let payload = match frame(raw) {
            Frame::Skip => return Ok(StreamDelta::default()),
            Frame::Event(name) => {
                state.event = Some(name.to_string());
                return Ok(StreamDelta::default());
            }
            Frame::Done => return Ok(StreamDelta::done()),
            Frame::Data(p) => p,
        };
        let v = parse_json_chunk("anthropic", payload)?;
        state.chunks += 1;

        let event_type = v
            .get("type")
            .and_then(|t| t.as_str())
            .map(String::from)
            .or_else(|| state.event.clone())
            .unwrap_or_default();
        let mut delta = StreamDelta::default();

        match event_type.as_str() {
            "message_start" => {
                if let Some(input) = v.pointer("/message/usage/input_tokens").and_then(|t| t.as_u64())
                {
                    state.usage.input = input;
                }
            }
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                if v.pointer("/content_block/type").and_then(|t| t.as_str()) == Some("tool_use") {
                    state.tool_calls.on_started(
                        index,
                        v.pointer("/content_block/id")
                            .and_then(|s| s.as_str())
                            .map(String::from),
                        v.pointer("/content_block/name")
                            .and_then(|s| s.as_str())
                            .map(String::from),
                    );
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                match v.pointer("/delta/type").and_then(|t| t.as_str()) {
                    Some("thinking_delta") => {
                        delta.reasoning = v
                            .pointer("/delta/thinking")
                            .and_then(|t| t.as_str())
                            .map(String::from);
                    }
                    Some("input_json_delta") => {
                        if let Some(fragment) =
                            v.pointer("/delta/partial_json").and_then(|t| t.as_str())
                        {
                            state.tool_calls.on_partial(index, fragment);
                        }
                    }
                    _ => {
                        delta.text = v
                            .pointer("/delta/text")
                            .and_then(|t| t.as_str())
                            .filter(|t| !t.is_empty())
                            .map(String::from);
                    }
                }
            }
            "message_delta" => {
                if let Some(out) = v.pointer("/usage/output_tokens").and_then(|t| t.as_u64()) {
                    state.usage.output = out;
                    state.usage.total = state.usage.input + out;
                    delta.usage = Some(state.usage);
                }
                delta.finish_reason = v
                    .pointer("/delta/stop_reason")
                    .and_then(|r| r.as_str())
                    .map(Self::normalize_stop_reason);
            }
            "message_stop" => delta.is_final = true,
            "error" => {
                return Err(Error::Transport {
                    provider: "anthropic".to_string(),
                    model: String::new(),
                    status: None,
                    message: format!(
                        "stream error: {}",
                        v.pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("unknown")
                    ),
                    payload: v.get("error").cloned(),
                    retry_after_ms: None,
                });
            }
            _ => {}
        }
        Ok(delta)
    }
}
