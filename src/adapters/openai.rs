//! OpenAI Chat Completions adapter, also covering OpenAI-compatible hosts
//! (Groq, Together, OpenRouter, DeepSeek, Mistral, xAI, LM Studio).
//!
//! - System prompt is the first message with role `system`.
//! - Images are `image_url` parts carrying a data URI.
//! - Tool calls arrive as `choices[0].message.tool_calls` with string-encoded arguments;
//!   tool results go back as one `tool` message per call.
//! - Streaming is `data: {...}` lines terminated by `data: [DONE]`.

use serde_json::{json, Value};

use crate::types::{
    ContentPart, Message, MessageRole, NormalizedRequest, NormalizedResponse, StreamDelta,
    TokenUsage, ToolCall,
};
use crate::utils::tool_call_assembler::parse_arguments;
use crate::{Error, Result};

use super::{
    frame, join_url, merge_extra, parse_json_chunk, split_think_tags, AdapterKind, Credentials,
    Frame, ProviderAdapter, ProviderRequest, StreamState, WireFormat,
};

/// OpenAI-compatible chat completions adapter.
#[derive(Debug)]
pub struct OpenAiAdapter {
    name: String,
    base_url: String,
    credentials: Credentials,
    prefixes: Vec<String>,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiAdapter {
    /// Generic OpenAI-compatible endpoint.
    pub fn compatible(
        name: impl Into<String>,
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            credentials,
            prefixes: Vec::new(),
            extra_headers: Vec::new(),
        }
    }

    pub fn openai(credentials: Credentials) -> Self {
        Self::for_kind(AdapterKind::OpenAi, credentials)
    }

    /// Preset endpoint and prefixes for a known OpenAI-compatible provider.
    pub fn for_kind(kind: AdapterKind, credentials: Credentials) -> Self {
        let (base, prefixes): (&str, &[&str]) = match kind {
            AdapterKind::Groq => (
                "https://api.groq.com/openai/v1",
                &["llama-", "moonshotai/", "openai/gpt-oss", "qwen/", "meta-llama/llama-4"],
            ),
            AdapterKind::Together => (
                "https://api.together.xyz/v1",
                &["meta-llama/", "deepseek-ai/", "Qwen/", "moonshotai/"],
            ),
            AdapterKind::OpenRouter => ("https://openrouter.ai/api/v1", &[]),
            AdapterKind::DeepSeek => ("https://api.deepseek.com", &["deepseek-"]),
            AdapterKind::Mistral => (
                "https://api.mistral.ai/v1",
                &["mistral-", "magistral-", "codestral-", "ministral-"],
            ),
            AdapterKind::Xai => ("https://api.x.ai/v1", &["grok-"]),
            AdapterKind::LmStudio => ("http://localhost:1234/v1", &[]),
            _ => (
                "https://api.openai.com/v1",
                &["gpt-", "o1", "o3", "o4", "chatgpt-", "ft:gpt"],
            ),
        };
        let name = match kind {
            AdapterKind::Anthropic | AdapterKind::Gemini | AdapterKind::Ollama => "openai",
            other => other.name(),
        };
        Self::compatible(name, base, credentials)
            .with_prefixes(prefixes.iter().map(|p| p.to_string()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_prefixes(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.prefixes = prefixes.into_iter().collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Reasoning models reject `max_tokens` and take `max_completion_tokens`.
    fn uses_completion_tokens(model: &str) -> bool {
        ["o1", "o3", "o4", "gpt-5"]
            .iter()
            .any(|p| model.starts_with(*p))
    }

    fn convert_message(m: &Message, out: &mut Vec<Value>) {
        match m.role {
            MessageRole::Tool => {
                for part in &m.parts {
                    if let ContentPart::ToolResult(r) = part {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": r.call_id,
                            "content": r.content,
                        }));
                    }
                }
            }
            MessageRole::Assistant => {
                let text = m.text();
                let calls: Vec<Value> = m
                    .tool_calls()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": encode_arguments(&c.arguments),
                            }
                        })
                    })
                    .collect();
                let mut obj = json!({ "role": "assistant" });
                obj["content"] = if text.is_empty() && !calls.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };
                if !calls.is_empty() {
                    obj["tool_calls"] = Value::Array(calls);
                }
                out.push(obj);
            }
            MessageRole::User | MessageRole::System => {
                // a lone text part goes as a plain string; grouped parts keep their boundaries
                let single_text =
                    m.parts.len() == 1 && matches!(m.parts[0], ContentPart::Text { .. });
                let content = if single_text {
                    Value::String(m.text())
                } else {
                    Value::Array(
                        m.parts
                            .iter()
                            .filter_map(|p| match p {
                                ContentPart::Text { text } => {
                                    Some(json!({ "type": "text", "text": text }))
                                }
                                ContentPart::Image { source } => Some(json!({
                                    "type": "image_url",
                                    "image_url": { "url": source.data_uri() }
                                })),
                                _ => None,
                            })
                            .collect(),
                    )
                };
                out.push(json!({ "role": m.role.as_str(), "content": content }));
            }
        }
    }

    fn parse_usage(u: &Value) -> TokenUsage {
        let input = u["prompt_tokens"].as_u64().unwrap_or(0);
        let output = u["completion_tokens"].as_u64().unwrap_or(0);
        TokenUsage {
            input,
            output,
            total: u["total_tokens"].as_u64().unwrap_or(input + output),
        }
    }
}

fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::OpenAiChat
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn build_request(&self, request: &NormalizedRequest, model: &str) -> Result<ProviderRequest> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for m in &request.messages {
            Self::convert_message(m, &mut messages);
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": request.stream,
        });

        let params = &request.params;
        if let Some(mt) = params.max_tokens {
            let key = if Self::uses_completion_tokens(model) {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body[key] = json!(mt);
        }
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = json!(p);
        }
        if !params.stop.is_empty() {
            body["stop"] = json!(params.stop);
        }
        if request.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(format) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "strict": format.strict,
                    "schema": format.schema,
                }
            });
        }
        merge_extra(&mut body, &params.extra);

        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(key) = self.credentials.key() {
            headers.push(("authorization".into(), format!("Bearer {}", key)));
        }
        headers.extend(self.extra_headers.iter().cloned());

        Ok(ProviderRequest {
            url: join_url(&self.base_url, "chat/completions"),
            headers,
            body,
            stream: request.stream,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<NormalizedResponse> {
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(Error::parse_with_raw(
                &self.name,
                "provider returned an error object",
                err.to_string(),
            ));
        }
        let message = body.pointer("/choices/0/message").ok_or_else(|| {
            Error::parse_with_raw(&self.name, "missing choices[0].message", body.to_string())
        })?;

        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let explicit_reasoning = message
            .get("reasoning_content")
            .or_else(|| message.get("reasoning"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);
        let (think, text) = split_think_tags(content);

        let tool_calls = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| ToolCall {
                        id: c["id"].as_str().unwrap_or_default().to_string(),
                        name: c
                            .pointer("/function/name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        arguments: match c.pointer("/function/arguments") {
                            Some(Value::String(s)) => parse_arguments(s),
                            Some(other) => other.clone(),
                            None => json!({}),
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text,
            reasoning_text: explicit_reasoning.or(think),
            tool_calls,
            usage: body.get("usage").map(Self::parse_usage).unwrap_or_default(),
            finish_reason: body
                .pointer("/choices/0/finish_reason")
                .and_then(|v| v.as_str())
                .map(String::from),
            provider: self.name.clone(),
            model: body["model"].as_str().unwrap_or_default().to_string(),
            warnings: Vec::new(),
            raw: body.clone(),
        })
    }

    fn parse_stream_chunk(&self, raw: &str, state: &mut StreamState) -> Result<StreamDelta> {
        let payload = match frame(raw) {
            Frame::Skip | Frame::Event(_) => return Ok(StreamDelta::default()),
            Frame::Done => return Ok(StreamDelta::done()),
            Frame::Data(p) => p,
        };
        let v = parse_json_chunk(&self.name, payload)?;
        state.chunks += 1;

        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Transport {
                provider: self.name.clone(),
                model: String::new(),
                status: None,
                message: format!("stream error: {}", err),
                payload: Some(err.clone()),
                retry_after_ms: None,
            });
        }

        let mut delta = StreamDelta::default();
        if let Some(u) = v.get("usage").filter(|u| !u.is_null()) {
            let usage = Self::parse_usage(u);
            state.usage = usage;
            delta.usage = Some(usage);
        }

        let Some(choice) = v.pointer("/choices/0") else {
            return Ok(delta);
        };
        if let Some(text) = choice
            .pointer("/delta/content")
            .and_then(|c| c.as_str())
            .filter(|s| !s.is_empty())
        {
            delta.text = Some(text.to_string());
        }
        if let Some(reasoning) = choice
            .pointer("/delta/reasoning_content")
            .or_else(|| choice.pointer("/delta/reasoning"))
            .and_then(|c| c.as_str())
            .filter(|s| !s.is_empty())
        {
            delta.reasoning = Some(reasoning.to_string());
        }
        if let Some(calls) = choice.pointer("/delta/tool_calls").and_then(|c| c.as_array()) {
            for (pos, call) in calls.iter().enumerate() {
                let index = call["index"].as_u64().unwrap_or(pos as u64) as u32;
                let id = call["id"].as_str().map(String::from);
                let name = call
                    .pointer("/function/name")
                    .and_then(|n| n.as_str())
                    .map(String::from);
                if id.is_some() || name.is_some() {
                    state.tool_calls.on_started(index, id, name);
                }
                if let Some(fragment) = call.pointer("/function/arguments").and_then(|a| a.as_str())
                {
                    state.tool_calls.on_partial(index, fragment);
                }
            }
        }
        if let Some(reason) = choice["finish_reason"].as_str() {
            delta.finish_reason = Some(reason.to_string());
        }
        Ok(delta)
    }
}
