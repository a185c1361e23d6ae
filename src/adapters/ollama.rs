//! Ollama `/api/chat` adapter.
//!
//! Images travel as a per-message `images` array of bare base64 strings,
//! generation parameters go under `options`, structured output uses `format`
//! (a JSON Schema), and streaming is plain NDJSON ending with `"done": true`.

use serde_json::{json, Map, Value};

use crate::types::{
    ContentPart, Message, MessageRole, NormalizedRequest, NormalizedResponse, StreamDelta,
    TokenUsage, ToolCall,
};
use crate::utils::tool_call_assembler::parse_arguments;
use crate::{Error, Result};

use super::{
    frame, join_url, merge_extra, parse_json_chunk, split_think_tags, Credentials, Frame,
    ProviderAdapter, ProviderRequest, StreamState, WireFormat,
};

#[derive(Debug)]
pub struct OllamaAdapter {
    base_url: String,
    credentials: Credentials,
    prefixes: Vec<String>,
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaAdapter {
    pub fn new() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            credentials: Credentials::None,
            prefixes: vec!["ollama/".to_string()],
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

    /// Bearer credentials for Ollama instances behind an authenticating proxy.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    fn convert_message(m: &Message, out: &mut Vec<Value>) {
        if m.role == MessageRole::Tool {
            for p in &m.parts {
                if let ContentPart::ToolResult(r) = p {
                    out.push(json!({
                        "role": "tool",
                        "content": r.content,
                        "tool_name": r.name,
                    }));
                }
            }
            return;
        }
        let images: Vec<&str> = m
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Image { source } => Some(source.data.as_str()),
                _ => None,
            })
            .collect();
        let calls: Vec<Value> = m
            .tool_calls()
            .map(|c| json!({ "function": { "name": c.name, "arguments": c.arguments } }))
            .collect();

        let mut msg = json!({ "role": m.role.as_str(), "content": m.text() });
        if !images.is_empty() {
            msg["images"] = json!(images);
        }
        if !calls.is_empty() {
            msg["tool_calls"] = Value::Array(calls);
        }
        out.push(msg);
    }

    fn usage_from(body: &Value) -> Option<TokenUsage> {
        let input = body.get("prompt_eval_count").and_then(|v| v.as_u64());
        let output = body.get("eval_count").and_then(|v| v.as_u64());
        if input.is_none() && output.is_none() {
            return None;
        }
        Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0)))
    }

    fn tool_call_from(value: &Value) -> ToolCall {
        let f = &value["function"];
        let arguments = match f.get("arguments") {
            Some(Value::String(s)) => parse_arguments(s),
            Some(v) => v.clone(),
            None => json!({}),
        };
        ToolCall {
            id: value["id"].as_str().unwrap_or_default().to_string(),
            name: f["name"].as_str().unwrap_or_default().to_string(),
            arguments,
        }
    }
}

impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::OllamaChat
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn build_request(&self, request: &NormalizedRequest, model: &str) -> Result<ProviderRequest> {
        // "ollama/llama3.2" addresses the local model "llama3.2"
        let model = model.strip_prefix("ollama/").unwrap_or(model);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system_prompt.as_ref().filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for m in &request.messages {
            Self::convert_message(m, &mut messages);
        }

        let params = &request.params;
        let mut options = Map::new();
        if let Some(t) = params.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = params.max_tokens {
            options.insert("num_predict".into(), json!(mt));
        }
        if let Some(p) = params.top_p {
            options.insert("top_p".into(), json!(p));
        }
        if !params.stop.is_empty() {
            options.insert("stop".into(), json!(params.stop));
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": request.stream,
        });
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        if let Some(fmt) = &request.response_format {
            body["format"] = fmt.schema.clone();
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
        merge_extra(&mut body, &params.extra);

        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(key) = self.credentials.key() {
            headers.push(("authorization".into(), format!("Bearer {}", key)));
        }

        Ok(ProviderRequest {
            url: join_url(&self.base_url, "/api/chat"),
            headers,
            body,
            stream: request.stream,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<NormalizedResponse> {
        if let Some(err) = body.get("error").and_then(|e| e.as_str()) {
            return Err(Error::parse_with_raw(
                "ollama",
                format!("provider returned an error: {}", err),
                body.to_string(),
            ));
        }
        let message = body.get("message").ok_or_else(|| {
            Error::parse_with_raw("ollama", "missing message object", body.to_string())
        })?;

        let content = message["content"].as_str().unwrap_or_default();
        let (think, text) = split_think_tags(content);
        let reasoning_text = message
            .get("thinking")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .or(think);
        let tool_calls = message
            .get("tool_calls")
            .and_then(|c| c.as_array())
            .map(|calls| calls.iter().map(Self::tool_call_from).collect::<Vec<_>>())
            .unwrap_or_default();
        // Ollama omits ids; generate them so results can be paired.
        let tool_calls = tool_calls
            .into_iter()
            .map(|mut c| {
                if c.id.is_empty() {
                    c.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                }
                c
            })
            .collect();

        Ok(NormalizedResponse {
            text,
            reasoning_text,
            tool_calls,
            usage: Self::usage_from(body).unwrap_or_default(),
            finish_reason: body
                .get("done_reason")
                .and_then(|r| r.as_str())
                .map(String::from),
            provider: "ollama".to_string(),
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
        let v = parse_json_chunk("ollama", payload)?;
        if let Some(err) = v.get("error").and_then(|e| e.as_str()) {
            return Err(Error::Transport {
                provider: "ollama".to_string(),
                model: String::new(),
                status: None,
                message: format!("stream error: {}", err),
                payload: Some(v.clone()),
                retry_after_ms: None,
            });
        }
        state.chunks += 1;

        let mut delta = StreamDelta {
            text: v
                .pointer("/message/content")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(String::from),
            reasoning: v
                .pointer("/message/thinking")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(String::from),
            ..Default::default()
        };
        if let Some(calls) = v.pointer("/message/tool_calls").and_then(|c| c.as_array()) {
            for call in calls.iter().map(Self::tool_call_from) {
                state
                    .tool_calls
                    .on_complete(call.id, call.name, call.arguments);
            }
        }
        if v.get("done").and_then(|d| d.as_bool()) == Some(true) {
            if let Some(usage) = Self::usage_from(&v) {
                state.usage = usage;
                delta.usage = Some(usage);
            }
            delta.finish_reason = v
                .get("done_reason")
                .and_then(|r| r.as_str())
                .map(String::from);
            delta.is_final = true;
        }
        Ok(delta)
    }
}
