//! Gemini generateContent 适配器：contents/parts 结构与 SSE 流解析
//!
//! Google Gemini generateContent adapter. Key differences:
//! - Uses `contents` instead of `messages`, with `parts` instead of `content`.
//! - Roles: `user` and `model`. System text goes into `system_instruction`.
//! - `generationConfig` wraps temperature, `maxOutputTokens`, `topP`, `stopSequences`
//!   and the structured-output schema.
//! - Tool calls arrive as `functionCall` parts without ids; results go back as
//!   `functionResponse` parts keyed by function name.
//! - Streaming uses `:streamGenerateContent?alt=sse`; every `data:` line is a
//!   full response object and the stream ends at EOS.

use serde_json::{json, Map, Value};
use url::Url;

use crate::types::{
    ContentPart, Message, MessageRole, NormalizedRequest, NormalizedResponse, StreamDelta,
    TokenUsage, ToolCall,
};
use crate::{Error, Result};

use super::{
    frame, merge_extra, parse_json_chunk, Credentials, Frame, ProviderAdapter, ProviderRequest,
    StreamState, WireFormat,
};

/// Google Gemini generateContent adapter.
#[derive(Debug)]
pub struct GeminiAdapter {
    base_url: String,
    credentials: Credentials,
    prefixes: Vec<String>,
}

impl GeminiAdapter {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            credentials,
            prefixes: vec!["gemini-".to_string(), "gemma-".to_string()],
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

    fn endpoint(&self, model: &str, stream: bool) -> Result<String> {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let raw = format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            model,
            method
        );
        let mut url = Url::parse(&raw).map_err(|e| {
            Error::configuration(format!("invalid Gemini endpoint '{}': {}", raw, e))
        })?;
        if stream {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(url.to_string())
    }

    fn convert_message(m: &Message) -> Option<Value> {
        let role = match m.role {
            MessageRole::Assistant => "model",
            MessageRole::User | MessageRole::Tool => "user",
            MessageRole::System => return None,
        };
        let parts: Vec<Value> = m
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(json!({ "text": text })),
                ContentPart::Image { source } => Some(json!({
                    "inline_data": { "mime_type": source.media_type, "data": source.data }
                })),
                ContentPart::ToolCall(c) => Some(json!({
                    "functionCall": { "name": c.name, "args": c.arguments }
                })),
                ContentPart::ToolResult(r) => Some(json!({
                    "functionResponse": {
                        "name": r.name,
                        "response": { "content": r.content, "is_error": r.is_error }
                    }
                })),
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(json!({ "role": role, "parts": parts }))
    }

    fn normalize_finish_reason(r: &str) -> String {
        match r {
            "STOP" => "stop".to_string(),
            "MAX_TOKENS" => "length".to_string(),
            "SAFETY" | "RECITATION" => "content_filter".to_string(),
            other => other.to_lowercase(),
        }
    }

    fn usage_from(body: &Value) -> Option<TokenUsage> {
        body.get("usageMetadata").map(|u| {
            let mut usage = TokenUsage::new(
                u["promptTokenCount"].as_u64().unwrap_or(0),
                u["candidatesTokenCount"].as_u64().unwrap_or(0),
            );
            if let Some(total) = u["totalTokenCount"].as_u64() {
                usage.total = total;
            }
            usage
        })
    }

    fn check_blocked(body: &Value) -> Result<()> {
        if let Some(err) = body.get("error") {
            return Err(Error::parse_with_raw(
                "gemini",
                format!(
                    "provider returned an error object: {}",
                    err["message"].as_str().unwrap_or("unknown")
                ),
                body.to_string(),
            ));
        }
        if let Some(reason) = body
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
        {
            return Err(Error::parse_with_raw(
                "gemini",
                format!("prompt blocked: {}", reason),
                body.to_string(),
            ));
        }
        Ok(())
    }
}

/// Rewrite a JSON Schema into the OpenAPI subset Gemini accepts: type unions
/// with `"null"` become `nullable`, unsupported keywords are dropped.
pub(crate) fn to_gemini_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };
    let mut out = Map::new();
    for (k, v) in map {
        match k.as_str() {
            "type" => match v {
                Value::Array(types) => {
                    let non_null: Vec<&Value> = types.iter().filter(|t| *t != "null").collect();
                    if let Some(first) = non_null.first() {
                        out.insert("type".into(), (*first).clone());
                    }
                    if non_null.len() != types.len() {
                        out.insert("nullable".into(), Value::Bool(true));
                    }
                }
                other => {
                    out.insert("type".into(), other.clone());
                }
            },
            "properties" => {
                let props = v
                    .as_object()
                    .map(|p| {
                        p.iter()
                            .map(|(name, s)| (name.clone(), to_gemini_schema(s)))
                            .collect::<Map<_, _>>()
                    })
                    .unwrap_or_default();
                out.insert("properties".into(), Value::Object(props));
            }
            "items" => {
                out.insert("items".into(), to_gemini_schema(v));
            }
            "enum" => {
                let values: Vec<Value> = v
                    .as_array()
                    .map(|a| a.iter().filter(|e| !e.is_null()).cloned().collect())
                    .unwrap_or_default();
                out.insert("enum".into(), Value::Array(values));
            }
            "required" | "description" => {
                out.insert(k.clone(), v.clone());
            }
            _ => {}
        }
    }
    Value::Object(out)
}

impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::GeminiGenerate
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
        system_parts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(|m| m.text()),
        );
        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter_map(Self::convert_message)
            .collect();

        let mut body = json!({ "contents": contents });
        if !system_parts.is_empty() {
            body["system_instruction"] = json!({
                "parts": [{ "text": system_parts.join("\n\n") }]
            });
        }

        let params = &request.params;
        let mut gen_config = Map::new();
        if let Some(t) = params.temperature {
            gen_config.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = params.max_tokens {
            gen_config.insert("maxOutputTokens".into(), json!(mt));
        }
        if let Some(p) = params.top_p {
            gen_config.insert("topP".into(), json!(p));
        }
        if !params.stop.is_empty() {
            gen_config.insert("stopSequences".into(), json!(params.stop));
        }
        if let Some(fmt) = &request.response_format {
            gen_config.insert("responseMimeType".into(), json!("application/json"));
            gen_config.insert("responseSchema".into(), to_gemini_schema(&fmt.schema));
        }
        if !gen_config.is_empty() {
            body["generationConfig"] = Value::Object(gen_config);
        }

        if !request.tools.is_empty() {
            let decls: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": to_gemini_schema(&t.input_schema),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": decls }]);
        }
        merge_extra(&mut body, &params.extra);

        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(key) = self.credentials.key() {
            headers.push(("x-goog-api-key".into(), key.to_string()));
        }

        Ok(ProviderRequest {
            url: self.endpoint(model, request.stream)?,
            headers,
            body,
            stream: request.stream,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<NormalizedResponse> {
        Self::check_blocked(body)?;
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                Error::parse_with_raw("gemini", "missing candidates[0].content", body.to_string())
            })?;

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();
        for p in parts {
            if let Some(call) = p.get("functionCall") {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name: call["name"].as_str().unwrap_or_default().to_string(),
                    arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                });
            } else if let Some(t) = p.get("text").and_then(|t| t.as_str()) {
                if p.get("thought").and_then(|b| b.as_bool()) == Some(true) {
                    reasoning.push_str(t);
                } else {
                    text.push_str(t);
                }
            }
        }

        Ok(NormalizedResponse {
            text,
            reasoning_text: Some(reasoning).filter(|r| !r.is_empty()),
            tool_calls,
            usage: Self::usage_from(body).unwrap_or_default(),
            finish_reason: body
                .pointer("/candidates/0/finishReason")
                .and_then(|v| v.as_str())
                .map(Self::normalize_finish_reason),
            provider: "gemini".to_string(),
            model: body["modelVersion"].as_str().unwrap_or_default().to_string(),
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
        let v = parse_json_chunk("gemini", payload)?;
        if let Some(err) = v.get("error") {
            return Err(Error::Transport {
                provider: "gemini".to_string(),
                model: String::new(),
                status: err["code"].as_u64().map(|c| c as u16),
                message: format!(
                    "stream error: {}",
                    err["message"].as_str().unwrap_or("unknown")
                ),
                payload: Some(err.clone()),
                retry_after_ms: None,
            });
        }
        state.chunks += 1;

        let mut delta = StreamDelta::default();
        let mut text = String::new();
        let mut reasoning = String::new();
        if let Some(parts) = v
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
        {
            for p in parts {
                if let Some(call) = p.get("functionCall") {
                    state.tool_calls.on_complete(
                        String::new(),
                        call["name"].as_str().unwrap_or_default().to_string(),
                        call.get("args").cloned().unwrap_or_else(|| json!({})),
                    );
                } else if let Some(t) = p.get("text").and_then(|t| t.as_str()) {
                    if p.get("thought").and_then(|b| b.as_bool()) == Some(true) {
                        reasoning.push_str(t);
                    } else {
                        text.push_str(t);
                    }
                }
            }
        }
        delta.text = Some(text).filter(|t| !t.is_empty());
        delta.reasoning = Some(reasoning).filter(|r| !r.is_empty());
        if let Some(usage) = Self::usage_from(&v) {
            state.usage = usage;
            delta.usage = Some(usage);
        }
        delta.finish_reason = v
            .pointer("/candidates/0/finishReason")
            .and_then(|r| r.as_str())
            .map(Self::normalize_finish_reason);
        Ok(delta)
    }
}
