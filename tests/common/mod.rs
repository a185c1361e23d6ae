//! Mock HTTP server setup for integration tests.
//!
//! Every provider in a test is an OpenAI-compatible adapter mounted under its
//! own path on one mockito server, so each candidate can be given its own
//! canned response.

#![allow(dead_code)]

use ai_lib_relay::adapters::openai::OpenAiAdapter;
use ai_lib_relay::adapters::{Credentials, ProviderAdapter};
use ai_lib_relay::ModelRegistry;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// OpenAI-compatible adapter named `name`, served at `/<name>`, claiming
    /// model identifiers starting with `<name>-`.
    pub fn adapter(&self, name: &str) -> Arc<dyn ProviderAdapter> {
        Arc::new(
            OpenAiAdapter::compatible(
                name,
                format!("{}/{}", self.base_url, name),
                Credentials::api_key("test-key"),
            )
            .with_prefixes(vec![format!("{}-", name)]),
        )
    }

    pub fn registry(&self, names: &[&str]) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        for name in names {
            registry.attach(self.adapter(name));
        }
        registry
    }

    pub fn path(name: &str) -> String {
        format!("/{}/chat/completions", name)
    }

    /// Successful completion returning `text`.
    pub async fn mock_text(&mut self, name: &str, text: &str) -> Mock {
        self.mock_json(name, 200, completion(text)).await
    }

    pub async fn mock_json(&mut self, name: &str, status: usize, body: Value) -> Mock {
        self.server
            .mock("POST", Self::path(name).as_str())
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    pub async fn mock_error(&mut self, name: &str, status: usize, message: &str) -> Mock {
        self.mock_json(
            name,
            status,
            json!({"error": {"message": message, "type": "api_error"}}),
        )
        .await
    }

    /// Completion returned only when the request body contains `partial`.
    pub async fn mock_when(&mut self, name: &str, partial: Value, body: Value) -> Mock {
        self.server
            .mock("POST", Self::path(name).as_str())
            .match_body(Matcher::PartialJson(partial))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    /// SSE stream made of `chunks` (each a JSON payload), terminated by `[DONE]`.
    pub async fn mock_sse(&mut self, name: &str, chunks: &[Value]) -> Mock {
        let mut body = String::new();
        for chunk in chunks {
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        self.mock_sse_raw(name, &body).await
    }

    pub async fn mock_sse_raw(&mut self, name: &str, body: &str) -> Mock {
        self.server
            .mock("POST", Self::path(name).as_str())
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }
}

pub fn completion(text: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "model": "mock",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
    })
}

pub fn tool_call_completion(id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "id": "chatcmpl-2",
        "model": "mock",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 8, "completion_tokens": 4, "total_tokens": 12}
    })
}

pub fn text_chunk(text: &str) -> Value {
    json!({"choices": [{"index": 0, "delta": {"content": text}}]})
}
