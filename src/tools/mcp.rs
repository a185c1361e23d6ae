//! MCP 工具桥接：通过 HTTP JSON-RPC 访问 MCP 服务器工具
//!
//! MCP (Model Context Protocol) tools over HTTP JSON-RPC 2.0.
//!
//! - `tools/list` declarations become [`ToolSpec`]s namespaced
//!   `mcp__<server>__<tool>` so several servers can coexist
//! - allow/deny filters decide which server tools are exposed
//! - `tools/call` results have their text blocks joined; `isError` results are
//!   reported as error output
//! - the `initialize` handshake runs once, before the first request; a
//!   `Mcp-Session-Id` issued by the server is sent on every later request
//! - replies may be plain JSON or a `text/event-stream` carrying the response

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{RemoteToolOutput, RemoteToolProvider};
use crate::adapters::ProviderRequest;
use crate::transport::{HttpTransport, RawReply};
use crate::types::ToolSpec;
use crate::{Error, Result};

/// An MCP tool as received from an MCP server's `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// An MCP tool invocation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// Content block within a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Naming and filtering rules for one MCP server.
#[derive(Debug, Clone)]
pub struct McpToolBridge {
    namespace: String,
    allow_filter: HashSet<String>,
    deny_filter: HashSet<String>,
}

impl McpToolBridge {
    pub fn new(server_name: &str) -> Self {
        Self {
            namespace: format!("mcp__{}__", server_name),
            allow_filter: HashSet::new(),
            deny_filter: HashSet::new(),
        }
    }

    /// Only these server tools are exposed (empty = all).
    pub fn with_allow_filter(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.allow_filter = tools.into_iter().collect();
        self
    }

    pub fn with_deny_filter(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.deny_filter = tools.into_iter().collect();
        self
    }

    pub fn to_specs(&self, tools: &[McpTool]) -> Vec<ToolSpec> {
        tools
            .iter()
            .filter(|t| self.is_tool_allowed(&t.name))
            .map(|t| ToolSpec {
                name: self.namespaced_name(&t.name),
                description: t.description.clone(),
                input_schema: t
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            })
            .collect()
    }

    pub fn to_output(&self, result: &McpToolResult) -> RemoteToolOutput {
        let content = result
            .content
            .iter()
            .filter_map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        RemoteToolOutput {
            content,
            is_error: result.is_error,
        }
    }

    fn is_tool_allowed(&self, name: &str) -> bool {
        if self.deny_filter.contains(name) {
            return false;
        }
        self.allow_filter.is_empty() || self.allow_filter.contains(name)
    }

    fn namespaced_name(&self, name: &str) -> String {
        format!("{}{}", self.namespace, name)
    }

    /// Server-side tool name for a namespaced name, if it belongs to this server.
    pub fn strip_namespace(&self, namespaced: &str) -> Option<String> {
        namespaced
            .strip_prefix(&self.namespace)
            .filter(|n| self.is_tool_allowed(n))
            .map(String::from)
    }
}

/// Protocol revision announced in `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

const SESSION_HEADER: &str = "mcp-session-id";

/// MCP server reachable over the streamable HTTP transport.
#[derive(Debug)]
pub struct McpHttpProvider {
    server: String,
    endpoint: String,
    bridge: McpToolBridge,
    headers: Vec<(String, String)>,
    transport: HttpTransport,
    timeout: Duration,
    next_id: AtomicU64,
    /// Set once `initialize` succeeded; holds the server's session id, if any.
    session: OnceCell<Option<String>>,
}

impl McpHttpProvider {
    pub fn new(server: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let server = server.into();
        Ok(Self {
            bridge: McpToolBridge::new(&server),
            server,
            endpoint: endpoint.into(),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (
                    "accept".to_string(),
                    "application/json, text/event-stream".to_string(),
                ),
            ],
            transport: HttpTransport::new()?,
            timeout: Duration::from_secs(30),
            next_id: AtomicU64::new(1),
            session: OnceCell::new(),
        })
    }

    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        self.headers
            .push(("authorization".into(), format!("Bearer {}", token.as_ref())));
        self
    }

    pub fn with_bridge(mut self, bridge: McpToolBridge) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let session = self
            .session
            .get_or_try_init(|| self.initialize())
            .await?
            .clone();
        self.request(method, params, session.as_deref())
            .await
            .map(|(result, _)| result)
    }

    /// `initialize` followed by the `notifications/initialized` notification.
    async fn initialize(&self) -> Result<Option<String>> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let (result, session) = self.request("initialize", params, None).await?;
        debug!(
            server = %self.server,
            protocol = result["protocolVersion"].as_str().unwrap_or("unknown"),
            session = session.is_some(),
            "mcp session initialized"
        );
        self.post(
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            session.as_deref(),
            "notifications/initialized",
        )
        .await?;
        Ok(session)
    }

    /// One JSON-RPC request; returns the result and any session id issued.
    async fn request(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
    ) -> Result<(Value, Option<String>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(server = %self.server, method, id, "mcp request");
        let reply = self
            .post(
                json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }),
                session,
                method,
            )
            .await?;
        let issued = reply.header(SESSION_HEADER).map(String::from);
        let response = self.decode(&reply, id)?;
        if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Tool {
                name: format!("mcp:{}", self.server),
                message: format!(
                    "{} failed ({}): {}",
                    method,
                    err["code"].as_i64().unwrap_or_default(),
                    err["message"].as_str().unwrap_or("unknown error")
                ),
            });
        }
        let result = response.get("result").cloned().ok_or_else(|| {
            Error::parse_with_raw(
                self.server.clone(),
                "JSON-RPC response without result",
                response.to_string(),
            )
        })?;
        Ok((result, issued))
    }

    async fn post(&self, body: Value, session: Option<&str>, label: &str) -> Result<RawReply> {
        let mut headers = self.headers.clone();
        if let Some(id) = session {
            headers.push((SESSION_HEADER.to_string(), id.to_string()));
        }
        let request = ProviderRequest {
            url: self.endpoint.clone(),
            headers,
            body,
            stream: false,
        };
        self.transport
            .post_raw(&request, self.timeout, &self.server, label)
            .await
    }

    /// The JSON-RPC response with `id`, from a JSON or SSE body.
    fn decode(&self, reply: &RawReply, id: u64) -> Result<Value> {
        if reply.content_type() != Some("text/event-stream") {
            return serde_json::from_str(&reply.body).map_err(|e| {
                Error::parse_with_raw(
                    self.server.clone(),
                    format!("response body is not JSON: {}", e),
                    reply.body.clone(),
                )
            });
        }
        reply
            .body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
            .find(|message| message["id"].as_u64() == Some(id))
            .ok_or_else(|| {
                Error::parse_with_raw(
                    self.server.clone(),
                    format!("event stream carried no response for request {}", id),
                    reply.body.clone(),
                )
            })
    }
}

#[async_trait]
impl RemoteToolProvider for McpHttpProvider {
    fn name(&self) -> &str {
        &self.server
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let result = self.rpc("tools/list", json!({})).await?;
        let tools: Vec<McpTool> =
            serde_json::from_value(result.get("tools").cloned().unwrap_or_else(|| json!([])))?;
        Ok(self.bridge.to_specs(&tools))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteToolOutput> {
        let original = self.bridge.strip_namespace(name).ok_or_else(|| Error::Tool {
            name: name.to_string(),
            message: format!("tool is not served by MCP server '{}'", self.server),
        })?;
        let result = self
            .rpc(
                "tools/call",
                json!({ "name": original, "arguments": arguments }),
            )
            .await?;
        let parsed: McpToolResult = serde_json::from_value(result)?;
        Ok(self.bridge.to_output(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolBridge;
    use crate::types::ToolCall;
    use std::sync::Arc;

    fn sample_tools() -> Vec<McpTool> {
        vec![
            McpTool {
                name: "read_file".into(),
                description: Some("Read a file".into()),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                })),
            },
            McpTool {
                name: "exec_dangerous".into(),
                description: None,
                input_schema: None,
            },
        ]
    }

    #[test]
    fn test_namespacing_and_filters() {
        let bridge = McpToolBridge::new("files");
        let specs = bridge.to_specs(&sample_tools());
        assert_eq!(specs[0].name, "mcp__files__read_file");
        assert_eq!(specs[1].input_schema["type"], "object");

        let denied = McpToolBridge::new("files").with_deny_filter(vec!["exec_dangerous".into()]);
        assert_eq!(denied.to_specs(&sample_tools()).len(), 1);
        assert!(denied.strip_namespace("mcp__files__exec_dangerous").is_none());
        assert!(denied.strip_namespace("mcp__other__read_file").is_none());

        let allowed = McpToolBridge::new("files").with_allow_filter(vec!["read_file".into()]);
        assert_eq!(
            allowed.strip_namespace("mcp__files__read_file").as_deref(),
            Some("read_file")
        );
    }

    #[test]
    fn test_error_result_text_joined() {
        let result: McpToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "not"}, {"type": "text", "text": "found"}],
            "isError": true
        }))
        .unwrap();
        let out = McpToolBridge::new("s").to_output(&result);
        assert!(out.is_error);
        assert_eq!(out.content, "not\nfound");
    }

    #[tokio::test]
    async fn test_list_and_call_over_http() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({
                "method": "initialize",
                "params": {"protocolVersion": MCP_PROTOCOL_VERSION}
            })))
            .match_header("mcp-session-id", mockito::Matcher::Missing)
            .with_header("mcp-session-id", "sess-42")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": {
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "calc", "version": "1.0"}
                }})
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let initialized = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(
                json!({"method": "notifications/initialized"}),
            ))
            .match_header("mcp-session-id", "sess-42")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;
        let list = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "tools/list"})))
            .match_header("mcp-session-id", "sess-42")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [
                    {"name": "add", "description": "Add", "inputSchema": {"type": "object"}}
                ]}})
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        // answered as an event stream, with a progress notification first
        let call = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({
                "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 1, "b": 2}}
            })))
            .match_header("mcp-session-id", "sess-42")
            .with_header("content-type", "text/event-stream")
            .with_body(format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}}),
                json!({"jsonrpc": "2.0", "id": 3, "result": {
                    "content": [{"type": "text", "text": "3"}]
                }})
            ))
            .expect(1)
            .create_async()
            .await;

        let provider =
            Arc::new(McpHttpProvider::new("calc", format!("{}/mcp", server.url())).unwrap());
        let mut bridge = ToolBridge::new();
        assert_eq!(bridge.attach_remote(provider).await.unwrap(), 1);
        assert_eq!(bridge.list_tools()[0].name, "mcp__calc__add");

        let result = bridge
            .execute(&ToolCall {
                id: "t1".into(),
                name: "mcp__calc__add".into(),
                arguments: json!({"a": 1, "b": 2}),
            })
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "3");

        init.assert_async().await;
        initialized.assert_async().await;
        list.assert_async().await;
        call.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_without_sessions() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "initialize"})))
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": {}}).to_string())
            .create_async()
            .await;
        let _initialized = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(
                json!({"method": "notifications/initialized"}),
            ))
            .with_status(202)
            .create_async()
            .await;
        let list = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "tools/list"})))
            .match_header("mcp-session-id", mockito::Matcher::Missing)
            .with_body(json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": []}}).to_string())
            .expect(2)
            .create_async()
            .await;

        let provider = McpHttpProvider::new("bare", format!("{}/mcp", server.url())).unwrap();
        assert!(provider.list_tools().await.unwrap().is_empty());
        assert!(provider.list_tools().await.unwrap().is_empty());
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_initialize_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "initialize"})))
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "unsupported protocol"}})
                    .to_string(),
            )
            .create_async()
            .await;
        let list = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "tools/list"})))
            .expect(0)
            .create_async()
            .await;

        let provider = McpHttpProvider::new("old", format!("{}/mcp", server.url())).unwrap();
        let err = provider.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("unsupported protocol"));
        list.assert_async().await;
    }
}
