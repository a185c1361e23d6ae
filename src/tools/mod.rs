//! 工具桥接：注册本地函数与远程工具提供者，执行模型返回的工具调用
//!
//! Tool bridge. Holds caller-supplied tool handlers and remote tool providers,
//! exposes their declarations for injection into requests, and executes the
//! tool calls a model returns.
//!
//! Handler failures never escape [`ToolBridge::execute`]: they become a
//! [`ToolResult`] with `is_error = true` whose text is fed back to the model.

pub mod mcp;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::types::{ToolCall, ToolResult, ToolSpec};
use crate::{Error, Result};

pub use mcp::{McpHttpProvider, McpToolBridge};

/// A local tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value>;
}

/// Output of a remote tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteToolOutput {
    pub content: String,
    pub is_error: bool,
}

/// A source of tools living outside the process (e.g. an MCP server).
#[async_trait]
pub trait RemoteToolProvider: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Declarations, already namespaced and filtered.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteToolOutput>;
}

type BoxedToolFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Closure-backed [`ToolHandler`].
pub struct FnTool {
    f: Box<BoxedToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            f: Box::new(move |args| Box::pin(f(args))),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |args| {
            let f = f.clone();
            async move { f(args) }
        })
    }
}

#[async_trait]
impl ToolHandler for FnTool {
    async fn call(&self, arguments: Value) -> Result<Value> {
        (self.f)(arguments).await
    }
}

/// A declaration plus the handler that serves it.
#[derive(Clone)]
pub struct ToolDefinition {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(spec: ToolSpec, handler: impl ToolHandler + 'static) -> Self {
        Self {
            spec,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct RemoteTool {
    spec: ToolSpec,
    provider: Arc<dyn RemoteToolProvider>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolBridge {
    local: Vec<ToolDefinition>,
    remote: Vec<RemoteTool>,
}

impl ToolBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; an existing tool with the same name is replaced.
    pub fn add_tool(&mut self, definition: ToolDefinition) {
        self.remove_tool(&definition.spec.name);
        self.local.push(definition);
    }

    pub fn add_tools(&mut self, definitions: impl IntoIterator<Item = ToolDefinition>) {
        for d in definitions {
            self.add_tool(d);
        }
    }

    /// Remove a local or remote tool by name. Returns whether one was removed.
    pub fn remove_tool(&mut self, name: &str) -> bool {
        let before = self.local.len() + self.remote.len();
        self.local.retain(|t| t.spec.name != name);
        self.remote.retain(|t| t.spec.name != name);
        before != self.local.len() + self.remote.len()
    }

    /// Fetch a remote provider's tools and register them. Returns how many were added.
    pub async fn attach_remote(&mut self, provider: Arc<dyn RemoteToolProvider>) -> Result<usize> {
        let specs = provider.list_tools().await?;
        let count = specs.len();
        for spec in specs {
            self.remove_tool(&spec.name);
            self.remote.push(RemoteTool {
                spec,
                provider: provider.clone(),
            });
        }
        debug!(provider = provider.name(), tools = count, "remote tools attached");
        Ok(count)
    }

    /// Declarations in registration order, local tools first.
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.local
            .iter()
            .map(|t| t.spec.clone())
            .chain(self.remote.iter().map(|t| t.spec.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.local.iter().any(|t| t.spec.name == name)
            || self.remote.iter().any(|t| t.spec.name == name)
    }

    /// Invoke a tool by name, surfacing failures as `Error::Tool`.
    pub async fn call_raw(&self, name: &str, arguments: Value) -> Result<String> {
        if let Some(tool) = self.local.iter().find(|t| t.spec.name == name) {
            let value = tool
                .handler
                .call(arguments)
                .await
                .map_err(|e| tool_error(name, e))?;
            return Ok(stringify(value));
        }
        if let Some(tool) = self.remote.iter().find(|t| t.spec.name == name) {
            let out = tool
                .provider
                .call_tool(name, arguments)
                .await
                .map_err(|e| tool_error(name, e))?;
            if out.is_error {
                return Err(Error::Tool {
                    name: name.to_string(),
                    message: out.content,
                });
            }
            return Ok(out.content);
        }
        Err(Error::Tool {
            name: name.to_string(),
            message: "no such tool".to_string(),
        })
    }

    /// Execute one model-issued call. Never fails: errors become error results.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let arguments = match &call.arguments {
            // handlers always see an object or the value the model produced
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        match self.call_raw(&call.name, arguments).await {
            Ok(content) => ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: false,
            },
            Err(e) => {
                trace!(tool = %call.name, error = %e, "tool call failed");
                let message = match e {
                    Error::Tool { message, .. } => message,
                    other => other.to_string(),
                };
                ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: format!("Error: {}", message),
                    is_error: true,
                }
            }
        }
    }

    /// Execute calls in order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }
}

fn tool_error(name: &str, e: Error) -> Error {
    match e {
        Error::Tool { .. } => e,
        other => Error::Tool {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

/// Strings are passed through, everything else is serialized as JSON.
fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather() -> ToolDefinition {
        ToolDefinition::new(
            ToolSpec::new(
                "get_weather",
                "Current weather",
                json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            ),
            FnTool::from_sync(|args| {
                let city = args["city"].as_str().unwrap_or("?").to_string();
                Ok(json!({"city": city, "temp_c": 21}))
            }),
        )
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut bridge = ToolBridge::new();
        bridge.add_tool(weather());
        let r = bridge.execute(&call("get_weather", json!({"city": "Paris"}))).await;
        assert!(!r.is_error);
        assert_eq!(r.call_id, "c1");
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["city"], "Paris");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_text() {
        let mut bridge = ToolBridge::new();
        bridge.add_tool(ToolDefinition::new(
            ToolSpec::new("boom", "fails", json!({"type": "object"})),
            FnTool::new(|_| async { Err(Error::runtime("disk on fire")) }),
        ));
        let r = bridge.execute(&call("boom", json!({}))).await;
        assert!(r.is_error);
        assert!(r.content.contains("disk on fire"));
        let err = tokio_test::assert_err!(bridge.call_raw("boom", json!({})).await);
        assert!(matches!(err, Error::Tool { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let r = ToolBridge::new().execute(&call("nope", json!({}))).await;
        assert!(r.is_error);
        assert!(r.content.contains("no such tool"));
    }

    #[test]
    fn test_add_replace_remove_list() {
        let mut bridge = ToolBridge::new();
        bridge.add_tools(vec![weather(), weather()]);
        assert_eq!(bridge.list_tools().len(), 1);
        assert!(bridge.contains("get_weather"));
        assert!(bridge.remove_tool("get_weather"));
        assert!(!bridge.remove_tool("get_weather"));
        assert!(bridge.is_empty());
    }
}
