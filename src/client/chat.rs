use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::conversation::{ConversationState, HistoryPolicy};
use crate::registry::{CandidateChain, CandidateModel};
use crate::resilience::{RateLimiter, RateLimiterSnapshot};
use crate::structured::{json_schema_from_type, Descriptions, JsonOptions, StructuredPlan};
use crate::tools::{RemoteToolProvider, ToolBridge, ToolDefinition, ToolHandler};
use crate::types::{ContentPart, Message, NormalizedResponse, StreamDelta, ToolSpec};
use crate::{Error, Result};

use super::builder::ChatBuilder;
use super::config::{CallOverrides, RelayConfig};
use super::engine::{Engine, RequestShape};

/// Caller-facing conversation handle.
///
/// A `Chat` owns its conversation state; calls take `&mut self`, so two
/// concurrent calls on one handle need caller-side synchronization. Use
/// [`Chat::fork`] for an independent conversation on the same candidates.
#[derive(Debug)]
pub struct Chat {
    engine: Engine,
    state: ConversationState,
    tools: ToolBridge,
    last: Option<NormalizedResponse>,
}

impl Chat {
    pub fn builder() -> ChatBuilder {
        ChatBuilder::new()
    }

    pub(crate) fn from_parts(engine: Engine, state: ConversationState, tools: ToolBridge) -> Self {
        Self {
            engine,
            state,
            tools,
            last: None,
        }
    }

    // ---- input ----

    pub fn add_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.state.add_text(text);
        self
    }

    pub fn add_image_bytes(&mut self, bytes: &[u8], media_type: Option<&str>) -> &mut Self {
        self.state
            .add_part(ContentPart::image_from_bytes(bytes, media_type));
        self
    }

    pub fn add_image_path(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        self.state.add_part(ContentPart::image_from_file(path)?);
        Ok(self)
    }

    /// Download an image and add it inline (same timeout as model calls).
    pub async fn add_image_url(&mut self, url: &str) -> Result<&mut Self> {
        let timeout = std::time::Duration::from_millis(self.engine.config.timeout_ms);
        let (bytes, media_type) = self.engine.transport.get_bytes(url, timeout).await?;
        self.state
            .add_part(ContentPart::image_from_bytes(&bytes, media_type.as_deref()));
        Ok(self)
    }

    pub fn set_system(&mut self, text: impl Into<String>) -> &mut Self {
        self.state.set_system(text);
        self
    }

    /// Register placeholder replacements applied at send time.
    pub fn replace<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.state.placeholders_mut().extend(entries);
        self
    }

    // ---- execution ----

    /// Send and return the reply text.
    pub async fn message(&mut self) -> Result<String> {
        Ok(self.raw().await?.text)
    }

    pub async fn raw(&mut self) -> Result<NormalizedResponse> {
        self.raw_with(&CallOverrides::default()).await
    }

    pub async fn raw_with(&mut self, overrides: &CallOverrides) -> Result<NormalizedResponse> {
        self.execute(&RequestShape::default(), overrides, &mut |_: &StreamDelta| {})
            .await
    }

    /// Stream the reply, calling `on_delta` for every parsed chunk.
    ///
    /// On failure the deltas already delivered stay delivered and the error is
    /// returned.
    pub async fn stream<F>(&mut self, mut on_delta: F) -> Result<NormalizedResponse>
    where
        F: FnMut(&StreamDelta) + Send,
    {
        let shape = RequestShape {
            stream: true,
            ..Default::default()
        };
        self.execute(&shape, &CallOverrides::default(), &mut on_delta)
            .await
    }

    /// Structured output shaped like `example`.
    ///
    /// The schema is inferred from the example (plus `descriptions`), sent to
    /// the provider and used to validate the reply. Root-level arrays are
    /// wrapped for transmission and unwrapped in the result.
    pub async fn json(
        &mut self,
        example: &Value,
        descriptions: Option<&Descriptions>,
        options: Option<JsonOptions>,
    ) -> Result<Value> {
        let options = options.unwrap_or_default();
        let plan = StructuredPlan::from_example(example, descriptions, &options)?;
        self.run_structured(&plan).await
    }

    /// Structured output deserialized into `T`, schema derived from `T`.
    pub async fn json_typed<T>(&mut self, options: Option<JsonOptions>) -> Result<T>
    where
        T: schemars::JsonSchema + DeserializeOwned,
    {
        let options = options.unwrap_or_default();
        let plan = StructuredPlan::from_schema(json_schema_from_type::<T>(), &options)?;
        let value = self.run_structured(&plan).await?;
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::validation(
                format!("reply does not match the target type: {}", e),
                vec![e.to_string()],
                Some(value),
            )
        })
    }

    async fn run_structured(&mut self, plan: &StructuredPlan) -> Result<Value> {
        let shape = RequestShape {
            response_format: plan.response_format.clone(),
            system_suffix: plan.instruction.clone(),
            stream: false,
        };
        let response = self
            .execute(&shape, &CallOverrides::default(), &mut |_: &StreamDelta| {})
            .await?;
        plan.finish(&response.provider, &response.text)
    }

    async fn execute(
        &mut self,
        shape: &RequestShape,
        overrides: &CallOverrides,
        on_delta: &mut (dyn FnMut(&StreamDelta) + Send),
    ) -> Result<NormalizedResponse> {
        let response = self
            .engine
            .run(&mut self.state, &self.tools, shape, overrides, on_delta)
            .await?;
        self.last = Some(response.clone());
        Ok(response)
    }

    // ---- tools ----

    pub fn add_tool(&mut self, spec: ToolSpec, handler: impl ToolHandler + 'static) -> &mut Self {
        self.tools.add_tool(ToolDefinition::new(spec, handler));
        self
    }

    pub fn add_tools(&mut self, definitions: impl IntoIterator<Item = ToolDefinition>) -> &mut Self {
        self.tools.add_tools(definitions);
        self
    }

    pub fn remove_tool(&mut self, name: &str) -> bool {
        self.tools.remove_tool(name)
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.list_tools()
    }

    /// Register every tool a remote provider (e.g. an MCP server) offers.
    pub async fn attach_remote(&mut self, provider: Arc<dyn RemoteToolProvider>) -> Result<usize> {
        self.tools.attach_remote(provider).await
    }

    // ---- inspection ----

    pub fn history(&self) -> &[Message] {
        self.state.messages()
    }

    pub fn clear_history(&mut self) {
        self.state.clear();
    }

    pub fn last_response(&self) -> Option<&NormalizedResponse> {
        self.last.as_ref()
    }

    /// Candidates in configured order.
    pub fn candidates(&self) -> &[CandidateModel] {
        self.engine.chain.candidates()
    }

    pub fn chain(&self) -> &CandidateChain {
        &self.engine.chain
    }

    pub fn config(&self) -> &RelayConfig {
        &self.engine.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.engine.limiter
    }

    pub fn limiter_snapshot(&self) -> RateLimiterSnapshot {
        self.engine.limiter.snapshot()
    }

    /// New handle with an empty conversation on the same candidate chain
    /// (sharing its round-robin cursor), limiter, tools and system prompt.
    pub fn fork(&self) -> Chat {
        let mut state = ConversationState::new(HistoryPolicy::from_max_history(
            self.engine.config.max_history,
        ));
        if let Some(system) = self.state.system() {
            state.set_system(system);
        }
        Chat::from_parts(self.engine.clone(), state, self.tools.clone())
    }
}
