use crate::adapters::ProviderAdapter;
use crate::conversation::{ConversationState, HistoryPolicy};
use crate::registry::{shortcuts, CandidateChain, CandidateModel, CandidateOverrides, ModelRegistry};
use crate::resilience::{RateLimiter, RateLimiterConfig};
use crate::telemetry::DebugLevel;
use crate::tools::{ToolBridge, ToolDefinition};
use crate::transport::HttpTransport;
use crate::types::GenerationParams;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

use super::chat::Chat;
use super::config::RelayConfig;
use super::engine::Engine;

/// How one chain entry is turned into candidates at build time.
#[derive(Debug, Clone)]
enum ModelEntry {
    /// Resolved by prefix.
    Resolve(String, CandidateOverrides),
    /// Bound to a named adapter.
    On(String, String, CandidateOverrides),
    /// Multi-provider shortcut.
    Shortcut(String),
}

/// Builder for [`Chat`] handles.
///
/// Models are added in fallback order. Credentials live in the adapters
/// attached to the registry; the builder never reads the environment.
#[derive(Debug, Default)]
pub struct ChatBuilder {
    registry: ModelRegistry,
    entries: Vec<ModelEntry>,
    chain: Option<CandidateChain>,
    config: RelayConfig,
    limiter: Option<Arc<RateLimiter>>,
    transport: Option<HttpTransport>,
    tools: ToolBridge,
    system: Option<String>,
}

impl ChatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a prepared registry (replaces adapters attached so far).
    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn attach(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.registry.attach(adapter);
        self
    }

    /// Append a model, resolved by identifier prefix.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.entries
            .push(ModelEntry::Resolve(model.into(), CandidateOverrides::default()));
        self
    }

    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for m in models {
            self = self.model(m);
        }
        self
    }

    /// Append a model with per-candidate overrides.
    pub fn model_with(mut self, model: impl Into<String>, overrides: CandidateOverrides) -> Self {
        self.entries.push(ModelEntry::Resolve(model.into(), overrides));
        self
    }

    /// Append a model served by a specific adapter, bypassing prefix resolution.
    pub fn model_on(mut self, adapter: impl Into<String>, model: impl Into<String>) -> Self {
        self.entries.push(ModelEntry::On(
            adapter.into(),
            model.into(),
            CandidateOverrides::default(),
        ));
        self
    }

    /// Append every enabled provider of a multi-provider shortcut (see
    /// [`shortcuts::SHORTCUTS`]).
    pub fn shortcut(mut self, name: impl Into<String>) -> Self {
        self.entries.push(ModelEntry::Shortcut(name.into()));
        self
    }

    /// Reuse an existing chain, sharing its round-robin cursor.
    pub fn chain(mut self, chain: CandidateChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn generation(mut self, params: GenerationParams) -> Self {
        self.config.generation = params;
        self
    }

    pub fn max_history(mut self, n: i32) -> Self {
        self.config.max_history = n;
        self
    }

    pub fn debug(mut self, level: DebugLevel) -> Self {
        self.config.debug = level;
        self
    }

    pub fn round_robin(mut self, enable: bool) -> Self {
        self.config.round_robin = enable;
        self
    }

    /// With round-robin, fall back through the rest of the chain on failure.
    pub fn fallback_with_round_robin(mut self, enable: bool) -> Self {
        self.config.fallback_with_round_robin = enable;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_tool_iterations(mut self, n: u32) -> Self {
        self.config.max_tool_iterations = n;
        self
    }

    pub fn rate_limit(mut self, cfg: RateLimiterConfig) -> Self {
        self.config.rate_limit = cfg;
        self
    }

    /// Share an existing limiter (e.g. one per process).
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn transport(mut self, transport: HttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn tool(mut self, definition: ToolDefinition) -> Self {
        self.tools.add_tool(definition);
        self
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system = Some(text.into());
        self
    }

    fn candidates(&self) -> Result<Vec<CandidateModel>> {
        let mut out = Vec::new();
        for entry in &self.entries {
            match entry {
                ModelEntry::Resolve(model, overrides) => {
                    out.push(self.registry.candidate(model)?.with_overrides(overrides.clone()))
                }
                ModelEntry::On(adapter, model, overrides) => out.push(
                    self.registry
                        .candidate_on(adapter, model)?
                        .with_overrides(overrides.clone()),
                ),
                ModelEntry::Shortcut(name) => out.extend(shortcuts::expand(
                    name,
                    &self.config.providers,
                    &self.registry,
                )?),
            }
        }
        Ok(out)
    }

    pub fn build(self) -> Result<Chat> {
        self.config.validate()?;

        let chain = match &self.chain {
            Some(chain) if self.entries.is_empty() => chain.clone(),
            Some(_) => {
                return Err(Error::configuration(
                    "use either an existing chain or model entries, not both",
                ))
            }
            None => CandidateChain::new(self.candidates()?)?,
        };
        let limiter = match self.limiter {
            Some(l) => l,
            None => Arc::new(RateLimiter::new(self.config.rate_limit.clone())),
        };
        let transport = match self.transport {
            Some(t) => t,
            None => HttpTransport::new()?,
        };

        let mut state =
            ConversationState::new(HistoryPolicy::from_max_history(self.config.max_history));
        if let Some(system) = self.system {
            state.set_system(system);
        }

        let engine = Engine {
            chain,
            limiter,
            transport,
            config: Arc::new(self.config),
        };
        Ok(Chat::from_parts(engine, state, self.tools))
    }
}
