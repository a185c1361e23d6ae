//! 模型注册表：通过前缀把模型标识符解析到适配器，并维护候选链
//!
//! Model registry and candidate chains.
//!
//! Adapters are kept in an ordered list. [`ModelRegistry::resolve`] returns the
//! first adapter, in registration order, that claims a prefix of the model
//! identifier; overlapping prefixes are therefore resolved by registration
//! order. A [`CandidateChain`] is the immutable, ordered list of
//! [`CandidateModel`]s one chat handle executes against, plus the shared
//! round-robin cursor.

pub mod shortcuts;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::adapters::ProviderAdapter;
use crate::types::GenerationParams;
use crate::{Error, ErrorContext, Result};

pub use shortcuts::{ProviderToggles, Shortcut, SHORTCUTS};

/// Ordered adapter list with prefix resolution.
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Adapters attached earlier win on overlapping prefixes.
    pub fn attach(&mut self, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
        for existing in &self.adapters {
            let overlap: Vec<&String> = adapter
                .prefixes()
                .iter()
                .filter(|p| {
                    existing
                        .prefixes()
                        .iter()
                        .any(|q| p.starts_with(q.as_str()) || q.starts_with(p.as_str()))
                })
                .collect();
            if !overlap.is_empty() {
                debug!(
                    adapter = adapter.name(),
                    shadowed_by = existing.name(),
                    prefixes = ?overlap,
                    "overlapping model prefixes; earlier registration wins"
                );
            }
        }
        self.adapters.push(adapter);
        self
    }

    pub fn resolve(&self, model: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.matches_identifier(model))
            .cloned()
            .ok_or_else(|| {
                Error::configuration_with_context(
                    format!("no adapter matches model identifier '{}'", model),
                    ErrorContext::new()
                        .with_field_path("model")
                        .with_details(format!(
                            "registered adapters: [{}]",
                            self.adapters
                                .iter()
                                .map(|a| a.name())
                                .collect::<Vec<_>>()
                                .join(", ")
                        )),
                )
            })
    }

    pub fn adapters(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// Candidate for `model` resolved by prefix.
    pub fn candidate(&self, model: &str) -> Result<CandidateModel> {
        Ok(CandidateModel::new(self.resolve(model)?, model))
    }

    /// Candidate bound to a named adapter, bypassing prefix resolution.
    pub fn candidate_on(&self, adapter_name: &str, model: &str) -> Result<CandidateModel> {
        let adapter = self.find_by_name(adapter_name).ok_or_else(|| {
            Error::configuration(format!(
                "adapter '{}' is not registered (needed for model '{}')",
                adapter_name, model
            ))
        })?;
        Ok(CandidateModel::new(adapter, model))
    }
}

/// Per-candidate settings layered over the instance configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOverrides {
    pub params: GenerationParams,
    pub timeout_ms: Option<u64>,
}

impl Default for CandidateOverrides {
    fn default() -> Self {
        Self {
            params: GenerationParams::unset(),
            timeout_ms: None,
        }
    }
}

/// One (adapter, model identifier) pairing.
#[derive(Debug, Clone)]
pub struct CandidateModel {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub model: String,
    pub overrides: CandidateOverrides,
}

impl CandidateModel {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
            overrides: CandidateOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: CandidateOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn provider(&self) -> &str {
        self.adapter.name()
    }
}

/// Immutable candidate list plus the round-robin cursor shared by every
/// handle created from this chain.
#[derive(Debug, Clone)]
pub struct CandidateChain {
    candidates: Arc<[CandidateModel]>,
    cursor: Arc<AtomicUsize>,
}

impl CandidateChain {
    pub fn new(candidates: Vec<CandidateModel>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(Error::configuration(
                "candidate chain needs at least one model",
            ));
        }
        Ok(Self {
            candidates: candidates.into(),
            cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn candidates(&self) -> &[CandidateModel] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Position for the next top-level invocation; advances by one every call.
    pub fn advance(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::SeqCst) % self.candidates.len()
    }

    /// Current cursor position without advancing.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst) % self.candidates.len()
    }

    /// Candidates in attempt order starting at `start`, wrapping around.
    pub fn rotated(&self, start: usize) -> impl Iterator<Item = &CandidateModel> {
        let n = self.candidates.len();
        (0..n).map(move |i| &self.candidates[(start + i) % n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AnthropicAdapter, Credentials, OpenAiAdapter};

    fn registry() -> ModelRegistry {
        let mut r = ModelRegistry::new();
        r.attach(Arc::new(OpenAiAdapter::openai(Credentials::None)))
            .attach(Arc::new(AnthropicAdapter::new(Credentials::None)));
        r
    }

    #[test]
    fn test_resolve_by_prefix() {
        let r = registry();
        assert_eq!(r.resolve("gpt-4o-mini").unwrap().name(), "openai");
        assert_eq!(r.resolve("claude-3-5-haiku-latest").unwrap().name(), "anthropic");
    }

    #[test]
    fn test_unmatched_identifier_is_configuration_error() {
        let err = registry().resolve("mystery-model").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("mystery-model"));
    }

    #[test]
    fn test_overlapping_prefixes_resolve_in_registration_order() {
        let mut r = ModelRegistry::new();
        r.attach(Arc::new(
            OpenAiAdapter::compatible("first", "http://a", Credentials::None)
                .with_prefixes(vec!["llama".to_string()]),
        ))
        .attach(Arc::new(
            OpenAiAdapter::compatible("second", "http://b", Credentials::None)
                .with_prefixes(vec!["llama-3".to_string()]),
        ));
        assert_eq!(r.resolve("llama-3.3-70b").unwrap().name(), "first");
    }

    #[test]
    fn test_chain_rotation() {
        let r = registry();
        let chain = CandidateChain::new(vec![
            r.candidate("gpt-4o").unwrap(),
            r.candidate("claude-sonnet-4-0").unwrap(),
            r.candidate("gpt-4o-mini").unwrap(),
        ])
        .unwrap();
        let picks: Vec<usize> = (0..5).map(|_| chain.advance()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);
        let order: Vec<&str> = chain.rotated(2).map(|c| c.model.as_str()).collect();
        assert_eq!(order, vec!["gpt-4o-mini", "gpt-4o", "claude-sonnet-4-0"]);

        let shared = chain.clone();
        assert_eq!(shared.advance(), 2);
        assert_eq!(chain.position(), 0);
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(CandidateChain::new(Vec::new()).is_err());
    }
}
