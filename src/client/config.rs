//! Relay configuration and per-call resolution.
//!
//! Precedence, lowest to highest:
//!
//! 1. crate defaults (`RelayConfig::default()`)
//! 2. the instance [`RelayConfig`] given to the builder
//! 3. the candidate's [`CandidateOverrides`]
//! 4. the call's [`CallOverrides`]
//!
//! [`resolve_call_config`] folds these into one immutable [`CallConfig`] per
//! attempt; nothing else in the crate merges settings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::registry::{CandidateOverrides, ProviderToggles};
use crate::resilience::RateLimiterConfig;
use crate::telemetry::DebugLevel;
use crate::types::GenerationParams;
use crate::{Error, ErrorContext, Result};

/// Instance-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub generation: GenerationParams,
    /// Negative = unlimited, 0 = none, N = last N entries.
    pub max_history: i32,
    pub debug: DebugLevel,
    pub rate_limit: RateLimiterConfig,
    pub round_robin: bool,
    /// With round-robin, keep falling back from the pointed candidate.
    pub fallback_with_round_robin: bool,
    /// Per network attempt.
    pub timeout_ms: u64,
    pub max_tool_iterations: u32,
    pub providers: ProviderToggles,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            generation: GenerationParams::default(),
            max_history: 1,
            debug: DebugLevel::default(),
            rate_limit: RateLimiterConfig::default(),
            round_robin: false,
            fallback_with_round_robin: false,
            timeout_ms: 120_000,
            max_tool_iterations: 10,
            providers: ProviderToggles::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid relay configuration: {}", e),
                ErrorContext::new().with_source("yaml"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_value(value: Value) -> Result<Self> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid relay configuration: {}", e),
                ErrorContext::new().with_source("json"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::configuration_with_context(
                "timeout must be positive",
                ErrorContext::new().with_field_path("timeout_ms"),
            ));
        }
        self.rate_limit.validate()
    }
}

/// Settings for one top-level call; unset fields inherit.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOverrides {
    pub params: GenerationParams,
    pub timeout_ms: Option<u64>,
    pub max_tool_iterations: Option<u32>,
    pub debug: Option<DebugLevel>,
}

impl Default for CallOverrides {
    fn default() -> Self {
        Self {
            params: GenerationParams::unset(),
            timeout_ms: None,
            max_tool_iterations: None,
            debug: None,
        }
    }
}

impl CallOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.params.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.params.max_tokens = Some(n);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn max_tool_iterations(mut self, n: u32) -> Self {
        self.max_tool_iterations = Some(n);
        self
    }

    pub fn debug(mut self, level: DebugLevel) -> Self {
        self.debug = Some(level);
        self
    }
}

/// Fully resolved settings for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    pub params: GenerationParams,
    pub timeout: Duration,
    pub max_tool_iterations: u32,
    pub debug: DebugLevel,
}

pub fn resolve_call_config(
    config: &RelayConfig,
    candidate: &CandidateOverrides,
    call: &CallOverrides,
) -> CallConfig {
    let params = config
        .generation
        .merged_with(&candidate.params)
        .merged_with(&call.params);
    let timeout_ms = call
        .timeout_ms
        .or(candidate.timeout_ms)
        .unwrap_or(config.timeout_ms);
    CallConfig {
        params,
        timeout: Duration::from_millis(timeout_ms),
        max_tool_iterations: call
            .max_tool_iterations
            .unwrap_or(config.max_tool_iterations),
        debug: call.debug.unwrap_or(config.debug),
    }
}
