//! Model shortcuts.
//!
//! A shortcut names a model that several providers host under different
//! identifiers. Expanding it yields one candidate per enabled provider, in the
//! order listed, so the result is a ready-made fallback chain.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CandidateModel, ModelRegistry};
use crate::{Error, Result};

/// Per-provider switches consulted when expanding multi-provider shortcuts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToggles {
    pub groq: bool,
    pub together: bool,
    pub openrouter: bool,
    pub deepseek: bool,
}

impl Default for ProviderToggles {
    fn default() -> Self {
        Self {
            groq: true,
            together: true,
            openrouter: true,
            deepseek: true,
        }
    }
}

impl ProviderToggles {
    pub fn is_enabled(&self, provider: &str) -> bool {
        match provider {
            "groq" => self.groq,
            "together" => self.together,
            "openrouter" => self.openrouter,
            "deepseek" => self.deepseek,
            // providers without a toggle are always eligible
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Shortcut {
    pub name: &'static str,
    /// `(adapter name, provider model identifier)` in preference order.
    pub targets: &'static [(&'static str, &'static str)],
}

pub static SHORTCUTS: &[Shortcut] = &[
    Shortcut {
        name: "llama-3.3-70b",
        targets: &[
            ("groq", "llama-3.3-70b-versatile"),
            ("together", "meta-llama/Llama-3.3-70B-Instruct-Turbo"),
            ("openrouter", "meta-llama/llama-3.3-70b-instruct"),
        ],
    },
    Shortcut {
        name: "llama-4-maverick",
        targets: &[
            ("groq", "meta-llama/llama-4-maverick-17b-128e-instruct"),
            ("together", "meta-llama/Llama-4-Maverick-17B-128E-Instruct-FP8"),
            ("openrouter", "meta-llama/llama-4-maverick"),
        ],
    },
    Shortcut {
        name: "deepseek-r1",
        targets: &[
            ("deepseek", "deepseek-reasoner"),
            ("together", "deepseek-ai/DeepSeek-R1"),
            ("openrouter", "deepseek/deepseek-r1"),
        ],
    },
    Shortcut {
        name: "deepseek-v3",
        targets: &[
            ("deepseek", "deepseek-chat"),
            ("together", "deepseek-ai/DeepSeek-V3"),
            ("openrouter", "deepseek/deepseek-chat"),
        ],
    },
    Shortcut {
        name: "kimi-k2",
        targets: &[
            ("groq", "moonshotai/kimi-k2-instruct"),
            ("together", "moonshotai/Kimi-K2-Instruct"),
            ("openrouter", "moonshotai/kimi-k2"),
        ],
    },
    Shortcut {
        name: "gpt-oss-120b",
        targets: &[
            ("groq", "openai/gpt-oss-120b"),
            ("together", "openai/gpt-oss-120b"),
            ("openrouter", "openai/gpt-oss-120b"),
        ],
    },
];

pub fn find(name: &str) -> Option<&'static Shortcut> {
    SHORTCUTS.iter().find(|s| s.name == name)
}

/// Expand a shortcut into candidates on enabled, registered providers.
pub fn expand(
    name: &str,
    toggles: &ProviderToggles,
    registry: &ModelRegistry,
) -> Result<Vec<CandidateModel>> {
    let shortcut =
        find(name).ok_or_else(|| Error::configuration(format!("unknown model shortcut '{}'", name)))?;
    let mut out = Vec::new();
    for (provider, model) in shortcut.targets {
        if !toggles.is_enabled(provider) {
            debug!(shortcut = name, provider, "provider disabled for shortcut");
            continue;
        }
        match registry.find_by_name(provider) {
            Some(adapter) => out.push(CandidateModel::new(adapter, *model)),
            None => debug!(shortcut = name, provider, "provider not registered; skipping"),
        }
    }
    if out.is_empty() {
        return Err(Error::configuration(format!(
            "shortcut '{}' has no enabled, registered provider",
            name
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{create_adapter, AdapterKind, Credentials};

    fn registry() -> ModelRegistry {
        let mut r = ModelRegistry::new();
        for kind in [AdapterKind::Groq, AdapterKind::Together, AdapterKind::OpenRouter] {
            r.attach(create_adapter(kind, Credentials::api_key("k")));
        }
        r
    }

    #[test]
    fn test_expand_in_fixed_order() {
        let c = expand("kimi-k2", &ProviderToggles::default(), &registry()).unwrap();
        let providers: Vec<&str> = c.iter().map(|c| c.provider()).collect();
        assert_eq!(providers, vec!["groq", "together", "openrouter"]);
        assert_eq!(c[1].model, "moonshotai/Kimi-K2-Instruct");
    }

    #[test]
    fn test_toggles_remove_providers() {
        let toggles = ProviderToggles {
            groq: false,
            ..Default::default()
        };
        let c = expand("llama-3.3-70b", &toggles, &registry()).unwrap();
        assert_eq!(c[0].provider(), "together");
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_all_disabled_is_configuration_error() {
        let toggles = ProviderToggles {
            groq: false,
            together: false,
            openrouter: false,
            deepseek: false,
        };
        assert!(matches!(
            expand("kimi-k2", &toggles, &registry()),
            Err(Error::Configuration { .. })
        ));
        assert!(expand("nope", &ProviderToggles::default(), &registry()).is_err());
    }
}
