//! 日志级别与订阅器安装：控制引擎输出的调试详细程度
//!
//! Debug verbosity and `tracing` subscriber installation.
//!
//! The engine always logs through `tracing`; [`DebugLevel`] decides how much it
//! emits. [`install_subscriber`] is a convenience for applications that have no
//! subscriber of their own. The filter directive is always explicit; nothing is
//! read from the process environment.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Engine verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    /// Nothing above `trace`.
    Silent,
    /// One record per top-level call.
    #[default]
    Minimal,
    /// Plus per-attempt outcomes and token usage.
    Summary,
    /// Plus request and response payloads.
    Full,
}

impl DebugLevel {
    pub fn logs_calls(self) -> bool {
        self >= DebugLevel::Minimal
    }

    pub fn logs_attempts(self) -> bool {
        self >= DebugLevel::Summary
    }

    pub fn logs_payloads(self) -> bool {
        self == DebugLevel::Full
    }

    /// Filter directive matching this level for the crate's own target.
    pub fn directive(self) -> &'static str {
        match self {
            DebugLevel::Silent => "ai_lib_relay=error",
            DebugLevel::Minimal | DebugLevel::Summary => "ai_lib_relay=info",
            DebugLevel::Full => "ai_lib_relay=debug",
        }
    }
}

/// Install a global fmt subscriber for `level`.
///
/// Returns `false` when a global subscriber is already set.
pub fn install_subscriber(level: DebugLevel) -> bool {
    install_subscriber_with_directive(level.directive())
}

/// Install a global fmt subscriber with a caller-supplied filter directive
/// (e.g. `"ai_lib_relay=debug,reqwest=warn"`).
pub fn install_subscriber_with_directive(directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(!DebugLevel::Silent.logs_calls());
        assert!(DebugLevel::Minimal.logs_calls());
        assert!(!DebugLevel::Minimal.logs_attempts());
        assert!(DebugLevel::Summary.logs_attempts());
        assert!(DebugLevel::Full.logs_payloads());
    }

    #[test]
    fn test_serde_lowercase() {
        let level: DebugLevel = serde_json::from_str("\"summary\"").unwrap();
        assert_eq!(level, DebugLevel::Summary);
        assert_eq!(serde_json::to_string(&DebugLevel::Full).unwrap(), "\"full\"");
    }

    #[test]
    fn test_second_install_is_noop() {
        let _ = install_subscriber(DebugLevel::Silent);
        assert!(!install_subscriber(DebugLevel::Full));
    }
}
