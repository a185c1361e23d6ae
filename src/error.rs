use crate::transport::TransportError;
use serde_json::Value;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.max_history", "candidates[1]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "model_registry", "chat_builder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One failed link of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub provider: String,
    pub model: String,
    pub status: Option<u16>,
    pub message: String,
}

/// Unified error type for the relay.
///
/// Candidate-level failures (`Transport`, `Parse`) advance a fallback chain;
/// everything else is surfaced immediately.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Transport error from {provider}/{model}{}: {message}", format_status(.status))]
    Transport {
        provider: String,
        model: String,
        status: Option<u16>,
        message: String,
        payload: Option<Value>,
        retry_after_ms: Option<u64>,
    },

    #[error("Parse error from {provider}: {message}")]
    Parse {
        provider: String,
        message: String,
        raw: Option<String>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: Vec<String>,
        value: Option<Value>,
    },

    #[error("All {} candidates failed; last: {last}", .attempts.len())]
    Exhaustion {
        attempts: Vec<AttemptFailure>,
        last: Box<Error>,
    },

    #[error("Tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("Network transport error: {0}")]
    Http(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {})", s),
        None => String::new(),
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn parse(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Parse {
            provider: provider.into(),
            message: msg.into(),
            raw: None,
        }
    }

    pub fn parse_with_raw(
        provider: impl Into<String>,
        msg: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        Error::Parse {
            provider: provider.into(),
            message: msg.into(),
            raw: Some(raw.into()),
        }
    }

    pub fn validation(msg: impl Into<String>, errors: Vec<String>, value: Option<Value>) -> Self {
        Error::Validation {
            message: msg.into(),
            errors,
            value,
        }
    }

    /// Whether this failure should advance a fallback chain instead of aborting the call.
    pub fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Parse { .. } | Error::Http(_)
        )
    }

    /// HTTP status of the failing attempt, looking through `Exhaustion`.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::Exhaustion { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Provider name of the failing attempt, looking through `Exhaustion`.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Error::Transport { provider, .. } | Error::Parse { provider, .. } => Some(provider),
            Error::Exhaustion { last, .. } => last.provider(),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
