//! # ai-lib-relay
//!
//! 多厂商对话生成中继：候选回退、轮询、限流、工具调用循环与结构化输出，统一为一个请求/响应契约。
//!
//! Multi-provider conversational generation relay. Describe one request and
//! have it executed against any of several differently shaped provider APIs,
//! with candidate fallback, round-robin rotation, shared rate limiting,
//! multi-turn tool calling and structured output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_relay::adapters::{create_adapter, AdapterKind, Credentials};
//! use ai_lib_relay::Chat;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_relay::Result<()> {
//!     let mut chat = Chat::builder()
//!         .attach(create_adapter(AdapterKind::Anthropic, Credentials::api_key("sk-ant-...")))
//!         .attach(create_adapter(AdapterKind::OpenAi, Credentials::api_key("sk-...")))
//!         .model("claude-3-5-haiku-latest")
//!         .model("gpt-4o-mini") // fallback
//!         .system("You are terse.")
//!         .build()?;
//!
//!     chat.add_text("Name the largest moon of Saturn.");
//!     println!("{}", chat.message().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Chat`] handle, builder, configuration and execution engine |
//! | [`adapters`] | Per-provider request/response translation |
//! | [`registry`] | Prefix resolution, candidate chains, model shortcuts |
//! | [`conversation`] | History windowing, role grouping, placeholders |
//! | [`structured`] | Schema inference, validation, JSON mode |
//! | [`tools`] | Tool bridge, local handlers, MCP providers |
//! | [`resilience`] | Shared rate limiter |
//! | [`transport`] | HTTP transport and line framing |
//! | [`telemetry`] | Debug levels and subscriber installation |
//! | [`types`] | Normalized request/response shapes |

pub mod adapters;
pub mod client;
pub mod conversation;
pub mod registry;
pub mod resilience;
pub mod structured;
pub mod telemetry;
pub mod tools;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use adapters::{create_adapter, AdapterKind, Credentials, ProviderAdapter};
pub use client::{CallOverrides, Chat, ChatBuilder, RelayConfig};
pub use registry::ModelRegistry;
pub use telemetry::DebugLevel;
pub use types::{
    ContentPart, Message, MessageRole, NormalizedRequest, NormalizedResponse, StreamDelta,
    ToolCall, ToolSpec,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
