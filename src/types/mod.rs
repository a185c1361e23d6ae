//! # Types Module
//!
//! Provider-agnostic shapes that flow between the caller-facing [`Chat`](crate::Chat)
//! handle, the execution engine and the adapters.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Conversation entry with role and ordered content parts |
//! | [`ContentPart`] | Text, image, tool call or tool result |
//! | [`NormalizedRequest`] | One logical request before provider mapping |
//! | [`NormalizedResponse`] | Unified response with usage and raw payload |
//! | [`StreamDelta`] | Incremental output parsed from one stream chunk |
//! | [`ToolSpec`] / [`ToolCall`] / [`ToolResult`] | Tool calling shapes |
//!
//! ```rust
//! use ai_lib_relay::types::{Message, NormalizedRequest};
//!
//! let request = NormalizedRequest::new(vec![Message::user("What's the weather?")])
//!     .with_system("You are terse.");
//! assert_eq!(request.messages.len(), 1);
//! ```

pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use message::{ContentPart, ImageSource, Message, MessageRole};
pub use request::{GenerationParams, NormalizedRequest, ResponseFormat};
pub use response::{NormalizedResponse, StreamDelta, TokenUsage};
pub use tool::{ToolCall, ToolResult, ToolSpec};
