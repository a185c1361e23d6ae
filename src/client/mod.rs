//! 客户端模块：会话句柄、构建器、配置解析与执行引擎。
//!
//! Client module.
//!
//! - [`ChatBuilder`] wires a registry, a candidate chain, configuration, the
//!   shared limiter and tools into a [`Chat`]
//! - [`Chat`] is the caller-facing handle: add inputs, then `message()`,
//!   `raw()`, `stream()` or `json()`
//! - [`config`] holds [`RelayConfig`] and the single precedence rule used to
//!   resolve per-call settings

pub mod builder;
pub mod chat;
pub mod config;
mod engine;

pub use builder::ChatBuilder;
pub use chat::Chat;
pub use config::{resolve_call_config, CallConfig, CallOverrides, RelayConfig};
