//! 弹性模块：共享限流器，控制并发与调用间隔。
//!
//! # Resilience Module
//!
//! Every outbound network attempt, including each turn of a tool loop, passes
//! through one shared [`RateLimiter`](rate_limiter::RateLimiter):
//!
//! - **max_concurrent**: simultaneous in-flight calls
//! - **min_time_ms**: minimum spacing between call starts
//! - **reservoir**: optional periodic start budget
//!
//! ```rust
//! use ai_lib_relay::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> ai_lib_relay::Result<()> {
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new()
//!         .with_max_concurrent(2)
//!         .with_min_time(Duration::from_millis(100)),
//! );
//! let permit = limiter.acquire().await?;
//! // ... perform the call ...
//! drop(permit);
//! # Ok(())
//! # }
//! ```

pub mod rate_limiter;

pub use rate_limiter::{LimiterPermit, RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
