//! HTTP transport shared by every adapter.

pub mod http;

pub use http::{HttpTransport, LineStream, RawReply, TransportError};
