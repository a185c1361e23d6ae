use crate::adapters::ProviderRequest;
use crate::{BoxStream, Error, Result};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

/// Longest single line accepted from a streaming body.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Stream of raw lines from an SSE or NDJSON response body.
pub type LineStream = BoxStream<'static, String>;

/// Successful response with its body read but not decoded.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub headers: reqwest::header::HeaderMap,
    pub body: String,
}

impl RawReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.header(reqwest::header::CONTENT_TYPE.as_str())
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Thin wrapper over a pooled `reqwest::Client`.
///
/// Timeouts are applied per request so one client can serve calls with
/// different per-call settings.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10))
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(&self, req: &ProviderRequest, timeout: Duration) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(&req.url).timeout(timeout).json(&req.body);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if req.stream {
            builder = builder.header("accept", "text/event-stream");
        }
        builder
    }

    async fn send(
        &self,
        req: &ProviderRequest,
        timeout: Duration,
        provider: &str,
        model: &str,
    ) -> Result<reqwest::Response> {
        let response = self
            .request(req, timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, provider, model, timeout))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response, provider, model).await)
    }

    /// POST the request and decode the JSON body.
    pub async fn post_json(
        &self,
        req: &ProviderRequest,
        timeout: Duration,
        provider: &str,
        model: &str,
    ) -> Result<Value> {
        let text = self.post_raw(req, timeout, provider, model).await?.body;
        serde_json::from_str(&text).map_err(|e| {
            Error::parse_with_raw(provider, format!("response body is not JSON: {}", e), text)
        })
    }

    /// POST the request and return headers plus the undecoded body.
    pub async fn post_raw(
        &self,
        req: &ProviderRequest,
        timeout: Duration,
        provider: &str,
        model: &str,
    ) -> Result<RawReply> {
        let response = self.send(req, timeout, provider, model).await?;
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, provider, model, timeout))?;
        Ok(RawReply { headers, body })
    }

    /// POST the request and return the body split into lines.
    pub async fn post_stream(
        &self,
        req: &ProviderRequest,
        timeout: Duration,
        provider: &str,
        model: &str,
    ) -> Result<LineStream> {
        let response = self.send(req, timeout, provider, model).await?;
        let provider = provider.to_string();
        let model = model.to_string();
        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let reader = StreamReader::new(bytes);
        let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
            .map(move |line| {
                line.map_err(|e| Error::Transport {
                    provider: provider.clone(),
                    model: model.clone(),
                    status: None,
                    message: format!("stream interrupted: {}", e),
                    payload: None,
                    retry_after_ms: None,
                })
            });
        Ok(Box::pin(lines))
    }

    /// Download a resource (used for images referenced by URL).
    pub async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<(Vec<u8>, Option<String>)> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::configuration(format!("invalid URL '{}': {}", url, e)))?;
        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, "http", url, timeout))?;
        if !response.status().is_success() {
            return Err(error_from_response(response, "http", url).await);
        }
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, "http", url, timeout))?;
        Ok((bytes.to_vec(), media_type))
    }
}

fn map_reqwest_error(e: reqwest::Error, provider: &str, model: &str, timeout: Duration) -> Error {
    let message = if e.is_timeout() {
        format!("request timed out after {} ms", timeout.as_millis())
    } else {
        e.to_string()
    };
    Error::Transport {
        provider: provider.to_string(),
        model: model.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message,
        payload: None,
        retry_after_ms: None,
    }
}

async fn error_from_response(response: reqwest::Response, provider: &str, model: &str) -> Error {
    let status = response.status().as_u16();
    let retry_after_ms = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    let payload = serde_json::from_str::<Value>(&body)
        .ok()
        .or_else(|| (!body.is_empty()).then(|| Value::String(body.clone())));
    let message = payload
        .as_ref()
        .and_then(|p| {
            p.pointer("/error/message")
                .or_else(|| p.get("error"))
                .or_else(|| p.get("message"))
        })
        .and_then(|m| m.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("HTTP {}", status));
    Error::Transport {
        provider: provider.to_string(),
        model: model.to_string(),
        status: Some(status),
        message,
        payload,
        retry_after_ms,
    }
}

/// `retry-after-ms` wins over `retry-after` (seconds).
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
    {
        return Some(ms.max(0.0) as u64);
    }
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs.max(0.0) * 1000.0) as u64)
}

/// Failures of the HTTP stack itself, before any provider is involved.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_retry_after_parsing() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(retry_after_ms(&h), Some(2000));
        h.insert("retry-after-ms", HeaderValue::from_static("150"));
        assert_eq!(retry_after_ms(&h), Some(150));
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_non_success_maps_to_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/chat")
            .with_status(429)
            .with_header("retry-after", "1")
            .with_body(r#"{"error":{"message":"slow down"}}"#)
            .create_async()
            .await;
        let transport = HttpTransport::new().unwrap();
        let req = ProviderRequest {
            url: format!("{}/v1/chat", server.url()),
            headers: vec![],
            body: serde_json::json!({}),
            stream: false,
        };
        let err = transport
            .post_json(&req, Duration::from_secs(5), "openai", "gpt-4o")
            .await
            .unwrap_err();
        match err {
            Error::Transport {
                status,
                message,
                retry_after_ms,
                ..
            } => {
                assert_eq!(status, Some(429));
                assert_eq!(message, "slow down");
                assert_eq!(retry_after_ms, Some(1000));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_client_errors_surface_as_http_errors() {
        let invalid = reqwest::Client::new()
            .post("not a url")
            .build()
            .unwrap_err();
        let err: Error = TransportError::from(invalid).into();
        assert!(matches!(err, Error::Http(TransportError::Http(_))));
        assert!(err.to_string().contains("HTTP error"));
    }

    #[tokio::test]
    async fn test_raw_reply_exposes_headers() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/raw")
            .with_header("content-type", "text/event-stream; charset=utf-8")
            .with_header("x-session", "abc")
            .with_body("data: {}\n\n")
            .create_async()
            .await;
        let transport = HttpTransport::new().unwrap();
        let req = ProviderRequest {
            url: format!("{}/raw", server.url()),
            headers: vec![],
            body: serde_json::json!({}),
            stream: false,
        };
        let reply = transport
            .post_raw(&req, Duration::from_secs(5), "p", "m")
            .await
            .unwrap();
        assert_eq!(reply.content_type(), Some("text/event-stream"));
        assert_eq!(reply.header("x-session"), Some("abc"));
        assert_eq!(reply.body, "data: {}\n\n");
    }

    #[tokio::test]
    async fn test_stream_lines() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/s")
            .with_status(200)
            .with_body("data: a\n\ndata: b\n")
            .create_async()
            .await;
        let transport = HttpTransport::new().unwrap();
        let req = ProviderRequest {
            url: format!("{}/s", server.url()),
            headers: vec![],
            body: serde_json::json!({}),
            stream: true,
        };
        let lines: Vec<String> = transport
            .post_stream(&req, Duration::from_secs(5), "p", "m")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(lines, vec!["data: a", "", "data: b"]);
    }
}
