//! 执行引擎：候选选择、回退、轮询、工具调用循环与流式组装。
//!
//! Execution engine.
//!
//! One top-level call walks the candidate order (fallback, round-robin, or
//! both), and on each candidate runs the tool loop: send, execute returned tool
//! calls, resend, until a reply carries no tool calls or the iteration ceiling
//! is hit. Every network attempt takes exactly one rate-limiter permit and is
//! bounded by the resolved timeout.

use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::adapters::{split_think_tags, StreamState};
use crate::conversation::ConversationState;
use crate::error::AttemptFailure;
use crate::registry::{CandidateChain, CandidateModel};
use crate::resilience::RateLimiter;
use crate::tools::ToolBridge;
use crate::transport::HttpTransport;
use crate::types::{
    Message, NormalizedRequest, NormalizedResponse, ResponseFormat, StreamDelta, TokenUsage,
};
use crate::{Error, Result};

use super::config::{resolve_call_config, CallConfig, CallOverrides, RelayConfig};

/// Receives stream deltas as they arrive.
pub(crate) type DeltaSink<'a> = &'a mut (dyn FnMut(&StreamDelta) + Send);

/// Per-call request shaping added on top of the conversation.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestShape {
    pub response_format: Option<ResponseFormat>,
    /// Appended to the system prompt for this call only.
    pub system_suffix: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Engine {
    pub chain: CandidateChain,
    pub limiter: Arc<RateLimiter>,
    pub transport: HttpTransport,
    pub config: Arc<RelayConfig>,
}

impl Engine {
    /// Candidates to try for one top-level call, in order.
    fn attempt_order(&self) -> Vec<&CandidateModel> {
        if !self.config.round_robin {
            return self.chain.candidates().iter().collect();
        }
        let start = self.chain.advance();
        if self.config.fallback_with_round_robin {
            self.chain.rotated(start).collect()
        } else {
            vec![&self.chain.candidates()[start]]
        }
    }

    pub async fn run(
        &self,
        state: &mut ConversationState,
        tools: &ToolBridge,
        shape: &RequestShape,
        overrides: &CallOverrides,
        on_delta: DeltaSink<'_>,
    ) -> Result<NormalizedResponse> {
        let started = Instant::now();
        let order = self.attempt_order();
        let anchor = state.anchor();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut last_error: Option<Error> = None;

        for (attempt, candidate) in order.iter().enumerate() {
            let call = resolve_call_config(&self.config, &candidate.overrides, overrides);
            let mut delivered = false;
            let result = {
                let mut sink = |d: &StreamDelta| {
                    delivered = true;
                    on_delta(d);
                };
                self.run_candidate(candidate, &call, state, anchor, tools, shape, &mut sink)
                    .await
            };
            match result {
                Ok(response) => {
                    state.finish_exchange();
                    if call.debug.logs_calls() {
                        info!(
                            provider = candidate.provider(),
                            model = %candidate.model,
                            attempt = attempt + 1,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "call completed"
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    state.rollback(anchor);
                    if !e.is_candidate_failure() {
                        return Err(e);
                    }
                    // the caller already saw part of this reply
                    if delivered {
                        if call.debug.logs_attempts() {
                            warn!(
                                provider = candidate.provider(),
                                model = %candidate.model,
                                error = %e,
                                "stream failed after deltas were delivered; not falling back"
                            );
                        }
                        return Err(e);
                    }
                    if call.debug.logs_attempts() {
                        warn!(
                            provider = candidate.provider(),
                            model = %candidate.model,
                            attempt = attempt + 1,
                            status = ?e.status(),
                            error = %e,
                            "candidate failed"
                        );
                    } else {
                        trace!(provider = candidate.provider(), error = %e, "candidate failed");
                    }
                    failures.push(AttemptFailure {
                        provider: candidate.provider().to_string(),
                        model: candidate.model.clone(),
                        status: e.status(),
                        message: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| Error::runtime("no candidate was attempted"));
        // a lone round-robin attempt reports its own error
        if self.config.round_robin && !self.config.fallback_with_round_robin {
            return Err(last);
        }
        Err(Error::Exhaustion {
            attempts: failures,
            last: Box::new(last),
        })
    }

    /// Tool loop against a single candidate.
    #[allow(clippy::too_many_arguments)]
    async fn run_candidate(
        &self,
        candidate: &CandidateModel,
        call: &CallConfig,
        state: &mut ConversationState,
        anchor: usize,
        tools: &ToolBridge,
        shape: &RequestShape,
        on_delta: DeltaSink<'_>,
    ) -> Result<NormalizedResponse> {
        let mut usage = TokenUsage::default();
        let mut rounds: u32 = 0;

        loop {
            let request = self.build_request(state, anchor, tools, shape, call);
            let mut response = self.attempt(candidate, &request, call, &mut *on_delta).await?;
            usage.accumulate(&response.usage);

            if !response.has_tool_calls() {
                state.push_reply(&response);
                response.usage = usage;
                return Ok(response);
            }
            if tools.is_empty() {
                // nothing can answer these calls
                state.push_reply(&without_tool_calls(&response));
                response.usage = usage;
                return Ok(response);
            }

            if rounds >= call.max_tool_iterations {
                let message = format!(
                    "tool loop stopped after {} iterations; returning last text",
                    rounds
                );
                if call.debug.logs_calls() {
                    warn!(provider = candidate.provider(), model = %candidate.model, "{}", message);
                } else {
                    trace!(provider = candidate.provider(), "{}", message);
                }
                // unanswered tool calls are not stored
                state.push_reply(&without_tool_calls(&response));
                response.warnings.push(message);
                response.usage = usage;
                return Ok(response);
            }
            rounds += 1;

            state.push_reply(&response);
            let results = tools.execute_all(&response.tool_calls).await;
            if call.debug.logs_attempts() {
                for failed in results.iter().filter(|r| r.is_error) {
                    warn!(tool = %failed.name, error = %failed.content, "tool call failed");
                }
                info!(
                    provider = candidate.provider(),
                    round = rounds,
                    calls = results.len(),
                    errors = results.iter().filter(|r| r.is_error).count(),
                    "tool calls executed"
                );
            }
            state.push(Message::tool_results(results));
        }
    }

    fn build_request(
        &self,
        state: &ConversationState,
        anchor: usize,
        tools: &ToolBridge,
        shape: &RequestShape,
        call: &CallConfig,
    ) -> NormalizedRequest {
        let system = match (state.outgoing_system(), shape.system_suffix.as_deref()) {
            (Some(s), Some(extra)) => Some(format!("{}\n\n{}", s, extra)),
            (Some(s), None) => Some(s),
            (None, Some(extra)) => Some(extra.to_string()),
            (None, None) => None,
        };
        NormalizedRequest {
            messages: state.outgoing(anchor),
            system_prompt: system,
            params: call.params.clone(),
            tools: tools.list_tools(),
            response_format: shape.response_format.clone(),
            stream: shape.stream,
        }
    }

    /// One network attempt: limiter permit, send, parse.
    async fn attempt(
        &self,
        candidate: &CandidateModel,
        request: &NormalizedRequest,
        call: &CallConfig,
        on_delta: DeltaSink<'_>,
    ) -> Result<NormalizedResponse> {
        let provider = candidate.provider();
        let wire = candidate.adapter.build_request(request, &candidate.model)?;
        if call.debug.logs_payloads() {
            debug!(provider, model = %candidate.model, url = %wire.url, body = %wire.body, "request");
        }

        let _permit = self.limiter.acquire().await?;
        let started = Instant::now();
        let work = async {
            if wire.stream {
                self.stream_once(candidate, &wire, call, on_delta).await
            } else {
                let body = self
                    .transport
                    .post_json(&wire, call.timeout, provider, &candidate.model)
                    .await?;
                if call.debug.logs_payloads() {
                    debug!(provider, model = %candidate.model, body = %body, "response");
                }
                candidate.adapter.parse_response(&body)
            }
        };
        let result = match tokio::time::timeout(call.timeout, work).await {
            Ok(r) => r,
            Err(_) => Err(timeout_error(provider, &candidate.model, call.timeout)),
        };

        match result {
            Ok(mut response) => {
                if response.provider.is_empty() {
                    response.provider = provider.to_string();
                }
                if response.model.is_empty() {
                    response.model = candidate.model.clone();
                }
                if call.debug.logs_attempts() {
                    info!(
                        provider,
                        model = %candidate.model,
                        duration_ms = started.elapsed().as_millis() as u64,
                        input_tokens = response.usage.input,
                        output_tokens = response.usage.output,
                        tool_calls = response.tool_calls.len(),
                        "attempt succeeded"
                    );
                }
                Ok(response)
            }
            Err(e) => {
                if let Error::Transport {
                    status: Some(429),
                    retry_after_ms: Some(ms),
                    ..
                } = &e
                {
                    if call.debug.logs_attempts() {
                        debug!(provider, retry_after_ms = ms, "pausing limiter on 429");
                    }
                    self.limiter.pause_for(Duration::from_millis(*ms));
                }
                Err(e)
            }
        }
    }

    /// Consume one streamed response, forwarding deltas as they are parsed.
    async fn stream_once(
        &self,
        candidate: &CandidateModel,
        wire: &crate::adapters::ProviderRequest,
        call: &CallConfig,
        on_delta: DeltaSink<'_>,
    ) -> Result<NormalizedResponse> {
        let provider = candidate.provider();
        let mut lines = self
            .transport
            .post_stream(wire, call.timeout, provider, &candidate.model)
            .await?;

        let mut st = StreamState::default();
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(line) = lines.next().await {
            let line = line?;
            let delta = match candidate.adapter.parse_stream_chunk(&line, &mut st) {
                Ok(d) => d,
                Err(Error::Parse { message, .. }) => {
                    if call.debug.logs_attempts() {
                        warn!(provider, model = %candidate.model, error = %message, "skipping malformed stream chunk");
                    } else {
                        trace!(provider, error = %message, "skipping malformed stream chunk");
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            if delta.is_empty() {
                continue;
            }
            if let Some(t) = &delta.text {
                text.push_str(t);
            }
            if let Some(r) = &delta.reasoning {
                reasoning.push_str(r);
            }
            if delta.finish_reason.is_some() {
                finish_reason = delta.finish_reason.clone();
            }
            if delta.usage.is_some() {
                usage = delta.usage;
            }
            on_delta(&delta);
            if delta.is_final {
                break;
            }
        }

        // inline <think> blocks are only separable once the text is complete
        let (think, text) = split_think_tags(&text);
        let reasoning_text = match (Some(reasoning).filter(|r| !r.is_empty()), think) {
            (Some(streamed), Some(inline)) => Some(format!("{}\n{}", streamed, inline)),
            (streamed, inline) => streamed.or(inline),
        };

        Ok(NormalizedResponse {
            text,
            reasoning_text,
            usage: usage.unwrap_or(st.usage),
            tool_calls: st.tool_calls.finalize(),
            finish_reason,
            provider: provider.to_string(),
            model: candidate.model.clone(),
            warnings: Vec::new(),
            raw: serde_json::Value::Null,
        })
    }
}

fn without_tool_calls(response: &NormalizedResponse) -> NormalizedResponse {
    let mut text_only = response.clone();
    text_only.tool_calls.clear();
    text_only
}

fn timeout_error(provider: &str, model: &str, timeout: Duration) -> Error {
    Error::Transport {
        provider: provider.to_string(),
        model: model.to_string(),
        status: None,
        message: format!("request timed out after {} ms", timeout.as_millis()),
        payload: None,
        retry_after_ms: None,
    }
}
