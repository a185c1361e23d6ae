//! Streaming through the engine: delta delivery, assembly, tool calls.

mod common;

use ai_lib_relay::tools::FnTool;
use ai_lib_relay::types::{MessageRole, ToolSpec};
use ai_lib_relay::{Chat, StreamDelta};
use common::{text_chunk, MockServerFixture};
use mockito::Matcher;
use serde_json::json;

fn chat_for(fx: &MockServerFixture) -> Chat {
    Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .max_history(-1)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_deltas_arrive_in_order_and_assemble() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_header("content-type", "text/event-stream")
        .with_body(
            [
                format!("data: {}\n\n", text_chunk("Hel")),
                format!("data: {}\n\n", text_chunk("lo")),
                format!(
                    "data: {}\n\n",
                    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})
                ),
                format!(
                    "data: {}\n\n",
                    json!({"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}})
                ),
                "data: [DONE]\n\n".to_string(),
            ]
            .concat(),
        )
        .create_async()
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("Say hello");
    let mut seen = Vec::new();
    let response = chat
        .stream(|d: &StreamDelta| {
            if let Some(t) = &d.text {
                seen.push(t.clone());
            }
        })
        .await
        .unwrap();

    assert_eq!(seen, vec!["Hel", "lo"]);
    assert_eq!(response.text, "Hello");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.total, 7);
    assert_eq!(response.provider, "alpha");
    mock.assert_async().await;

    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].text(), "Hello");
}

#[tokio::test]
async fn test_malformed_chunk_is_skipped() {
    let mut fx = MockServerFixture::new().await;
    let body = format!(
        "data: {}\n\ndata: {{not json\n\n: keep-alive\n\ndata: {}\n\ndata: [DONE]\n\n",
        text_chunk("a"),
        text_chunk("b")
    );
    let _mock = fx.mock_sse_raw("alpha", &body).await;

    let mut chat = chat_for(&fx);
    chat.add_text("letters");
    let mut count = 0;
    let response = chat
        .stream(|d: &StreamDelta| {
            if d.text.is_some() {
                count += 1;
            }
        })
        .await
        .unwrap();
    assert_eq!(response.text, "ab");
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_streamed_tool_call_runs_tool_loop() {
    let mut fx = MockServerFixture::new().await;
    let call_chunks = [
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "id": "call_9", "type": "function", "function": {"name": "add", "arguments": "{\"a\": 2, "}}
        ]}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"b\": 3}"}}
        ]}, "finish_reason": "tool_calls"}]}),
    ];
    let mut first_body = String::new();
    for c in &call_chunks {
        first_body.push_str(&format!("data: {}\n\n", c));
    }
    first_body.push_str("data: [DONE]\n\n");

    let first = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .with_header("content-type", "text/event-stream")
        .with_body(first_body)
        .expect(1)
        .create_async()
        .await;
    let second = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .match_body(Matcher::Regex(r#""tool_call_id":"call_9""#.to_string()))
        .with_header("content-type", "text/event-stream")
        .with_body(format!("data: {}\n\ndata: [DONE]\n\n", text_chunk("2 + 3 = 5")))
        .expect(1)
        .create_async()
        .await;

    let mut chat = chat_for(&fx);
    chat.add_tool(
        ToolSpec::new(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
        ),
        FnTool::from_sync(|args| {
            let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
            Ok(json!(sum))
        }),
    );
    chat.add_text("What is 2 + 3?");

    let mut texts = String::new();
    let response = chat
        .stream(|d: &StreamDelta| {
            if let Some(t) = &d.text {
                texts.push_str(t);
            }
        })
        .await
        .unwrap();

    assert_eq!(response.text, "2 + 3 = 5");
    assert_eq!(texts, "2 + 3 = 5");
    first.assert_async().await;
    second.assert_async().await;

    let tool_turn = &chat.history()[1];
    let call = tool_turn.tool_calls().next().unwrap();
    assert_eq!(call.name, "add");
    assert_eq!(call.arguments, json!({"a": 2, "b": 3}));
}

#[tokio::test]
async fn test_stream_error_status_is_returned() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx.mock_error("alpha", 503, "overloaded").await;

    let mut chat = chat_for(&fx);
    chat.add_text("hi");
    let mut called = false;
    let err = chat
        .stream(|_: &StreamDelta| called = true)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(!called);
    assert_eq!(chat.history().len(), 1);
}

#[tokio::test]
async fn test_inline_think_block_is_split_from_streamed_text() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .mock_sse(
            "alpha",
            &[text_chunk("<think>pl"), text_chunk("an</think>"), text_chunk("Answer")],
        )
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("Think first");
    let response = chat.stream(|_: &StreamDelta| {}).await.unwrap();

    assert_eq!(response.text, "Answer");
    assert_eq!(response.reasoning_text.as_deref(), Some("plan"));
    mock.assert_async().await;
    assert_eq!(chat.history()[1].text(), "Answer");
}

#[tokio::test]
async fn test_no_fallback_after_deltas_were_delivered() {
    let mut fx = MockServerFixture::new().await;
    let broken = fx
        .mock_sse_raw(
            "alpha",
            &format!(
                "data: {}\n\ndata: {}\n\n",
                text_chunk("Half an ans"),
                json!({"error": {"message": "connection reset upstream"}})
            ),
        )
        .await;
    let healthy = fx
        .server
        .mock("POST", "/beta/chat/completions")
        .with_header("content-type", "text/event-stream")
        .with_body(format!("data: {}\n\ndata: [DONE]\n\n", text_chunk("Full answer")))
        .expect(0)
        .create_async()
        .await;

    let mut chat = Chat::builder()
        .registry(fx.registry(&["alpha", "beta"]))
        .models(["alpha-1", "beta-1"])
        .build()
        .unwrap();
    chat.add_text("hi");

    let mut seen = String::new();
    let err = chat
        .stream(|d: &StreamDelta| {
            if let Some(t) = &d.text {
                seen.push_str(t);
            }
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("connection reset upstream"));
    assert_eq!(seen, "Half an ans");
    broken.assert_async().await;
    healthy.assert_async().await;
    assert_eq!(chat.history().len(), 1);
}

#[tokio::test]
async fn test_fallback_still_applies_before_any_delta() {
    let mut fx = MockServerFixture::new().await;
    let _down = fx.mock_error("alpha", 503, "overloaded").await;
    let healthy = fx.mock_sse("beta", &[text_chunk("from beta")]).await;

    let mut chat = Chat::builder()
        .registry(fx.registry(&["alpha", "beta"]))
        .models(["alpha-1", "beta-1"])
        .build()
        .unwrap();
    chat.add_text("hi");

    let mut seen = String::new();
    let response = chat
        .stream(|d: &StreamDelta| {
            if let Some(t) = &d.text {
                seen.push_str(t);
            }
        })
        .await
        .unwrap();
    assert_eq!(response.text, "from beta");
    assert_eq!(seen, "from beta");
    healthy.assert_async().await;
}
