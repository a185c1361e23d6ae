//! Structured output: schema inference, provider response_format, validation.

mod common;

use ai_lib_relay::structured::{Descriptions, FieldDescriptor, JsonOptions};
use ai_lib_relay::{Chat, Error};
use common::{completion, MockServerFixture};
use mockito::Matcher;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

fn chat_for(fx: &MockServerFixture) -> Chat {
    Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_countries_example_round_trip() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .mock_when(
            "alpha",
            json!({
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response",
                        "schema": {"required": ["countries"]}
                    }
                }
            }),
            completion(r#"{"countries":[{"name":"France","capital":"Paris"}]}"#),
        )
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("List one European country with its capital.");
    let value = chat
        .json(&json!({"countries": [{"name": "", "capital": ""}]}), None, None)
        .await
        .unwrap();

    assert_eq!(
        value,
        json!({"countries": [{"name": "France", "capital": "Paris"}]})
    );
    assert_eq!(value["countries"].as_array().unwrap().len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_schema_instruction_is_appended_to_system_prompt() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .match_body(Matcher::Regex(
            "You are a geographer.\\\\n\\\\nRespond only with a JSON value".to_string(),
        ))
        .with_body(completion(r#"{"capital":"Rome"}"#).to_string())
        .create_async()
        .await;

    let mut chat = chat_for(&fx);
    chat.set_system("You are a geographer.");
    chat.add_text("Capital of Italy?");
    let value = chat
        .json(&json!({"capital": ""}), None, None)
        .await
        .unwrap();
    assert_eq!(value["capital"], "Rome");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_root_array_is_wrapped_and_unwrapped() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_when(
            "alpha",
            json!({
                "response_format": {"json_schema": {"schema": {
                    "type": "object",
                    "required": ["out"],
                    "properties": {"out": {"type": "array"}}
                }}}
            }),
            completion(r#"{"out":[{"name":"Ada","age":36},{"name":"Alan","age":41}]}"#),
        )
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("Two computing pioneers with their age at death.");
    let value = chat
        .json(&json!([{"name": "", "age": 0}]), None, None)
        .await
        .unwrap();
    assert!(value.is_array());
    assert_eq!(value[1]["name"], "Alan");
}

#[tokio::test]
async fn test_missing_required_field_is_validation_error() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_text("alpha", r#"{"countries":[{"name":"France"}]}"#)
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("List one country.");
    let err = chat
        .json(&json!({"countries": [{"name": "", "capital": ""}]}), None, None)
        .await
        .unwrap_err();
    match err {
        Error::Validation { errors, value, .. } => {
            assert!(errors.iter().any(|e| e.contains("capital")));
            assert!(value.is_some());
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_optional_field_may_be_null_and_fenced_reply_parses() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_text(
            "alpha",
            "Sure, here it is:\n```json\n{\"title\": \"Dune\", \"subtitle\": null}\n```",
        )
        .await;

    let descriptions = Descriptions::new()
        .text("title", "Book title")
        .field("subtitle", FieldDescriptor::new("Subtitle if any").optional());

    let mut chat = chat_for(&fx);
    chat.add_text("A famous science fiction novel.");
    let value = chat
        .json(
            &json!({"title": "", "subtitle": ""}),
            Some(&descriptions),
            Some(JsonOptions::default().with_note("Use the original title.")),
        )
        .await
        .unwrap();
    assert_eq!(value["title"], "Dune");
    assert!(value["subtitle"].is_null());
}

#[derive(Debug, Deserialize, JsonSchema)]
struct City {
    name: String,
    population: u64,
}

#[tokio::test]
async fn test_typed_output() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_text("alpha", r#"{"name":"Lyon","population":522000}"#)
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("Second largest city of France?");
    let city: City = chat.json_typed(None).await.unwrap();
    assert_eq!(city.name, "Lyon");
    assert_eq!(city.population, 522_000);
}

#[tokio::test]
async fn test_typed_list_output() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .match_body(Matcher::Regex(r#""definitions":\{"City""#.to_string()))
        .with_body(
            completion(r#"{"out":[{"name":"Lyon","population":522000},{"name":"Nice","population":342000}]}"#)
                .to_string(),
        )
        .create_async()
        .await;

    let mut chat = chat_for(&fx);
    chat.add_text("Two large French cities?");
    let cities: Vec<City> = chat.json_typed(None).await.unwrap();
    assert_eq!(cities.len(), 2);
    assert_eq!(cities[1].name, "Nice");
    mock.assert_async().await;
}
