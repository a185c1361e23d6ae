//! Rate limiting as observed through chat calls.

mod common;

use ai_lib_relay::resilience::{RateLimiter, RateLimiterConfig};
use ai_lib_relay::Chat;
use common::{completion, MockServerFixture};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_min_time_spaces_sequential_calls() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .with_header("content-type", "application/json")
        .with_body(completion("ok").to_string())
        .expect(4)
        .create_async()
        .await;

    let mut chat = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .rate_limit(
            RateLimiterConfig::new()
                .with_max_concurrent(1)
                .with_min_time(Duration::from_millis(100)),
        )
        .build()
        .unwrap();

    let started = Instant::now();
    for i in 0..4 {
        chat.add_text(format!("call {i}"));
        assert_ok!(chat.message().await);
    }
    assert!(started.elapsed() >= Duration::from_millis(300));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_forks_share_one_limiter() {
    let mut fx = MockServerFixture::new().await;
    let _slow = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(200));
            w.write_all(completion("ok").to_string().as_bytes())
        })
        .create_async()
        .await;

    let chat = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .rate_limit(RateLimiterConfig::new().with_max_concurrent(1))
        .build()
        .unwrap();
    let mut a = chat.fork();
    let mut b = chat.fork();
    assert!(Arc::ptr_eq(a.limiter(), b.limiter()));

    a.add_text("one");
    b.add_text("two");
    let started = Instant::now();
    let (ra, rb) = tokio::join!(a.message(), b.message());
    assert_eq!(ra.unwrap(), "ok");
    assert_eq!(rb.unwrap(), "ok");
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_external_limiter_is_shared_between_chats() {
    let fx = MockServerFixture::new().await;
    let limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig::new().with_max_concurrent(3),
    ));
    let first = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .limiter(limiter.clone())
        .build()
        .unwrap();
    let second = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .limiter(limiter.clone())
        .build()
        .unwrap();
    assert!(Arc::ptr_eq(first.limiter(), second.limiter()));

    let snapshot = first.limiter_snapshot();
    assert_eq!(snapshot.max_concurrent, 3);
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.queued, 0);
}

#[tokio::test]
async fn test_retry_after_pauses_limiter() {
    let mut fx = MockServerFixture::new().await;
    let _limited = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_header("retry-after", "2")
        .with_body(r#"{"error":{"message":"slow down","type":"rate_limit"}}"#)
        .create_async()
        .await;

    let mut chat = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .build()
        .unwrap();
    chat.add_text("hi");
    let err = assert_err!(chat.message().await);
    assert_eq!(err.status(), Some(429));

    let paused = chat.limiter_snapshot().paused_ms.unwrap();
    assert!(paused > 1000 && paused <= 2000);
}

#[tokio::test]
async fn test_invalid_limiter_config_rejected_at_build() {
    let fx = MockServerFixture::new().await;
    let err = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .rate_limit(RateLimiterConfig::new().with_max_concurrent(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, ai_lib_relay::Error::Configuration { .. }));
}

#[tokio::test]
async fn test_concurrent_calls_survive_retry_after_on_single_slot() {
    let mut fx = MockServerFixture::new().await;
    let _limited = fx
        .server
        .mock("POST", "/alpha/chat/completions")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_header("retry-after-ms", "10")
        .with_body(r#"{"error":{"message":"slow down","type":"rate_limit"}}"#)
        .expect(2)
        .create_async()
        .await;

    let chat = Chat::builder()
        .registry(fx.registry(&["alpha"]))
        .model("alpha-1")
        .rate_limit(RateLimiterConfig::new().with_max_concurrent(1))
        .build()
        .unwrap();
    let mut a = chat.fork();
    let mut b = chat.fork();
    a.add_text("one");
    b.add_text("two");

    let (ra, rb) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(a.message(), b.message())
    })
    .await
    .expect("both calls finish");
    assert_eq!(assert_err!(ra).status(), Some(429));
    assert_eq!(assert_err!(rb).status(), Some(429));
    assert_eq!(chat.limiter_snapshot().in_flight, 0);
}
