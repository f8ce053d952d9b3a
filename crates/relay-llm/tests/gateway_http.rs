//! End-to-end tests for the gateway against local mock vendor endpoints.
//!
//! Each test exercises the full path: gateway -> registry -> adapter -> HTTP -> canonical response.

use std::time::Duration;

use futures::StreamExt;
use mockito::{Matcher, Server};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use relay_llm::{
    AdapterRegistry, Backoff, Credentials, Gateway, GatewayEvent, GenerationRequest, Provider,
    RelayConfig, RetryPolicy, Status, SAFETY_BLOCK_MESSAGE, STREAM_FILTERED_NOTICE,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Gateway with every provider pointed at `base_url`, all keys set and no
/// retry delays.
fn gateway(base_url: &str) -> Gateway {
    let creds = Credentials::new()
        .with_key(Provider::OpenAi, "sk-test")
        .with_key(Provider::Anthropic, "ak-test")
        .with_key(Provider::Gemini, "g-test");
    let config = Provider::ALL
        .into_iter()
        .fold(RelayConfig::default().with_timeout_secs(5), |c, p| {
            c.with_base_url(p, base_url)
        });
    let no_delay = RetryPolicy::new(3, Backoff::None);
    let registry = AdapterRegistry::new(creds, config)
        .expect("valid config")
        .with_retry_policies(no_delay.clone(), no_delay);
    Gateway::new(registry)
}

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect()
}

async fn collect_events(gw: &Gateway, request: &GenerationRequest) -> Vec<GatewayEvent> {
    gw.stream(request).expect("stream should start").collect().await
}

fn text(t: &str) -> GatewayEvent {
    GatewayEvent::Text { text: t.into() }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_reasoning_model_round_trip() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-5-2025-08-07",
            "max_completion_tokens": 100,
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "Hello" }
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{ "message": { "role": "assistant", "content": "Hi!" }, "finish_reason": "stop" }],
                "usage": { "prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11 }
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let request = GenerationRequest::new("gpt-5", "Hello")
        .with_system_prompt("Be brief.")
        .with_max_tokens(100);
    let resp = gateway(&server.url()).generate(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(resp.status, Status::Success);
    assert_eq!(resp.text, "Hi!");
    assert_eq!(resp.model, "gpt-5");
    assert_eq!(resp.tokens_used.input, 9);
    assert_eq!(resp.tokens_used.output, 2);
    assert_eq!(resp.tokens_used.total, 11);
    assert!(resp.error_message.is_none());
}

#[tokio::test]
async fn openai_transient_failure_retried_three_times() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(503)
        .with_body(r#"{"error": {"message": "The server is overloaded"}}"#)
        .expect(3)
        .create_async()
        .await;

    let resp = gateway(&server.url())
        .generate(&GenerationRequest::new("gpt-4o", "Hello"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(resp.status, Status::Error);
    assert!(resp.text.is_empty());
    assert_eq!(
        resp.error_message.as_deref(),
        Some("Provider openai returned HTTP 503: The server is overloaded")
    );
    assert_eq!(resp.tokens_used.total, 0);
}

#[tokio::test]
async fn openai_stream_fragments_in_order() {
    let mut server = Server::new_async().await;
    let body = format!(
        "{}data: [DONE]\n\n",
        sse(&[
            json!({ "choices": [{ "delta": { "role": "assistant" } }] }),
            json!({ "choices": [{ "delta": { "content": "Hel" } }] }),
            json!({ "choices": [{ "delta": { "content": "lo" } }] }),
        ])
    );
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let events = collect_events(&gateway(&server.url()), &GenerationRequest::new("gpt-4o-mini", "Hi")).await;
    assert_eq!(events, vec![text("Hel"), text("lo"), GatewayEvent::Done]);
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_auth_failure_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "ak-test")
        .match_header("anthropic-version", "2023-06-01")
        .with_status(401)
        .with_body(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#)
        .expect(1)
        .create_async()
        .await;

    let resp = gateway(&server.url())
        .generate(&GenerationRequest::new("claude-sonnet-4-20250514", "Hello"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(resp.status, Status::Error);
    assert_eq!(
        resp.error_message.as_deref(),
        Some("Authentication failed for provider anthropic (HTTP 401)")
    );
}

#[tokio::test]
async fn anthropic_batch_reports_each_iteration() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-3-5-haiku-20241022",
            "system": "You are terse."
        })))
        .with_status(200)
        .with_body(
            json!({
                "content": [{ "type": "text", "text": "ok" }],
                "usage": { "input_tokens": 5, "output_tokens": 1 }
            })
            .to_string(),
        )
        .expect(3)
        .create_async()
        .await;

    let request = GenerationRequest::new("claude-3-5-haiku-20241022", "Ping")
        .with_system_prompt("You are terse.");
    let batch = gateway(&server.url()).batch(&request, 3).await.unwrap();

    mock.assert_async().await;
    assert_eq!(batch.model, "claude-3-5-haiku-20241022");
    assert_eq!(batch.results.len(), 3);
    for (i, record) in batch.results.iter().enumerate() {
        assert_eq!(record.iteration, i + 1);
        assert_eq!(record.status, Status::Success);
        assert_eq!(record.text, "ok");
        assert_eq!(record.tokens_used.total, 6);
    }
}

#[tokio::test]
async fn anthropic_stream_error_event_ends_stream() {
    let mut server = Server::new_async().await;
    let body = sse(&[
        json!({ "type": "message_start", "message": { "id": "msg_1" } }),
        json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hel" } }),
        json!({ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } }),
        json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "lo" } }),
    ]);
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let events = collect_events(
        &gateway(&server.url()),
        &GenerationRequest::new("claude-opus-4-1-20250805", "Hi"),
    )
    .await;
    assert_eq!(
        events,
        vec![text("Hel"), text("Error: Overloaded"), GatewayEvent::Done]
    );
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gemini_safety_block_becomes_error_response() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_query(Matcher::UrlEncoded("key".into(), "g-test".into()))
        .match_body(Matcher::PartialJson(json!({
            "generationConfig": { "maxOutputTokens": 2048 },
            "safetySettings": [
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE" }
            ]
        })))
        .with_status(200)
        .with_body(
            json!({
                "candidates": [{ "finishReason": "SAFETY", "safetyRatings": [] }],
                "usageMetadata": { "promptTokenCount": 4 }
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let resp = gateway(&server.url())
        .generate(&GenerationRequest::new("gemini-2.5-flash", "Hello"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(resp.status, Status::Error);
    assert!(resp.text.is_empty());
    assert_eq!(resp.error_message.as_deref(), Some(SAFETY_BLOCK_MESSAGE));
}

#[tokio::test]
async fn gemini_internal_error_retried_then_rewritten() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-2.5-pro:generateContent")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body(r#"{"error":{"code":500,"message":"An internal error has occurred.","status":"INTERNAL"}}"#)
        .expect(3)
        .create_async()
        .await;

    let resp = gateway(&server.url())
        .generate(&GenerationRequest::new("gemini-2.5-pro", "Hello"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(resp.status, Status::Error);
    let message = resp.error_message.unwrap();
    assert!(message.contains("temporarily degraded"), "{message}");
    assert!(message.contains("different model"), "{message}");
}

#[tokio::test]
async fn gemini_rate_limit_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_body(r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#)
        .expect(1)
        .create_async()
        .await;

    let resp = gateway(&server.url())
        .generate(&GenerationRequest::new("gemini-2.5-flash", "Hello"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(resp.error_message.unwrap().contains("rate limit"));
}

#[tokio::test]
async fn gemini_stream_safety_notice() {
    let mut server = Server::new_async().await;
    let body = sse(&[
        json!({ "candidates": [{ "content": { "parts": [{ "text": "Sure, " }], "role": "model" } }] }),
        json!({ "candidates": [{ "finishReason": "SAFETY" }] }),
    ]);
    let _mock = server
        .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("alt".into(), "sse".into()),
            Matcher::UrlEncoded("key".into(), "g-test".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let events = collect_events(
        &gateway(&server.url()),
        &GenerationRequest::new("gemini-2.5-flash", "Hi"),
    )
    .await;
    assert_eq!(
        events,
        vec![
            text("Sure, "),
            text(STREAM_FILTERED_NOTICE),
            GatewayEvent::Done
        ]
    );
}

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_connection_failure_yields_error_then_done() {
    // Nothing listens on port 1.
    let events = collect_events(
        &gateway("http://127.0.0.1:1"),
        &GenerationRequest::new("gpt-4o", "Hi"),
    )
    .await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        GatewayEvent::Text { text } => assert!(text.starts_with("Error: "), "{text}"),
        other => panic!("expected error fragment, got {other:?}"),
    }
    assert_eq!(events[1], GatewayEvent::Done);
}

#[tokio::test]
async fn http_error_before_stream_yields_error_fragment() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(429)
        .with_body(r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#)
        .create_async()
        .await;

    let events = collect_events(
        &gateway(&server.url()),
        &GenerationRequest::new("claude-sonnet-4-20250514", "Hi"),
    )
    .await;
    assert_eq!(
        events,
        vec![
            text("Error: Rate limited by anthropic (HTTP 429): slow down"),
            GatewayEvent::Done
        ]
    );
}

#[tokio::test]
async fn dropping_stream_closes_vendor_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    // Sends headers and one SSE event, then keeps the body open.
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        let _ = socket.read(&mut buf).await.unwrap();

        let event = format!("data: {}\n\n", json!({ "choices": [{ "delta": { "content": "Hel" } }] }));
        let head = "HTTP/1.1 200 OK\r\n\
                    content-type: text/event-stream\r\n\
                    transfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{event}\r\n", event.len());
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        // Drain any remaining request bytes until the client hangs up.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return true,
                    Ok(_) => continue,
                }
            }
        })
        .await
        .unwrap_or(false)
    });

    let gw = gateway(&base_url);
    let mut events = gw.stream(&GenerationRequest::new("gpt-4o", "Hi")).unwrap();
    assert_eq!(events.next().await, Some(text("Hel")));
    drop(events);

    assert!(server.await.unwrap(), "connection still open after the stream was dropped");
}
