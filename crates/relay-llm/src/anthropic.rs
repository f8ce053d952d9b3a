use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::http::{self, classify_status};
use crate::provider::{into_response, Completion};
use crate::streaming::{text_stream, SseEvent};
use crate::{
    GenerationRequest, GenerationResponse, ProviderAdapter, RetryPolicy, TextStream, TokenUsage,
};
use relay_types::{Provider, RelayError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// AnthropicAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: model_id.into(),
            retry: RetryPolicy::standard(),
            timeout: crate::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
    }
}

/// Opus 4.1 rejects requests carrying both temperature and top_p.
fn accepts_top_p(model_id: &str) -> bool {
    !model_id.contains("opus-4-1")
}

fn build_request_body(request: &GenerationRequest, stream: bool) -> serde_json::Value {
    let mut body = json!({
        "model": request.model_id,
        "messages": [{ "role": "user", "content": request.user_prompt }],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });

    if accepts_top_p(&request.model_id) {
        body["top_p"] = json!(request.top_p);
    }
    if let Some(system) = request.system() {
        body["system"] = json!(system);
    }
    if stream {
        body["stream"] = json!(true);
    }

    body
}

fn parse_response(body: &serde_json::Value) -> Completion {
    let text = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default();

    let usage = TokenUsage::new(
        body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    );

    Completion { text, usage }
}

fn parse_stream_event(data: &str) -> Vec<SseEvent> {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
        return vec![];
    };
    match v["type"].as_str() {
        Some("content_block_delta") if v["delta"]["type"] == "text_delta" => v["delta"]["text"]
            .as_str()
            .map(|t| vec![SseEvent::Text(t.to_string())])
            .unwrap_or_default(),
        Some("message_stop") => vec![SseEvent::Done],
        Some("error") => {
            let message = v["error"]["message"].as_str().unwrap_or("stream error");
            vec![SseEvent::Error(message.to_string())]
        }
        // message_start, content_block_start/stop, message_delta, ping
        _ => vec![],
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> RelayError {
    classify_status(Provider::Anthropic, status, body)
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
        let started = Instant::now();
        let body = build_request_body(request, false);
        let body = &body;
        tracing::debug!(model = %request.model_id, "Anthropic request");

        let outcome = self
            .retry
            .retry_if("anthropic.generate", |e| !e.is_terminal(), move || async move {
                let json =
                    http::send_json(Provider::Anthropic, self.post(body), self.timeout, map_error)
                        .await?;
                Ok(parse_response(&json))
            })
            .await;

        into_response(Provider::Anthropic, &request.model_id, started, outcome)
    }

    fn stream_generate(&self, request: &GenerationRequest) -> TextStream {
        let builder = self.post(&build_request_body(request, true));
        tracing::debug!(model = %request.model_id, "Anthropic stream");
        text_stream(
            http::open_stream(Provider::Anthropic, builder, self.timeout, map_error),
            parse_stream_event,
        )
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
