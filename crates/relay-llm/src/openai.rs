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

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Models that reject sampling parameters and take `max_completion_tokens`.
const REASONING_MODELS: [&str; 2] = ["gpt-5", "gpt-5-mini"];

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl OpenAiAdapter {
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
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
    }
}

/// Canonical id → vendor-native id. Unknown ids pass through.
pub fn native_model_id(model_id: &str) -> &str {
    match model_id {
        "gpt-5" => "gpt-5-2025-08-07",
        "gpt-5-mini" => "gpt-5-mini-2025-08-07",
        other => other,
    }
}

pub fn is_reasoning_model(model_id: &str) -> bool {
    REASONING_MODELS.contains(&model_id)
}

fn build_request_body(request: &GenerationRequest, stream: bool) -> serde_json::Value {
    // 1. Messages, system first
    let mut messages = Vec::new();
    if let Some(system) = request.system() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.user_prompt }));

    let mut body = json!({
        "model": native_model_id(&request.model_id),
        "messages": messages,
        "stream": stream,
    });

    // 2. Reasoning models take neither temperature nor top_p
    if is_reasoning_model(&request.model_id) {
        body["max_completion_tokens"] = json!(request.max_tokens);
    } else {
        body["max_tokens"] = json!(request.max_tokens);
        body["temperature"] = json!(request.temperature);
        body["top_p"] = json!(request.top_p);
    }

    body
}

fn parse_response(body: &serde_json::Value, model_id: &str) -> Completion {
    let choice = &body["choices"][0];
    let text = choice["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();

    let usage = TokenUsage::new(
        body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    );

    if text.is_empty() {
        tracing::warn!(
            model = %model_id,
            finish_reason = choice["finish_reason"].as_str().unwrap_or("N/A"),
            input_tokens = usage.input,
            output_tokens = usage.output,
            "Empty response from OpenAI"
        );
    }

    Completion { text, usage }
}

fn parse_stream_event(data: &str) -> Vec<SseEvent> {
    if data.trim() == "[DONE]" {
        return vec![SseEvent::Done];
    }
    let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
        tracing::debug!(data, "Skipping unparseable OpenAI stream event");
        return vec![];
    };
    if v["error"].is_object() {
        let message = v["error"]["message"].as_str().unwrap_or("stream error");
        return vec![SseEvent::Error(message.to_string())];
    }
    match v["choices"][0]["delta"]["content"].as_str() {
        Some(text) => vec![SseEvent::Text(text.to_string())],
        None => vec![],
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> RelayError {
    classify_status(Provider::OpenAi, status, body)
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
        let started = Instant::now();
        let body = build_request_body(request, false);
        let body = &body;
        tracing::debug!(model = %request.model_id, native = native_model_id(&request.model_id), "OpenAI request");

        let outcome = self
            .retry
            .retry_if("openai.generate", |e| !e.is_terminal(), move || async move {
                let json = http::send_json(Provider::OpenAi, self.post(body), self.timeout, map_error)
                    .await?;
                Ok(parse_response(&json, &request.model_id))
            })
            .await;

        into_response(Provider::OpenAi, &request.model_id, started, outcome)
    }

    fn stream_generate(&self, request: &GenerationRequest) -> TextStream {
        let builder = self.post(&build_request_body(request, true));
        let timeout = self.timeout;
        tracing::debug!(model = %request.model_id, "OpenAI stream");
        text_stream(
            http::open_stream(Provider::OpenAi, builder, timeout, map_error),
            parse_stream_event,
        )
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
