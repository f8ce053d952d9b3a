use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::http::{self, extract_error_message};
use crate::provider::{into_response, Completion};
use crate::streaming::{text_stream, SseEvent};
use crate::{
    FinishReason, GenerationRequest, GenerationResponse, ProviderAdapter, RetryPolicy, TextStream,
    TokenUsage,
};
use relay_types::{Provider, RelayError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const SAME_LANGUAGE_HINT: &str =
    "[Please provide a helpful response in the same language as the user's input]";

pub const SAFETY_BLOCK_MESSAGE: &str = "The Gemini API blocked this request due to safety filters. \
     This often happens with certain prompts even when they are legitimate. \
     Please try rephrasing your prompt or using a different model.";

pub const STREAM_FILTERED_NOTICE: &str =
    "[Content filtered by Gemini safety settings - please try a different prompt or model]";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    /// Inner loop for internal server errors only; nothing else is retried.
    retry: RetryPolicy,
    timeout: Duration,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: model_id.into(),
            retry: RetryPolicy::internal_error(),
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

    fn post(&self, model: &str, stream: bool, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let request = if stream {
            self.client
                .post(format!("{}/models/{model}:streamGenerateContent", self.base_url))
                .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
        } else {
            self.client
                .post(format!("{}/models/{model}:generateContent", self.base_url))
                .query(&[("key", self.api_key.as_str())])
        };
        request.header("Content-Type", "application/json").json(body)
    }
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

fn contains_hangul(text: &str) -> bool {
    text.chars().any(|c| ('\u{AC00}'..='\u{D7A3}').contains(&c))
}

/// System and user prompt folded into the single text Gemini receives.
fn compose_prompt(request: &GenerationRequest) -> String {
    let prompt = match request.system() {
        Some(system) => format!("System: {system}\n\nUser: {}", request.user_prompt),
        None => request.user_prompt.clone(),
    };

    if contains_hangul(&prompt) {
        tracing::info!(model = %request.model_id, "Korean text detected in prompt");
        format!("{SAME_LANGUAGE_HINT}\n\n{prompt}")
    } else {
        prompt
    }
}

fn build_request_body(request: &GenerationRequest) -> serde_json::Value {
    let safety: Vec<serde_json::Value> = HARM_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect();

    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": compose_prompt(request) }],
        }],
        "generationConfig": {
            "temperature": request.temperature,
            "topP": request.top_p,
            "maxOutputTokens": request.max_tokens,
        },
        "safetySettings": safety,
    })
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn candidate_text(candidate: &serde_json::Value) -> Option<String> {
    let parts = candidate["content"]["parts"].as_array()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().filter_map(|p| p["text"].as_str()).collect())
}

fn blocked(reason: FinishReason) -> RelayError {
    let description = reason.describe();
    tracing::warn!(reason = %description, "Gemini response blocked");
    let message = match reason {
        FinishReason::Safety => SAFETY_BLOCK_MESSAGE.to_string(),
        _ => format!("Response blocked: {description}"),
    };
    RelayError::ContentBlocked {
        reason: description,
        message,
    }
}

fn parse_response(body: &serde_json::Value) -> Result<Completion> {
    let meta = &body["usageMetadata"];
    let usage = TokenUsage::new(
        meta["promptTokenCount"].as_u64().unwrap_or(0),
        meta["candidatesTokenCount"].as_u64().unwrap_or(0),
    );

    let Some(candidate) = body["candidates"].get(0) else {
        // Prompt-level block: no candidates at all.
        if let Some(code) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(blocked(FinishReason::parse(code)));
        }
        return Ok(Completion {
            text: String::new(),
            usage,
        });
    };

    if let Some(text) = candidate_text(candidate) {
        return Ok(Completion { text, usage });
    }

    match candidate["finishReason"].as_str() {
        Some(code) => {
            if code == "SAFETY" {
                tracing::warn!(ratings = %candidate["safetyRatings"], "Safety ratings");
            }
            Err(blocked(FinishReason::parse(code)))
        }
        None => Ok(Completion {
            text: String::new(),
            usage,
        }),
    }
}

fn parse_stream_event(data: &str) -> Vec<SseEvent> {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
        return vec![];
    };
    if v["error"].is_object() {
        let message = v["error"]["message"].as_str().unwrap_or("stream error");
        return vec![SseEvent::Error(message.to_string())];
    }

    let candidate = &v["candidates"][0];
    if let Some(text) = candidate_text(candidate) {
        return vec![SseEvent::Text(text)];
    }

    let reason = candidate["finishReason"]
        .as_str()
        .or_else(|| v["promptFeedback"]["blockReason"].as_str());
    match reason {
        Some("SAFETY") => vec![
            SseEvent::Text(STREAM_FILTERED_NOTICE.to_string()),
            SseEvent::Done,
        ],
        Some(_) => vec![SseEvent::Done],
        None => vec![],
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> RelayError {
    let status_u16 = status.as_u16();
    let provider = Provider::Gemini;
    match status_u16 {
        429 => RelayError::RateLimited {
            provider,
            message: extract_error_message(body),
        },
        401 | 403 => RelayError::AuthError {
            provider,
            status: status_u16,
        },
        _ => RelayError::ProviderError {
            provider,
            status: status_u16,
            message: extract_error_message(body),
            retryable: status.is_server_error(),
        },
    }
}

/// Only internal server failures get another attempt.
fn is_internal_error(err: &RelayError) -> bool {
    match err {
        RelayError::ProviderError { status: 500, .. } => true,
        RelayError::ProviderError { message, .. } => {
            message.to_lowercase().contains("internal error")
        }
        _ => false,
    }
}

/// HTTP status behind an error, falling back to a status code quoted in the message.
fn status_signature(err: &RelayError) -> Option<u16> {
    match err {
        RelayError::RateLimited { .. } => Some(429),
        RelayError::AuthError { status, .. } => Some(*status),
        RelayError::ProviderError { status, .. } if *status != 0 => Some(*status),
        RelayError::ProviderError { message, .. } | RelayError::Other(message) => [500, 403, 429, 400]
            .into_iter()
            .find(|code| message.contains(&code.to_string())),
        _ => None,
    }
}

/// Replace known failure signatures with guidance for the caller.
fn rewrite_error(err: RelayError) -> RelayError {
    let guidance = match status_signature(&err) {
        Some(500) => "The Gemini service is temporarily degraded and returned an internal error (500). \
             Please try again later or use a different model."
            .to_string(),
        Some(status @ (401 | 403)) => format!(
            "Gemini API authentication failed ({status}). \
             Check that GOOGLE_GEMINI_API_KEY is valid and has access to this model."
        ),
        Some(429) => {
            "Gemini API rate limit exceeded (429). Please wait a moment before trying again."
                .to_string()
        }
        Some(400) => "Gemini API rejected the request as malformed (400). \
             Check the prompt and generation parameters."
            .to_string(),
        _ => return err,
    };
    tracing::debug!(original = %err, "Rewrote Gemini error");
    RelayError::Other(guidance)
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
        let started = Instant::now();
        let body = build_request_body(request);
        let body = &body;
        tracing::debug!(model = %request.model_id, "Gemini request");

        let outcome = self
            .retry
            .retry_if("gemini.generate", is_internal_error, move || async move {
                http::send_json(
                    Provider::Gemini,
                    self.post(&request.model_id, false, body),
                    self.timeout,
                    map_error,
                )
                .await
            })
            .await
            .map_err(rewrite_error)
            .and_then(|json| parse_response(&json));

        into_response(Provider::Gemini, &request.model_id, started, outcome)
    }

    fn stream_generate(&self, request: &GenerationRequest) -> TextStream {
        let builder = self.post(&request.model_id, true, &build_request_body(request));
        tracing::debug!(model = %request.model_id, "Gemini stream");
        text_stream(
            http::open_stream(Provider::Gemini, builder, self.timeout, map_error),
            parse_stream_event,
        )
    }

    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
