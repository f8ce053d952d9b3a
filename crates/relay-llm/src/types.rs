use serde::{Deserialize, Serialize};
use std::time::Duration;

use relay_types::{RelayError, Result};

// ---------------------------------------------------------------------------
// GenerationRequest
// ---------------------------------------------------------------------------

fn default_sampling() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    2048
}

/// Canonical, vendor-agnostic generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default = "default_sampling")]
    pub temperature: f32,
    #[serde(default = "default_sampling")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Front-end routing hint: whether the caller asked for `Gateway::stream`
    /// or `Gateway::generate`. Adapters pick their mode from the method called.
    #[serde(default)]
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(model_id: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: None,
            user_prompt: user_prompt.into(),
            temperature: default_sampling(),
            top_p: default_sampling(),
            max_tokens: default_max_tokens(),
            stream: false,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// System prompt, treating an empty string as absent.
    pub fn system(&self) -> Option<&str> {
        self.system_prompt.as_deref().filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        // Ids end up in vendor URL paths.
        if let Some(c) = self
            .model_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(RelayError::InvalidRequest(format!(
                "model_id contains invalid character {c:?}"
            )));
        }
        if self.user_prompt.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "user_prompt must not be empty".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(RelayError::InvalidRequest(
                "max_tokens must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TokenUsage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

// ---------------------------------------------------------------------------
// GenerationResponse
// ---------------------------------------------------------------------------

/// Canonical result returned by every adapter regardless of vendor.
///
/// Build through [`success`](Self::success) and [`failure`](Self::failure):
/// an error always has empty text and a message, a success never has a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub tokens_used: TokenUsage,
    pub response_time_ms: u64,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GenerationResponse {
    pub fn success(
        model: impl Into<String>,
        text: impl Into<String>,
        usage: TokenUsage,
        elapsed: Duration,
    ) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            tokens_used: usage,
            response_time_ms: elapsed.as_millis() as u64,
            status: Status::Success,
            error_message: None,
        }
    }

    pub fn failure(
        model: impl Into<String>,
        message: impl Into<String>,
        usage: TokenUsage,
        elapsed: Duration,
    ) -> Self {
        Self {
            text: String::new(),
            model: model.into(),
            tokens_used: usage,
            response_time_ms: elapsed.as_millis() as u64,
            status: Status::Error,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

// ---------------------------------------------------------------------------
// FinishReason (Gemini-style content gating)
// ---------------------------------------------------------------------------

/// Vendor-reported reason generation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Safety,
    MaxTokens,
    Recitation,
    Other,
    Unknown(String),
}

impl FinishReason {
    pub fn parse(code: &str) -> Self {
        match code {
            "STOP" => FinishReason::Stop,
            "SAFETY" => FinishReason::Safety,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "RECITATION" => FinishReason::Recitation,
            "OTHER" => FinishReason::Other,
            other => FinishReason::Unknown(other.to_string()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FinishReason::Stop => "STOP: Natural stop point reached".into(),
            FinishReason::Safety => "SAFETY: Response filtered due to safety concerns".into(),
            FinishReason::MaxTokens => "MAX_TOKENS: Maximum token limit reached".into(),
            FinishReason::Recitation => "RECITATION: Response filtered due to recitation".into(),
            FinishReason::Other => "OTHER: Response unavailable".into(),
            FinishReason::Unknown(code) => format!("Unknown reason: {code}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
