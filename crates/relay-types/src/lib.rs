//! Shared types and errors for the Relay gateway.
//!
//! This crate provides the foundational types used across the other Relay crates:
//! - `RelayError`: unified error taxonomy (configuration, vendor, content policy)
//! - `Provider`: the vendor families the gateway can route to

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error type for all Relay subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // === Configuration Errors ===
    #[error("Unknown model ID: {model_id}")]
    UnknownModel { model_id: String },

    #[error("{provider} API key not found in environment ({env_var})")]
    MissingCredential { provider: Provider, env_var: String },

    #[error("Invalid model catalog: {0}")]
    InvalidCatalog(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: Provider,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider} (HTTP 429): {message}")]
    RateLimited { provider: Provider, message: String },

    #[error("Authentication failed for provider {provider} (HTTP {status})")]
    AuthError { provider: Provider, status: u16 },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: Provider, timeout_ms: u64 },

    // === Content Policy ===
    #[error("{message}")]
    ContentBlocked { reason: String, message: String },

    // === Generic ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::RateLimited { .. }
                | RelayError::RequestTimeout { .. }
                | RelayError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        self.is_configuration()
            || matches!(
                self,
                RelayError::AuthError { .. }
                    | RelayError::ContentBlocked { .. }
                    | RelayError::ProviderError { retryable: false, .. }
            )
    }

    /// Configuration errors fail fast, before any network activity, and are the
    /// only errors that reach the caller as `Err` instead of an error response.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownModel { .. }
                | RelayError::MissingCredential { .. }
                | RelayError::InvalidCatalog(_)
                | RelayError::InvalidRequest(_)
        )
    }

    /// Maps the error to an HTTP status code for a front-end.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RelayError::UnknownModel { .. }
            | RelayError::MissingCredential { .. }
            | RelayError::InvalidRequest(_) => Some(400),
            RelayError::InvalidCatalog(_) => Some(500),
            RelayError::RateLimited { .. } => Some(429),
            RelayError::AuthError { status, .. } => Some(*status),
            RelayError::ProviderError { status, .. } if *status != 0 => Some(*status),
            RelayError::RequestTimeout { .. } => Some(504),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Vendor family behind a model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Gemini];

    /// Model-id prefix owned by this provider.
    pub fn prefix(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt",
            Provider::Anthropic => "claude",
            Provider::Gemini => "gemini",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn credential_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GOOGLE_GEMINI_API_KEY",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Classify a model id by prefix. Returns `None` when no family matches.
    pub fn classify(model_id: &str) -> Option<Provider> {
        Provider::ALL
            .into_iter()
            .find(|p| model_id.starts_with(p.prefix()))
    }

    /// All providers whose prefix matches `model_id`. Used to check that the
    /// partition stays disjoint.
    pub fn matching(model_id: &str) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| model_id.starts_with(p.prefix()))
            .collect()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
