use serde::{Deserialize, Serialize};
use std::time::Duration;

use relay_types::{Provider, RelayError, Result};

/// Per-attempt bound on a vendor call when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// RelayConfig
// ---------------------------------------------------------------------------

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL override for the OpenAI API.
    pub openai_base_url: Option<String>,
    /// Base URL override for the Anthropic API.
    pub anthropic_base_url: Option<String>,
    /// Base URL override for the Gemini API (including the version segment).
    pub gemini_base_url: Option<String>,
    /// Bound on each non-streaming attempt, and on the header wait of a stream.
    pub timeout_secs: u64,
    /// Total attempts per generation, first one included.
    pub max_attempts: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            openai_base_url: None,
            anthropic_base_url: None,
            gemini_base_url: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_attempts: 3,
        }
    }
}

impl RelayConfig {
    /// Read `RELAY_*` overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.openai_base_url = get("RELAY_OPENAI_BASE_URL");
        config.anthropic_base_url = get("RELAY_ANTHROPIC_BASE_URL");
        config.gemini_base_url = get("RELAY_GEMINI_BASE_URL");

        if let Some(raw) = get("RELAY_TIMEOUT_SECS") {
            config.timeout_secs = parse_positive("RELAY_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("RELAY_MAX_ATTEMPTS") {
            config.max_attempts = parse_positive("RELAY_MAX_ATTEMPTS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_url(mut self, provider: Provider, url: impl Into<String>) -> Self {
        let url = Some(url.into());
        match provider {
            Provider::OpenAi => self.openai_base_url = url,
            Provider::Anthropic => self.anthropic_base_url = url,
            Provider::Gemini => self.gemini_base_url = url,
        }
        self
    }

    pub fn base_url(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai_base_url.as_deref(),
            Provider::Anthropic => self.anthropic_base_url.as_deref(),
            Provider::Gemini => self.gemini_base_url.as_deref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(RelayError::InvalidRequest(
                "timeout must be at least one second".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(RelayError::InvalidRequest(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_positive<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::InvalidRequest(format!("{key} must be a positive integer, got {raw:?}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
