use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::{
    AnthropicAdapter, DynProvider, GeminiAdapter, OpenAiAdapter, RelayConfig, RetryPolicy,
};
use relay_types::{Provider, RelayError, Result};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Per-provider API keys. Empty values count as absent.
#[derive(Clone, Default)]
pub struct Credentials {
    keys: HashMap<Provider, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every provider's key from its environment variable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Provider::ALL
            .into_iter()
            .fold(Self::new(), |creds, provider| {
                match lookup(provider.credential_env()) {
                    Some(key) => creds.with_key(provider, key),
                    None => creds,
                }
            })
    }

    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        let key = key.into();
        if key.trim().is_empty() {
            self.keys.remove(&provider);
        } else {
            self.keys.insert(provider, key);
        }
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn has(&self, provider: Provider) -> bool {
        self.keys.contains_key(&provider)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut present: Vec<_> = self.keys.keys().collect();
        present.sort();
        f.debug_struct("Credentials").field("present", &present).finish()
    }
}

// ---------------------------------------------------------------------------
// ModelInfo / ModelCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: Provider,
    pub display_name: String,
    pub context_window: u64,
    pub max_output_tokens: u32,
    /// USD per million input tokens.
    pub input_price: f64,
    /// USD per million output tokens.
    pub output_price: f64,
    pub supports_streaming: bool,
}

/// A catalog entry together with whether its provider has a credential.
#[derive(Debug, Clone, Serialize)]
pub struct ModelListing {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelInfo>,
}

impl ModelCatalog {
    /// The built-in catalog.
    pub fn new() -> Result<Self> {
        let mut entries = Vec::new();

        // Claude models
        for (id, name, input, output) in [
            ("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", 0.80, 4.00),
            ("claude-sonnet-4-20250514", "Claude Sonnet 4", 3.00, 15.00),
            ("claude-opus-4-1-20250805", "Claude Opus 4.1", 15.00, 75.00),
        ] {
            entries.push(entry(id, Provider::Anthropic, name, 200_000, 4096, input, output));
        }

        // GPT models
        for (id, name, ctx, max, input, output) in [
            ("gpt-4o-mini", "GPT-4o Mini", 128_000, 16_384, 0.15, 0.60),
            ("gpt-4o", "GPT-4o", 128_000, 16_384, 2.50, 10.00),
            ("gpt-5", "GPT-5", 400_000, 128_000, 1.25, 10.00),
            ("gpt-5-mini", "GPT-5 Mini", 400_000, 128_000, 0.25, 2.00),
        ] {
            entries.push(entry(id, Provider::OpenAi, name, ctx, max, input, output));
        }

        // Gemini models
        for (id, name, input, output) in [
            ("gemini-2.5-flash", "Gemini 2.5 Flash", 0.10, 0.40),
            ("gemini-2.5-pro", "Gemini 2.5 Pro", 1.25, 10.00),
        ] {
            entries.push(entry(id, Provider::Gemini, name, 1_000_000, 8192, input, output));
        }

        Self::from_entries(entries)
    }

    /// Build a catalog, checking that every id classifies to exactly its
    /// declared provider.
    pub fn from_entries(entries: impl IntoIterator<Item = ModelInfo>) -> Result<Self> {
        let mut models = BTreeMap::new();
        for info in entries {
            let matching = Provider::matching(&info.id);
            match matching.as_slice() {
                [only] if *only == info.provider => {}
                [only] => {
                    return Err(RelayError::InvalidCatalog(format!(
                        "model {} is declared for {} but its prefix belongs to {only}",
                        info.id, info.provider
                    )))
                }
                [] => {
                    return Err(RelayError::InvalidCatalog(format!(
                        "model {} matches no provider prefix",
                        info.id
                    )))
                }
                _ => {
                    return Err(RelayError::InvalidCatalog(format!(
                        "model {} matches {} provider prefixes",
                        info.id,
                        matching.len()
                    )))
                }
            }
            if models.contains_key(&info.id) {
                return Err(RelayError::InvalidCatalog(format!(
                    "model {} registered twice",
                    info.id
                )));
            }
            models.insert(info.id.clone(), info);
        }
        Ok(Self { models })
    }

    pub fn lookup(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.get(model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    pub fn ids_for(&self, provider: Provider) -> impl Iterator<Item = &str> {
        self.models
            .values()
            .filter(move |m| m.provider == provider)
            .map(|m| m.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn entry(
    id: &str,
    provider: Provider,
    display_name: &str,
    context_window: u64,
    max_output_tokens: u32,
    input_price: f64,
    output_price: f64,
) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider,
        display_name: display_name.to_string(),
        context_window,
        max_output_tokens,
        input_price,
        output_price,
        supports_streaming: true,
    }
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

/// Builds the right adapter for a model id.
///
/// Adapters are constructed per resolution and share one HTTP client.
#[derive(Debug)]
pub struct AdapterRegistry {
    client: reqwest::Client,
    credentials: Credentials,
    config: RelayConfig,
    catalog: ModelCatalog,
    shared_retry: RetryPolicy,
    internal_retry: RetryPolicy,
}

impl AdapterRegistry {
    pub fn new(credentials: Credentials, config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let shared_retry = RetryPolicy {
            max_attempts: config.max_attempts,
            ..RetryPolicy::standard()
        };
        let internal_retry = RetryPolicy {
            max_attempts: config.max_attempts,
            ..RetryPolicy::internal_error()
        };
        Ok(Self {
            client: reqwest::Client::new(),
            credentials,
            config,
            catalog: ModelCatalog::new()?,
            shared_retry,
            internal_retry,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(Credentials::from_env(), RelayConfig::from_env()?)
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Override the shared policy (OpenAI, Anthropic) and the Gemini
    /// internal-error loop.
    pub fn with_retry_policies(mut self, shared: RetryPolicy, internal_error: RetryPolicy) -> Self {
        self.shared_retry = shared;
        self.internal_retry = internal_error;
        self
    }

    /// Pick the adapter for `model_id`. Fails before any network activity
    /// when the prefix is unknown or the provider has no credential.
    pub fn resolve(&self, model_id: &str) -> Result<DynProvider> {
        let provider = Provider::classify(model_id).ok_or_else(|| RelayError::UnknownModel {
            model_id: model_id.to_string(),
        })?;
        let key = self
            .credentials
            .get(provider)
            .ok_or_else(|| RelayError::MissingCredential {
                provider,
                env_var: provider.credential_env().to_string(),
            })?;

        tracing::debug!(model = %model_id, provider = %provider, "Resolved adapter");

        let timeout = self.config.timeout();
        let base_url = self.config.base_url(provider);
        let adapter = match provider {
            Provider::OpenAi => {
                let mut a = OpenAiAdapter::new(key, model_id)
                    .with_client(self.client.clone())
                    .with_retry_policy(self.shared_retry.clone())
                    .with_timeout(timeout);
                if let Some(url) = base_url {
                    a = a.with_base_url(url);
                }
                DynProvider::new(a)
            }
            Provider::Anthropic => {
                let mut a = AnthropicAdapter::new(key, model_id)
                    .with_client(self.client.clone())
                    .with_retry_policy(self.shared_retry.clone())
                    .with_timeout(timeout);
                if let Some(url) = base_url {
                    a = a.with_base_url(url);
                }
                DynProvider::new(a)
            }
            Provider::Gemini => {
                let mut a = GeminiAdapter::new(key, model_id)
                    .with_client(self.client.clone())
                    .with_retry_policy(self.internal_retry.clone())
                    .with_timeout(timeout);
                if let Some(url) = base_url {
                    a = a.with_base_url(url);
                }
                DynProvider::new(a)
            }
        };
        Ok(adapter)
    }

    /// Catalog ids of every provider that has a credential.
    pub fn list_available(&self) -> BTreeSet<String> {
        self.catalog
            .iter()
            .filter(|m| self.credentials.has(m.provider))
            .map(|m| m.id.clone())
            .collect()
    }

    /// The full catalog, each entry flagged with its availability.
    pub fn models(&self) -> Vec<ModelListing> {
        self.catalog
            .iter()
            .map(|info| ModelListing {
                available: self.credentials.has(info.provider),
                info: info.clone(),
            })
            .collect()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
