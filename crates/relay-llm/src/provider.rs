use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Instant;

use crate::{GenerationRequest, GenerationResponse, TokenUsage};
use relay_types::{Provider, Result};

/// Finite, non-restartable stream of text fragments.
///
/// On failure the last fragment is `"Error: <message>"`.
pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// One logical generation. Retries happen inside; failures come back as
    /// an error response, never as `Err`.
    async fn generate(&self, request: &GenerationRequest) -> GenerationResponse;
    fn stream_generate(&self, request: &GenerationRequest) -> TextStream;
    fn provider(&self) -> Provider;
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
        self.0.generate(request).await
    }

    pub fn stream_generate(&self, request: &GenerationRequest) -> TextStream {
        self.0.stream_generate(request)
    }

    pub fn provider(&self) -> Provider {
        self.0.provider()
    }

    pub fn model_id(&self) -> &str {
        self.0.model_id()
    }
}

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynProvider")
            .field("provider", &self.provider())
            .field("model_id", &self.model_id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Boundary conversion
// ---------------------------------------------------------------------------

/// Text and usage extracted from a successful vendor response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Convert the outcome of an adapter call into the canonical response,
/// stamping the elapsed time measured from `started`.
pub(crate) fn into_response(
    provider: Provider,
    model: &str,
    started: Instant,
    outcome: Result<Completion>,
) -> GenerationResponse {
    let elapsed = started.elapsed();
    match outcome {
        Ok(Completion { text, usage }) => {
            tracing::info!(
                provider = %provider,
                model = %model,
                input_tokens = usage.input,
                output_tokens = usage.output,
                elapsed_ms = elapsed.as_millis() as u64,
                "Generation complete"
            );
            GenerationResponse::success(model, text, usage, elapsed)
        }
        Err(e) => {
            tracing::error!(
                provider = %provider,
                model = %model,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Generation failed"
            );
            GenerationResponse::failure(model, e.to_string(), TokenUsage::default(), elapsed)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use futures::StreamExt;
    use relay_types::RelayError;
    use std::collections::HashMap;
    use std::time::Duration;

    struct MockAdapter;

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        async fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
            GenerationResponse::success(
                &request.model_id,
                "Hello from mock",
                TokenUsage::new(2, 3),
                Duration::from_millis(5),
            )
        }

        fn stream_generate(&self, _request: &GenerationRequest) -> TextStream {
            Box::pin(futures::stream::iter(vec!["Hel".to_string(), "lo".to_string()]))
        }

        fn provider(&self) -> Provider {
            Provider::OpenAi
        }

        fn model_id(&self) -> &str {
            "gpt-4o"
        }
    }

    #[tokio::test]
    async fn dyn_provider_generate() {
        let provider = DynProvider::new(MockAdapter);
        let resp = provider.generate(&GenerationRequest::new("gpt-4o", "hi")).await;
        assert_eq!(resp.text, "Hello from mock");
        assert_eq!(resp.tokens_used.total, 5);
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn dyn_provider_stream_in_order() {
        let provider = DynProvider::new(MockAdapter);
        let fragments: Vec<String> = provider
            .stream_generate(&GenerationRequest::new("gpt-4o", "hi"))
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[test]
    fn dyn_provider_in_hashmap() {
        let mut providers: HashMap<Provider, DynProvider> = HashMap::new();
        providers.insert(Provider::OpenAi, DynProvider::new(MockAdapter));

        let provider = providers.get(&Provider::OpenAi).unwrap();
        assert_eq!(provider.provider(), Provider::OpenAi);
        assert_eq!(provider.model_id(), "gpt-4o");
    }

    #[test]
    fn error_outcome_becomes_failure_response() {
        let resp = into_response(
            Provider::Anthropic,
            "claude-sonnet-4-20250514",
            Instant::now(),
            Err(RelayError::AuthError {
                provider: Provider::Anthropic,
                status: 401,
            }),
        );
        assert_eq!(resp.status, Status::Error);
        assert!(resp.text.is_empty());
        assert_eq!(
            resp.error_message.as_deref(),
            Some("Authentication failed for provider anthropic (HTTP 401)")
        );
        assert_eq!(resp.tokens_used, TokenUsage::default());
    }

    #[test]
    fn success_outcome_keeps_usage() {
        let resp = into_response(
            Provider::Gemini,
            "gemini-2.5-flash",
            Instant::now(),
            Ok(Completion {
                text: "ok".into(),
                usage: TokenUsage::new(10, 1),
            }),
        );
        assert!(resp.is_success());
        assert_eq!(resp.model, "gemini-2.5-flash");
        assert_eq!(resp.tokens_used.total, 11);
        assert!(resp.error_message.is_none());
    }
}
