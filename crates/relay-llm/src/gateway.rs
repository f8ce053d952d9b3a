//! Entry point used by front-ends: single-shot, streaming and batch generation.

use futures::stream::{self, StreamExt};
use futures::Stream;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::pin::Pin;
use tracing::Instrument;
use uuid::Uuid;

use crate::registry::ModelListing;
use crate::{
    AdapterRegistry, DynProvider, GenerationRequest, GenerationResponse, Status, TextStream,
    TokenUsage,
};
use relay_types::{RelayError, Result};

pub const SERVICE_NAME: &str = "relay";

/// Upper bound on `iterations` for a single batch call.
pub const MAX_BATCH_ITERATIONS: usize = 50;

// ---------------------------------------------------------------------------
// GatewayEvent
// ---------------------------------------------------------------------------

/// One event of a streamed generation. A stream is any number of `Text`
/// events followed by exactly one `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Text { text: String },
    Done,
}

impl GatewayEvent {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GatewayEvent::Text { text } => serde_json::json!({ "text": text }),
            GatewayEvent::Done => serde_json::json!({ "done": true }),
        }
    }

    /// Render as a server-sent event frame.
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

impl Serialize for GatewayEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = GatewayEvent> + Send>>;

fn into_events(fragments: TextStream) -> EventStream {
    fragments
        .map(|text| GatewayEvent::Text { text })
        .chain(stream::once(futures::future::ready(GatewayEvent::Done)))
        .boxed()
}

// ---------------------------------------------------------------------------
// Batch types
// ---------------------------------------------------------------------------

fn default_iterations() -> usize {
    1
}

/// Inbound batch shape: a generation request plus an iteration count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(flatten)]
    pub request: GenerationRequest,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

impl BatchRequest {
    pub fn new(request: GenerationRequest, iterations: usize) -> Self {
        Self {
            request,
            iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// 1-based position within the batch.
    pub iteration: usize,
    pub text: String,
    pub tokens_used: TokenUsage,
    pub response_time_ms: u64,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BatchRecord {
    fn from_response(iteration: usize, resp: GenerationResponse) -> Self {
        Self {
            iteration,
            text: resp.text,
            tokens_used: resp.tokens_used,
            response_time_ms: resp.response_time_ms,
            status: resp.status,
            error_message: resp.error_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchRecord>,
    pub model: String,
}

/// Run `iterations` concurrent generations on one adapter. One failure never
/// cancels the others.
async fn fan_out(
    adapter: &DynProvider,
    request: &GenerationRequest,
    iterations: usize,
) -> Vec<BatchRecord> {
    let calls = (1..=iterations).map(|iteration| async move {
        let resp = adapter.generate(request).await;
        BatchRecord::from_response(iteration, resp)
    });
    futures::future::join_all(calls).await
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Façade over the adapter registry. Only configuration errors come back as
/// `Err`; vendor failures arrive as error responses.
#[derive(Debug)]
pub struct Gateway {
    registry: AdapterRegistry,
}

impl Gateway {
    pub fn new(registry: AdapterRegistry) -> Self {
        Self { registry }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(AdapterRegistry::from_env()?))
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        request.validate()?;
        let adapter = self.registry.resolve(&request.model_id)?;

        let span = tracing::info_span!(
            "generate",
            request_id = %Uuid::new_v4(),
            model = %request.model_id
        );
        Ok(adapter.generate(request).instrument(span).await)
    }

    pub fn stream(&self, request: &GenerationRequest) -> Result<EventStream> {
        request.validate()?;
        let adapter = self.registry.resolve(&request.model_id)?;
        tracing::info!(
            request_id = %Uuid::new_v4(),
            model = %request.model_id,
            "Starting stream"
        );
        Ok(into_events(adapter.stream_generate(request)))
    }

    pub async fn batch(
        &self,
        request: &GenerationRequest,
        iterations: usize,
    ) -> Result<BatchResponse> {
        if !(1..=MAX_BATCH_ITERATIONS).contains(&iterations) {
            return Err(RelayError::InvalidRequest(format!(
                "iterations must be between 1 and {MAX_BATCH_ITERATIONS}, got {iterations}"
            )));
        }
        request.validate()?;
        let adapter = self.registry.resolve(&request.model_id)?;

        let span = tracing::info_span!(
            "batch",
            request_id = %Uuid::new_v4(),
            model = %request.model_id,
            iterations
        );
        let results = fan_out(&adapter, request, iterations).instrument(span).await;

        let failed = results.iter().filter(|r| r.status == Status::Error).count();
        tracing::info!(model = %request.model_id, iterations, failed, "Batch complete");

        Ok(BatchResponse {
            results,
            model: request.model_id.clone(),
        })
    }

    pub fn list_models(&self) -> Vec<ModelListing> {
        self.registry.models()
    }

    pub fn available_models(&self) -> BTreeSet<String> {
        self.registry.list_available()
    }

    pub fn health(&self) -> serde_json::Value {
        serde_json::json!({ "status": "healthy", "service": SERVICE_NAME })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
