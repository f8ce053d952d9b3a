//! Provider-agnostic text generation over OpenAI, Anthropic and Gemini.
//!
//! Provides the `ProviderAdapter` trait and its three vendor adapters, the
//! retry policy, SSE fragment streaming, the `AdapterRegistry` factory and the
//! `Gateway` façade that front-ends call.

mod anthropic;
mod config;
mod gateway;
mod gemini;
mod http;
mod openai;
mod provider;
mod registry;
mod retry;
mod streaming;
mod types;

pub use anthropic::AnthropicAdapter;
pub use config::{RelayConfig, DEFAULT_TIMEOUT};
pub use gateway::*;
pub use gemini::{GeminiAdapter, SAFETY_BLOCK_MESSAGE, STREAM_FILTERED_NOTICE};
pub use openai::{is_reasoning_model, native_model_id, OpenAiAdapter};
pub use provider::{DynProvider, ProviderAdapter, TextStream};
pub use registry::*;
pub use retry::{Backoff, RetryPolicy};
pub use types::*;

pub use relay_types::{Provider, RelayError, Result};
