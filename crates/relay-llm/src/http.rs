//! Shared request plumbing for the vendor adapters.

use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;

use relay_types::{Provider, RelayError, Result};

/// Vendor-specific translation of a non-2xx reply.
pub(crate) type ErrorMapper = fn(StatusCode, &str) -> RelayError;

/// Transport failures (connect, reset, body read) are treated as transient.
pub(crate) fn transport_error(provider: Provider, err: reqwest::Error) -> RelayError {
    RelayError::ProviderError {
        provider,
        status: 0,
        message: err.to_string(),
        retryable: true,
    }
}

fn timeout_error(provider: Provider, timeout: Duration) -> RelayError {
    RelayError::RequestTimeout {
        provider,
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// Send a JSON request and return the decoded body of a 2xx reply.
///
/// The whole exchange, including reading the body, is bounded by `timeout`.
pub(crate) async fn send_json(
    provider: Provider,
    request: RequestBuilder,
    timeout: Duration,
    map_error: ErrorMapper,
) -> Result<serde_json::Value> {
    let exchange = async {
        let resp = request
            .send()
            .await
            .map_err(|e| transport_error(provider, e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_error(provider, e))?;

        if !status.is_success() {
            return Err(map_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| RelayError::ProviderError {
            provider,
            status: status.as_u16(),
            message: format!("Failed to parse response JSON: {e}"),
            retryable: false,
        })
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| timeout_error(provider, timeout))?
}

/// Open a streaming request. `timeout` bounds the wait for the response
/// headers only; the body is consumed by the caller.
pub(crate) async fn open_stream(
    provider: Provider,
    request: RequestBuilder,
    timeout: Duration,
    map_error: ErrorMapper,
) -> Result<reqwest::Response> {
    let resp = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| timeout_error(provider, timeout))?
        .map_err(|e| transport_error(provider, e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(map_error(status, &body))
}

/// Pull `error.message` out of a JSON error body, falling back to the raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

/// Status-code classification shared by the OpenAI and Anthropic adapters.
pub(crate) fn classify_status(provider: Provider, status: StatusCode, body: &str) -> RelayError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => RelayError::RateLimited {
            provider,
            message: extract_error_message(body),
        },
        401 | 403 => RelayError::AuthError {
            provider,
            status: status_u16,
        },
        408 | 500 | 502 | 503 | 504 | 529 => RelayError::ProviderError {
            provider,
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => RelayError::ProviderError {
            provider,
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}
