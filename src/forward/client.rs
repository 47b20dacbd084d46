//! HTTP client utilities for vendor calls
//!
//! One shared `reqwest::Client` per process, a bounded retry loop and the
//! helpers that turn vendor error bodies into messages.

use std::time::{Duration, Instant};

use rand::{rngs::OsRng, RngCore};
use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use serde_json::Value;

use super::context::RetryConfig;
use super::error::{ForwardError, ForwardResult};
use crate::logger;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Create an HTTP client with the given whole-request timeout
pub fn create_client(timeout_secs: u64) -> ForwardResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| ForwardError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Determine if an HTTP status code should trigger a retry
pub fn should_retry(status: u16) -> bool {
    // Server errors and rate limiting only; 4xx means the request itself is bad
    matches!(status, 500 | 502 | 503 | 504 | 429)
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config.initial_delay_ms;
    let max_delay = config.max_delay_ms;

    let exp_delay = (1u64 << attempt.min(10)).saturating_mul(base_delay);
    let delay = exp_delay.min(max_delay);

    // Up to 25% jitter
    let mut jitter_bytes = [0u8; 8];
    OsRng.fill_bytes(&mut jitter_bytes);
    let jitter = u64::from_le_bytes(jitter_bytes) % (delay / 4 + 1);

    Duration::from_millis(delay + jitter)
}

async fn make_request(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    body: &Value,
) -> Result<Response, reqwest::Error> {
    let start = Instant::now();
    logger::debug("client", &format!("Sending request to: {}", url));

    let response = client.post(url).headers(headers).json(body).send().await?;

    logger::debug(
        "client",
        &format!(
            "Response status: {} ({}ms)",
            response.status(),
            start.elapsed().as_millis()
        ),
    );
    Ok(response)
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn transport_error(err: &reqwest::Error) -> ForwardError {
    if err.is_timeout() {
        ForwardError::Internal("Request to provider timed out".to_string())
    } else if err.is_connect() {
        ForwardError::Internal(format!("Connection to provider failed: {}", err))
    } else {
        ForwardError::Internal(format!("Request to provider failed: {}", err))
    }
}

/// POST `body` to `url`, retrying transient failures up to `config.max_attempts`.
///
/// Returns the last response, successful or not; the caller decides what a
/// non-2xx status means. Transport errors on the final attempt are returned
/// as errors.
pub async fn send_with_retry(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    body: &Value,
    config: &RetryConfig,
) -> ForwardResult<Response> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let last_attempt = attempt >= max_attempts;

        match make_request(client, url, headers.clone(), body).await {
            Ok(response) => {
                let status = response.status().as_u16();
                if last_attempt || !should_retry(status) {
                    return Ok(response);
                }
                logger::warn(
                    "client",
                    &format!("Retrying after HTTP {} (attempt {}/{})", status, attempt, max_attempts),
                );
            }
            Err(e) => {
                logger::error("client", &format!("Request failed: {}", e));
                if last_attempt || !is_transient(&e) {
                    return Err(transport_error(&e));
                }
            }
        }

        tokio::time::sleep(calculate_retry_delay(attempt, config)).await;
    }
}

/// Message for a failed vendor call: the vendor's `error.message` when the
/// body has one, else the status text.
pub fn vendor_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_u16().to_string())
        })
}
