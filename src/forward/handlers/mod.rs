//! Provider adapters
//!
//! Each vendor implements `ProviderAdapterImpl` (URL, headers, request and
//! response mapping). The HTTP round trip, status handling and logging are
//! shared in `execute`, so a new vendor only needs a new variant here.

pub mod anthropic;
pub mod openai;

use std::collections::HashMap;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::{json, Value};

use super::client;
use super::context::{MessageContent, NormalizedRequest, NormalizedResponse, Provider, RetryConfig};
use super::error::{ForwardError, ForwardResult};
use crate::config::Settings;
use crate::logger;

/// Provider adapter enum for dispatching to the correct vendor
#[derive(Debug, Clone)]
pub enum ProviderAdapter {
    Anthropic(anthropic::AnthropicAdapter),
    OpenAI(openai::OpenAIAdapter),
}

impl ProviderAdapter {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderAdapter::Anthropic(a) => a.provider(),
            ProviderAdapter::OpenAI(a) => a.provider(),
        }
    }

    /// Send `request` to the vendor and normalize the reply
    pub async fn complete(
        &self,
        transport: &Transport,
        request: &NormalizedRequest,
    ) -> ForwardResult<NormalizedResponse> {
        match self {
            ProviderAdapter::Anthropic(a) => execute(a, transport, request).await,
            ProviderAdapter::OpenAI(a) => execute(a, transport, request).await,
        }
    }
}

/// Vendor-specific behavior
pub trait ProviderAdapterImpl: Send + Sync {
    fn provider(&self) -> Provider;

    /// Prefix used in vendor error messages ("Claude", "OpenAI")
    fn error_label(&self) -> &'static str;

    /// Full endpoint URL
    fn url(&self) -> String;

    /// Authentication and content headers
    fn build_headers(&self) -> HeaderMap;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;

    /// Map the normalized request to the vendor body
    fn transform_request(&self, request: &NormalizedRequest) -> Value;

    /// Map a 2xx vendor body to the normalized response
    fn parse_response(&self, body: &Value, requested_model: &str)
        -> ForwardResult<NormalizedResponse>;

    fn resolve_model<'a>(&'a self, request: &'a NormalizedRequest) -> &'a str {
        request.model.as_deref().unwrap_or_else(|| self.default_model())
    }
}

/// HTTP client and retry policy shared by all adapters
#[derive(Debug, Clone)]
pub struct Transport {
    pub client: Client,
    pub retry: RetryConfig,
}

impl Transport {
    pub fn from_settings(cfg: &Settings) -> ForwardResult<Self> {
        Ok(Self {
            client: client::create_client(cfg.request_timeout_secs)?,
            retry: RetryConfig::from_settings(cfg),
        })
    }
}

/// Adapters built once at startup from configuration
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    transport: Transport,
    adapters: HashMap<Provider, ProviderAdapter>,
}

impl AdapterRegistry {
    /// Build every adapter whose API key is configured.
    ///
    /// A missing key leaves that provider out (requests for it fail with a
    /// configuration error); a malformed key fails here.
    pub fn from_settings(cfg: &Settings) -> ForwardResult<Self> {
        let mut registry = Self {
            transport: Transport::from_settings(cfg)?,
            adapters: HashMap::new(),
        };

        match cfg.anthropic.api_key() {
            Some(key) => registry.insert(ProviderAdapter::Anthropic(
                anthropic::AnthropicAdapter::new(
                    key,
                    cfg.anthropic.base_url_or(crate::config::DEFAULT_ANTHROPIC_BASE_URL),
                    cfg.anthropic.default_model_or(crate::config::DEFAULT_ANTHROPIC_MODEL),
                )?,
            )),
            None => logger::warn(
                "adapters",
                "CLAUDE_API_KEY is not set; anthropic requests will be rejected",
            ),
        }

        match cfg.openai.api_key() {
            Some(key) => registry.insert(ProviderAdapter::OpenAI(openai::OpenAIAdapter::new(
                key,
                cfg.openai.base_url_or(crate::config::DEFAULT_OPENAI_BASE_URL),
                cfg.openai.default_model_or(crate::config::DEFAULT_OPENAI_MODEL),
            )?)),
            None => logger::warn(
                "adapters",
                "OPENAI_API_KEY is not set; openai requests will be rejected",
            ),
        }

        Ok(registry)
    }

    pub fn insert(&mut self, adapter: ProviderAdapter) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> ForwardResult<&ProviderAdapter> {
        self.adapters.get(&provider).ok_or_else(|| {
            ForwardError::Configuration(format!("{} is not set", provider.api_key_env()))
        })
    }

    /// Route `request` to its provider's adapter.
    pub async fn complete(&self, request: &NormalizedRequest) -> ForwardResult<NormalizedResponse> {
        self.get(request.provider)?
            .complete(&self.transport, request)
            .await
    }
}

/// Validate an API key for use in a header at construction time.
pub(crate) fn checked_api_key(provider: Provider, api_key: &str) -> ForwardResult<String> {
    let key = api_key.trim();
    if key.is_empty() {
        return Err(ForwardError::Configuration(format!(
            "{} is not set",
            provider.api_key_env()
        )));
    }
    HeaderValue::from_str(key).map_err(|_| {
        ForwardError::Configuration(format!(
            "{} contains characters not allowed in a header",
            provider.api_key_env()
        ))
    })?;
    Ok(key.to_string())
}

/// Content of the final user turn once the attachment part is added.
pub(crate) fn content_with_attachment(content: &MessageContent, attachment_part: Value) -> Value {
    let mut parts = match content {
        MessageContent::Text(text) => vec![json!({ "type": "text", "text": text })],
        MessageContent::Parts(parts) => parts.clone(),
    };
    parts.push(attachment_part);
    Value::Array(parts)
}

/// First 500 bytes of a body for logs, cut on a char boundary.
fn preview(text: &str) -> &str {
    let mut end = text.len().min(500);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn execute<A: ProviderAdapterImpl>(
    adapter: &A,
    transport: &Transport,
    request: &NormalizedRequest,
) -> ForwardResult<NormalizedResponse> {
    let source = adapter.provider().as_str();
    let label = adapter.error_label();
    let model = adapter.resolve_model(request);
    let start = Instant::now();

    logger::info(
        source,
        &format!(
            "Request started: model={}, turns={}, attachment={}",
            model,
            request.turns.len(),
            request.attachment.is_some()
        ),
    );

    let body = adapter.transform_request(request);
    let response = client::send_with_retry(
        &transport.client,
        &adapter.url(),
        adapter.build_headers(),
        &body,
        &transport.retry,
    )
    .await?;

    let status = response.status();
    let response_text = response.text().await.map_err(|e| {
        logger::error(source, &format!("Failed to read response body: {}", e));
        ForwardError::Vendor(format!("{} API error: failed to read response: {}", label, e))
    })?;

    if !status.is_success() {
        let message = client::vendor_error_message(status, &response_text);
        logger::warn(
            source,
            &format!(
                "Request failed: status={}, body={}",
                status.as_u16(),
                preview(&response_text)
            ),
        );
        return Err(ForwardError::Vendor(format!("{} API error: {}", label, message)));
    }

    let response_body: Value = serde_json::from_str(&response_text).map_err(|e| {
        logger::error(
            source,
            &format!(
                "Failed to parse response JSON: {}, body: {}",
                e,
                preview(&response_text)
            ),
        );
        ForwardError::Vendor(format!("{} API error: invalid JSON response", label))
    })?;

    let normalized = adapter.parse_response(&response_body, model)?;

    logger::info(
        source,
        &format!(
            "Request completed: model={}, latency={}ms, tokens={}/{}",
            normalized.model,
            start.elapsed().as_millis(),
            normalized.usage.prompt_tokens,
            normalized.usage.completion_tokens
        ),
    );

    Ok(normalized)
}
