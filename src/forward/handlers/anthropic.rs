//! Anthropic Messages API adapter

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};

use super::{checked_api_key, content_with_attachment, ProviderAdapterImpl};
use crate::forward::context::{
    Attachment, NormalizedRequest, NormalizedResponse, Provider, Role, Turn, Usage,
};
use crate::forward::error::{ForwardError, ForwardResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/v1/messages";

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: &str, base_url: &str, default_model: &str) -> ForwardResult<Self> {
        Ok(Self {
            api_key: checked_api_key(Provider::Anthropic, api_key)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
        })
    }
}

/// The Messages API has no system role here; system turns are sent as user
/// turns wrapped in `<system>` tags, in place.
fn map_turn(turn: &Turn) -> Value {
    match turn.role {
        Role::System => json!({
            "role": "user",
            "content": format!("<system>\n{}\n</system>", turn.content.flatten_text()),
        }),
        _ => json!({
            "role": turn.role.as_str(),
            "content": turn.content,
        }),
    }
}

fn image_part(attachment: &Attachment) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": attachment.mime_type,
            "data": attachment.base64_data,
        }
    })
}

fn extract_usage(response: &Value) -> Usage {
    let usage = response.get("usage");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    Usage::new(count("input_tokens"), count("output_tokens"))
}

impl ProviderAdapterImpl for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn error_label(&self) -> &'static str {
        "Claude"
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, MESSAGES_PATH)
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("x-api-key", value);
        }
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn transform_request(&self, request: &NormalizedRequest) -> Value {
        let mut messages: Vec<Value> = request.turns.iter().map(map_turn).collect();

        if let (Some(attachment), Some(idx)) = (&request.attachment, request.final_user_index()) {
            messages[idx]["content"] =
                content_with_attachment(&request.turns[idx].content, image_part(attachment));
        }

        json!({
            "model": self.resolve_model(request),
            "messages": messages,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
        })
    }

    fn parse_response(
        &self,
        body: &Value,
        requested_model: &str,
    ) -> ForwardResult<NormalizedResponse> {
        let content = body
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                ForwardError::Vendor("Claude API error: response has no text content".to_string())
            })?;

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(requested_model);

        Ok(NormalizedResponse {
            provider: Provider::Anthropic,
            model: model.to_string(),
            content: content.to_string(),
            usage: extract_usage(body),
        })
    }
}
