//! OpenAI Chat Completions adapter

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};

use super::{checked_api_key, content_with_attachment, ProviderAdapterImpl};
use crate::forward::context::{Attachment, NormalizedRequest, NormalizedResponse, Provider, Usage};
use crate::forward::error::{ForwardError, ForwardResult};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct OpenAIAdapter {
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAIAdapter {
    pub fn new(api_key: &str, base_url: &str, default_model: &str) -> ForwardResult<Self> {
        Ok(Self {
            api_key: checked_api_key(Provider::OpenAI, api_key)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
        })
    }
}

fn image_url_part(attachment: &Attachment) -> Value {
    json!({
        "type": "image_url",
        "image_url": { "url": attachment.data_url() }
    })
}

/// Extract usage from OpenAI response. The total is taken as reported and
/// only computed when the vendor leaves it out.
fn extract_usage(response: &Value) -> Usage {
    let Some(usage) = response.get("usage") else {
        return Usage::default();
    };
    let count = |key: &str| usage.get(key).and_then(|v| v.as_u64());
    let prompt = count("prompt_tokens").unwrap_or(0);
    let completion = count("completion_tokens").unwrap_or(0);
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: count("total_tokens").unwrap_or_else(|| prompt.saturating_add(completion)),
    }
}

impl ProviderAdapterImpl for OpenAIAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn error_label(&self) -> &'static str {
        "OpenAI"
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH)
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert("authorization", value);
        }
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn transform_request(&self, request: &NormalizedRequest) -> Value {
        // Roles, including system, go through unchanged.
        let mut messages: Vec<Value> = request
            .turns
            .iter()
            .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
            .collect();

        if let (Some(attachment), Some(idx)) = (&request.attachment, request.final_user_index()) {
            messages[idx]["content"] =
                content_with_attachment(&request.turns[idx].content, image_url_part(attachment));
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
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| {
                ForwardError::Vendor("OpenAI API error: response has no message content".to_string())
            })?;

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(requested_model);

        Ok(NormalizedResponse {
            provider: Provider::OpenAI,
            model: model.to_string(),
            content: content.to_string(),
            usage: extract_usage(body),
        })
    }
}
