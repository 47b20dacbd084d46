//! Forward middleware
//!
//! Bearer token extraction and request body parsing for the two endpoints.
//! Everything here runs before any collaborator or vendor is contacted.

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::context::{Attachment, NormalizedRequest, Provider, Turn};
use super::error::{ForwardError, ForwardResult};
use super::prompt::parse_prompt;

/// Extract the bearer token from `Authorization: Bearer <token>`
pub fn extract_bearer_token(headers: &HeaderMap) -> ForwardResult<String> {
    let raw = headers.get("authorization").ok_or_else(|| {
        ForwardError::Authentication("Missing Authorization header".to_string())
    })?;

    raw.to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ForwardError::Authentication("Invalid Authorization header".to_string()))
}

/// Body of `POST /ai-completion`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionBody {
    pub provider: Option<String>,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub file_content: Option<String>,
    pub file_type: Option<String>,
}

/// Body of `POST /ai-chat`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub provider: Option<String>,
    pub messages: Option<Vec<Turn>>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub conversation_id: Option<String>,
}

/// Deserialize a JSON request body
pub fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> ForwardResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ForwardError::Validation(format!("Invalid JSON body: {}", e)))
}

fn parse_provider(raw: &str) -> ForwardResult<Provider> {
    Provider::from_str(raw)
        .ok_or_else(|| ForwardError::Validation("Invalid provider specified".to_string()))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl CompletionBody {
    /// Validate and build the normalized request. The prompt may carry
    /// inline `system:` / `user:` directives.
    pub fn into_request(self) -> ForwardResult<NormalizedRequest> {
        let (Some(provider), Some(prompt)) = (non_empty(&self.provider), non_empty(&self.prompt))
        else {
            return Err(ForwardError::Validation(
                "Provider and prompt are required".to_string(),
            ));
        };
        let provider = parse_provider(provider)?;
        let attachment =
            Attachment::from_parts(self.file_type.as_deref(), self.file_content.as_deref());

        Ok(NormalizedRequest::new(provider, parse_prompt(prompt))?
            .with_attachment(attachment)
            .with_model(self.model)
            .with_max_output_tokens(self.max_tokens)
            .with_temperature(self.temperature))
    }
}

impl ChatBody {
    /// Validate and build the normalized request, returning the caller's
    /// conversation id alongside it.
    pub fn into_request(self) -> ForwardResult<(NormalizedRequest, Option<String>)> {
        let provider = non_empty(&self.provider);
        let (Some(provider), Some(messages)) = (provider, self.messages.filter(|m| !m.is_empty()))
        else {
            return Err(ForwardError::Validation(
                "Provider and messages are required".to_string(),
            ));
        };
        let provider = parse_provider(provider)?;
        let conversation_id = self.conversation_id.filter(|id| !id.trim().is_empty());

        let request = NormalizedRequest::new(provider, messages)?
            .with_model(self.model)
            .with_max_output_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        Ok((request, conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::context::Role;
    use axum::http::HeaderValue;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(extract_bearer_token(&headers_with("Bearer abc ")).unwrap(), "abc");

        let err = extract_bearer_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "Missing Authorization header");
        assert!(matches!(err, ForwardError::Authentication(_)));

        for bad in ["Basic abc", "Bearer ", "bearer abc"] {
            let err = extract_bearer_token(&headers_with(bad)).unwrap_err();
            assert_eq!(err.to_string(), "Invalid Authorization header");
        }
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = parse_body::<CompletionBody>(b"{not json").unwrap_err();
        assert!(matches!(err, ForwardError::Validation(_)));
        assert!(err.to_string().starts_with("Invalid JSON body: "));
    }

    #[test]
    fn completion_requires_provider_and_prompt() {
        let body: CompletionBody = parse_body(br#"{"provider": "openai", "prompt": ""}"#).unwrap();
        assert_eq!(
            body.into_request().unwrap_err().to_string(),
            "Provider and prompt are required"
        );

        let body: CompletionBody = parse_body(br#"{"prompt": "hi"}"#).unwrap();
        assert!(body.into_request().is_err());

        let body: CompletionBody = parse_body(br#"{"provider": "gemini", "prompt": "hi"}"#).unwrap();
        assert_eq!(
            body.into_request().unwrap_err().to_string(),
            "Invalid provider specified"
        );
    }

    #[test]
    fn completion_builds_request() {
        let body: CompletionBody = parse_body(
            br#"{
                "provider": "claude",
                "prompt": "system: be terse user: hello",
                "model": "claude-3-haiku",
                "maxTokens": 50,
                "temperature": 0.2,
                "fileContent": "abc",
                "fileType": "image/png"
            }"#,
        )
        .unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.provider, Provider::Anthropic);
        assert_eq!(request.turns, vec![Turn::system("be terse"), Turn::user("hello")]);
        assert_eq!(request.model.as_deref(), Some("claude-3-haiku"));
        assert_eq!(request.max_output_tokens, 50);
        assert_eq!(request.attachment.unwrap().mime_type, "image/png");
    }

    #[test]
    fn completion_attachment_needs_both_fields() {
        let body: CompletionBody =
            parse_body(br#"{"provider": "openai", "prompt": "hi", "fileContent": "abc"}"#).unwrap();
        assert!(body.into_request().unwrap().attachment.is_none());
    }

    #[test]
    fn chat_requires_messages() {
        let body: ChatBody = parse_body(br#"{"provider": "openai", "messages": []}"#).unwrap();
        assert_eq!(
            body.into_request().unwrap_err().to_string(),
            "Provider and messages are required"
        );

        let body: ChatBody = parse_body(br#"{"provider": "openai"}"#).unwrap();
        assert!(body.into_request().is_err());
    }

    #[test]
    fn chat_builds_request_and_keeps_conversation_id() {
        let body: ChatBody = parse_body(
            br#"{
                "provider": "openai",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "hello"}
                ],
                "conversationId": "conv-1"
            }"#,
        )
        .unwrap();
        let (request, conversation_id) = body.into_request().unwrap();
        assert_eq!(request.turns.len(), 2);
        assert_eq!(request.turns[0].role, Role::System);
        assert_eq!(conversation_id.as_deref(), Some("conv-1"));
        assert!(request.attachment.is_none());
    }

    #[test]
    fn chat_without_user_turn_is_rejected() {
        let body: ChatBody = parse_body(
            br#"{"provider": "openai", "messages": [{"role": "assistant", "content": "hi"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            body.into_request().unwrap_err(),
            ForwardError::Validation(_)
        ));
    }
}
