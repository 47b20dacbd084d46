//! Forward context structures
//!
//! Provider-agnostic request and response shapes passed between the endpoint
//! handlers and the provider adapters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ForwardError, ForwardResult};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Supported API providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl Provider {
    /// Parse provider from string. `claude` is accepted for older clients.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAI),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
        }
    }

    /// Environment variable that carries this vendor's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Anthropic => "CLAUDE_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Turn content: plain text, or vendor-shaped parts forwarded as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }

    /// Text of the content, joining `text` parts with newlines.
    pub fn flatten_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Storage form: text as-is, parts as a JSON string.
    pub fn to_stored_string(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => Value::Array(parts.clone()).to_string(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: MessageContent,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A base64 file attached to the final user turn
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub mime_type: String,
    pub base64_data: String,
}

impl Attachment {
    /// Both halves must be present and non-empty.
    pub fn from_parts(mime_type: Option<&str>, base64_data: Option<&str>) -> Option<Self> {
        match (mime_type, base64_data) {
            (Some(mime), Some(data)) if !mime.is_empty() && !data.is_empty() => Some(Self {
                mime_type: mime.to_string(),
                base64_data: data.to_string(),
            }),
            _ => None,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

/// Provider-agnostic request handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub provider: Provider,
    pub turns: Vec<Turn>,
    pub attachment: Option<Attachment>,
    pub model: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f64,
}

impl NormalizedRequest {
    /// Build a request, enforcing that there is at least one user turn.
    pub fn new(provider: Provider, turns: Vec<Turn>) -> ForwardResult<Self> {
        if turns.is_empty() {
            return Err(ForwardError::Validation(
                "At least one message is required".to_string(),
            ));
        }
        if !turns.iter().any(|t| t.role == Role::User) {
            return Err(ForwardError::Validation(
                "At least one user message is required".to_string(),
            ));
        }
        Ok(Self {
            provider,
            turns,
            attachment: None,
            model: None,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }

    /// Blank model names fall back to the adapter default.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_max_output_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature.unwrap_or(DEFAULT_TEMPERATURE);
        self
    }

    /// Index of the last user turn, which receives the attachment.
    pub fn final_user_index(&self) -> Option<usize> {
        self.turns.iter().rposition(|t| t.role == Role::User)
    }

    /// Title for a new conversation: the first textual user turn, truncated.
    pub fn conversation_title(&self) -> String {
        const MAX_TITLE_CHARS: usize = 50;
        let first_user = self
            .turns
            .iter()
            .find(|t| t.role == Role::User)
            .and_then(|t| t.content.as_text());
        match first_user {
            Some(text) => {
                let mut title: String = text.chars().take(MAX_TITLE_CHARS).collect();
                if text.chars().count() > MAX_TITLE_CHARS {
                    title.push_str("...");
                }
                title
            }
            None => "New conversation".to_string(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Build usage from the two counts, computing the total (saturating).
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt.saturating_add(completion),
        }
    }
}

/// Provider-agnostic response returned by an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub provider: Provider,
    pub model: String,
    pub content: String,
    pub usage: Usage,
}

/// Retry configuration for vendor calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 300,
            max_delay_ms: 3000,
        }
    }
}

impl RetryConfig {
    pub fn from_settings(cfg: &crate::config::Settings) -> Self {
        Self {
            max_attempts: cfg.retry_max_attempts.max(1),
            initial_delay_ms: cfg.retry_initial_ms,
            max_delay_ms: cfg.retry_max_ms,
        }
    }
}
