//! Forward module
//!
//! The two AI endpoints. Each request runs the same pipeline:
//!
//! ```text
//! Request -> Authenticate -> Entitlement -> Adapter -> (chat) Persist -> Response
//!              |                              |
//!              v                              v
//!           Identity                  Provider-specific
//!           (services)                request handling
//! ```
//!
//! ## API Endpoints
//!
//! - `POST /ai-completion` - single prompt, optional inline `system:`/`user:`
//!   directives and one attachment
//! - `POST /ai-chat` - full turn list, stored as a conversation
//!
//! ## Components
//!
//! - `middleware`: bearer token extraction and body validation
//! - `prompt`: inline directive parsing for completion prompts
//! - `handlers`: provider adapters
//! - `client`: HTTP client utilities with retry logic
//! - `context`: shared data structures
//! - `error`: error types

pub mod client;
pub mod context;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod prompt;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::{NewMessage, UsageRecord};
use crate::logger;
use crate::server::AppState;
use crate::services::{ConversationBackend, Identity};

pub use context::{NormalizedRequest, NormalizedResponse, Provider, Usage};
pub use error::{ForwardError, ForwardResult};

/// Chat reply: the normalized response plus the conversation it was stored in
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub response: NormalizedResponse,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
}

/// Single-prompt completion
///
/// Route: POST /ai-completion
pub async fn ai_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle_completion(&state, &headers, &body).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Multi-turn chat with conversation persistence
///
/// Route: POST /ai-chat
pub async fn ai_chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match handle_chat(&state, &headers, &body).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Resolve the caller and consult their entitlement.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> ForwardResult<Identity> {
    let token = middleware::extract_bearer_token(headers)?;
    let identity = state.backends.identity.verify_token(&token).await?;
    let tier = state.backends.entitlement.resolve_tier(&identity.user_id).await;
    logger::debug(
        "auth",
        &format!("Authenticated user={} tier={:?}", identity.user_id, tier),
    );
    Ok(identity)
}

async fn handle_completion(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> ForwardResult<NormalizedResponse> {
    let identity = authenticate(state, headers).await?;
    let request = middleware::parse_body::<middleware::CompletionBody>(body)?.into_request()?;

    let response = state.registry.complete(&request).await?;
    record_usage(state, "ai-completion", &identity, &response).await;
    Ok(response)
}

async fn handle_chat(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> ForwardResult<ChatResponse> {
    let identity = authenticate(state, headers).await?;
    let (request, conversation_id) =
        middleware::parse_body::<middleware::ChatBody>(body)?.into_request()?;

    let response = state.registry.complete(&request).await?;
    record_usage(state, "ai-chat", &identity, &response).await;

    let conversation_id = persist_exchange(
        &state.backends.conversations,
        &identity,
        &request,
        &response,
        conversation_id,
    )
    .await;

    Ok(ChatResponse {
        response,
        conversation_id,
    })
}

async fn record_usage(
    state: &AppState,
    endpoint: &str,
    identity: &Identity,
    response: &NormalizedResponse,
) {
    let record = UsageRecord {
        endpoint: endpoint.to_string(),
        provider: response.provider.as_str().to_string(),
        model: response.model.clone(),
        user_id: identity.user_id.clone(),
        prompt_tokens: response.usage.prompt_tokens,
        completion_tokens: response.usage.completion_tokens,
        total_tokens: response.usage.total_tokens,
    };
    if let Err(e) = state.db.log_usage(record).await {
        logger::warn("usage", &format!("Failed to record usage: {}", e));
    }
}

/// Store the final request turn and the reply. Returns the conversation id to
/// echo back; storage failures are logged and never fail the request.
async fn persist_exchange(
    conversations: &ConversationBackend,
    identity: &Identity,
    request: &NormalizedRequest,
    response: &NormalizedResponse,
    supplied_id: Option<String>,
) -> Option<String> {
    let user_id = identity.user_id.as_str();

    let target = match supplied_id {
        Some(id) => match conversations.conversation_exists(&id, user_id).await {
            Ok(true) => Ok(id),
            Ok(false) => {
                logger::warn(
                    "conversations",
                    &format!("Conversation {} not found for user {}; messages not stored", id, user_id),
                );
                return Some(id);
            }
            Err(e) => {
                logger::warn(
                    "conversations",
                    &format!("Error retrieving conversation {}: {}", id, e),
                );
                return Some(id);
            }
        },
        None => {
            conversations
                .create_conversation(user_id, request.provider.as_str(), &request.conversation_title())
                .await
        }
    };

    let conversation_id = match target {
        Ok(id) => id,
        Err(e) => {
            logger::warn("conversations", &format!("Error creating conversation: {}", e));
            return None;
        }
    };

    let mut messages = Vec::with_capacity(2);
    if let Some(last) = request.turns.last() {
        messages.push(NewMessage {
            role: "user".to_string(),
            content: last.content.to_stored_string(),
            model: None,
        });
    }
    messages.push(NewMessage {
        role: "assistant".to_string(),
        content: response.content.clone(),
        model: Some(response.model.clone()),
    });

    if let Err(e) = conversations.append_messages(&conversation_id, messages).await {
        logger::warn(
            "conversations",
            &format!("Error storing messages for {}: {}", conversation_id, e),
        );
    }
    Some(conversation_id)
}
