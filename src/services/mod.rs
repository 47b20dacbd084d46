//! External collaborators: identity, entitlement and conversation storage.
//!
//! Each is an enum over its backends, built once at startup. The hosted
//! deployment talks to Supabase; the local one uses configured tokens and the
//! SQLite database.

pub mod supabase;

use std::collections::HashMap;

use serde::Serialize;

use crate::config::{BackendKind, Settings};
use crate::db::{Database, NewMessage};
use crate::error::{AppError, AppResult};
use crate::forward::error::{ForwardError, ForwardResult};
use crate::logger;
use supabase::SupabaseClient;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub user_id: String,
    pub status: String,
    pub plan: Option<String>,
}

/// Tier the request runs under. Informational only: no quota is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Subscribed,
}

#[derive(Debug, Clone)]
pub enum IdentityBackend {
    Supabase(SupabaseClient),
    /// Bearer token -> user id
    Static(HashMap<String, String>),
}

impl IdentityBackend {
    /// Resolve a bearer token. Any lookup failure is reported to the caller
    /// as the same authentication error.
    pub async fn verify_token(&self, token: &str) -> ForwardResult<Identity> {
        let result = match self {
            IdentityBackend::Supabase(client) => client.get_user(token).await,
            IdentityBackend::Static(tokens) => tokens
                .get(token)
                .map(|user_id| Identity {
                    user_id: user_id.clone(),
                    email: None,
                })
                .ok_or_else(|| AppError::Backend("unknown token".to_string())),
        };
        result.map_err(|e| {
            logger::debug("auth", &format!("Token verification failed: {}", e));
            ForwardError::Authentication("Invalid token or user not found".to_string())
        })
    }
}

#[derive(Debug, Clone)]
pub enum EntitlementBackend {
    Supabase(SupabaseClient),
    Local(Database),
}

impl EntitlementBackend {
    pub async fn active_subscription(&self, user_id: &str) -> AppResult<Option<Subscription>> {
        match self {
            EntitlementBackend::Supabase(client) => client.active_subscription(user_id).await,
            EntitlementBackend::Local(db) => Ok(db.active_subscription(user_id).await?.map(|row| {
                Subscription {
                    user_id: row.user_id,
                    status: row.status,
                    plan: row.plan,
                }
            })),
        }
    }

    /// Never fails: a missing subscription or a failed lookup means free tier.
    pub async fn resolve_tier(&self, user_id: &str) -> Tier {
        match self.active_subscription(user_id).await {
            Ok(Some(_)) => Tier::Subscribed,
            Ok(None) => {
                logger::info(
                    "entitlement",
                    "User does not have an active subscription, using free tier limits",
                );
                Tier::Free
            }
            Err(e) => {
                logger::warn(
                    "entitlement",
                    &format!(
                        "User does not have an active subscription, using free tier limits ({})",
                        e
                    ),
                );
                Tier::Free
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConversationBackend {
    Supabase(SupabaseClient),
    Local(Database),
}

impl ConversationBackend {
    pub async fn create_conversation(
        &self,
        user_id: &str,
        provider: &str,
        title: &str,
    ) -> AppResult<String> {
        match self {
            ConversationBackend::Supabase(client) => {
                client.create_conversation(user_id, provider, title).await
            }
            ConversationBackend::Local(db) => db.create_conversation(user_id, provider, title).await,
        }
    }

    pub async fn conversation_exists(&self, conversation_id: &str, user_id: &str) -> AppResult<bool> {
        match self {
            ConversationBackend::Supabase(client) => {
                client.conversation_exists(conversation_id, user_id).await
            }
            ConversationBackend::Local(db) => db.conversation_exists(conversation_id, user_id).await,
        }
    }

    pub async fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<NewMessage>,
    ) -> AppResult<()> {
        match self {
            ConversationBackend::Supabase(client) => {
                client.append_messages(conversation_id, &messages).await
            }
            ConversationBackend::Local(db) => db.append_messages(conversation_id, messages).await,
        }
    }
}

/// The three collaborators behind the endpoints
#[derive(Debug, Clone)]
pub struct Backends {
    pub identity: IdentityBackend,
    pub entitlement: EntitlementBackend,
    pub conversations: ConversationBackend,
}

impl Backends {
    pub fn from_settings(cfg: &Settings, db: &Database, client: reqwest::Client) -> AppResult<Self> {
        match cfg.backend.kind {
            BackendKind::Local => {
                if cfg.backend.tokens.is_empty() {
                    logger::warn(
                        "services",
                        "Local backend has no tokens configured; every request will be rejected",
                    );
                }
                Ok(Self::local(cfg.backend.tokens.clone(), db.clone()))
            }
            BackendKind::Supabase => {
                let url = cfg
                    .backend
                    .supabase_url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| AppError::Config("SUPABASE_URL is not set".to_string()))?;
                let key = cfg
                    .backend
                    .supabase_service_role_key
                    .as_deref()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::Config("SUPABASE_SERVICE_ROLE_KEY is not set".to_string())
                    })?;
                Ok(Self::supabase(SupabaseClient::new(client, url.trim(), key.trim())))
            }
        }
    }

    pub fn local(tokens: HashMap<String, String>, db: Database) -> Self {
        Self {
            identity: IdentityBackend::Static(tokens),
            entitlement: EntitlementBackend::Local(db.clone()),
            conversations: ConversationBackend::Local(db),
        }
    }

    pub fn supabase(client: SupabaseClient) -> Self {
        Self {
            identity: IdentityBackend::Supabase(client.clone()),
            entitlement: EntitlementBackend::Supabase(client.clone()),
            conversations: ConversationBackend::Supabase(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_backends() -> (tempfile::TempDir, Database, Backends) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("services.db")).unwrap();
        let tokens = HashMap::from([("tok-1".to_string(), "user-1".to_string())]);
        let backends = Backends::local(tokens, db.clone());
        (dir, db, backends)
    }

    #[tokio::test]
    async fn static_identity() {
        let (_dir, _db, backends) = local_backends();
        let identity = backends.identity.verify_token("tok-1").await.unwrap();
        assert_eq!(identity.user_id, "user-1");

        let err = backends.identity.verify_token("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid token or user not found");
    }

    #[tokio::test]
    async fn tier_follows_local_subscription() {
        let (_dir, db, backends) = local_backends();
        assert_eq!(backends.entitlement.resolve_tier("user-1").await, Tier::Free);

        db.insert_subscription("user-1", "active", None).await.unwrap();
        assert_eq!(
            backends.entitlement.resolve_tier("user-1").await,
            Tier::Subscribed
        );
    }

    #[tokio::test]
    async fn local_conversations() {
        let (_dir, db, backends) = local_backends();
        let id = backends
            .conversations
            .create_conversation("user-1", "openai", "Hi")
            .await
            .unwrap();
        assert!(backends
            .conversations
            .conversation_exists(&id, "user-1")
            .await
            .unwrap());
        backends
            .conversations
            .append_messages(
                &id,
                vec![NewMessage {
                    role: "user".to_string(),
                    content: "Hi".to_string(),
                    model: None,
                }],
            )
            .await
            .unwrap();
        assert_eq!(db.list_messages(&id).await.unwrap().len(), 1);
    }

    #[test]
    fn supabase_backend_needs_url_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("x.db")).unwrap();
        let mut cfg = Settings::default();
        cfg.backend.kind = BackendKind::Supabase;

        let err = Backends::from_settings(&cfg, &db, reqwest::Client::new()).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: SUPABASE_URL is not set");

        cfg.backend.supabase_url = Some("http://127.0.0.1:1".to_string());
        cfg.backend.supabase_service_role_key = Some("service".to_string());
        let backends = Backends::from_settings(&cfg, &db, reqwest::Client::new()).unwrap();
        assert!(matches!(backends.identity, IdentityBackend::Supabase(_)));
    }
}
