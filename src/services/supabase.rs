//! Supabase auth and PostgREST calls used by the hosted backend.

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Identity, Subscription};
use crate::db::NewMessage;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    client: Client,
    url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

impl SupabaseClient {
    pub fn new(client: Client, url: &str, service_key: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn rest(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    /// Service-role headers for PostgREST
    fn with_service_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn checked(response: Response, what: &str) -> AppResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Backend(format!(
            "{} failed: HTTP {} {}",
            what,
            status.as_u16(),
            body.chars().take(200).collect::<String>()
        )))
    }

    /// Resolve the caller's access token to a user
    pub async fn get_user(&self, token: &str) -> AppResult<Identity> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.url))
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .send()
            .await?;
        let user: AuthUser = Self::checked(response, "auth user lookup").await?.json().await?;
        Ok(Identity {
            user_id: user.id,
            email: user.email,
        })
    }

    pub async fn active_subscription(&self, user_id: &str) -> AppResult<Option<Subscription>> {
        let user_filter = format!("eq.{}", user_id);
        let request = self.client.get(self.rest("subscriptions")).query(&[
            ("select", "*"),
            ("user_id", user_filter.as_str()),
            ("status", "in.(trialing,active)"),
            ("limit", "1"),
        ]);
        let response = self.with_service_auth(request).send().await?;
        let rows: Vec<Value> = Self::checked(response, "subscription lookup").await?.json().await?;
        Ok(rows.into_iter().next().map(|row| Subscription {
            user_id: user_id.to_string(),
            status: row
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            plan: row
                .get("plan")
                .or_else(|| row.get("price_id"))
                .and_then(|p| p.as_str())
                .map(str::to_string),
        }))
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        provider: &str,
        title: &str,
    ) -> AppResult<String> {
        let request = self
            .client
            .post(self.rest("conversations"))
            .header("Prefer", "return=representation")
            .json(&json!({ "user_id": user_id, "provider": provider, "title": title }));
        let response = self.with_service_auth(request).send().await?;
        let rows: Vec<IdRow> = Self::checked(response, "conversation insert").await?.json().await?;
        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| AppError::Backend("conversation insert returned no row".to_string()))
    }

    pub async fn conversation_exists(&self, conversation_id: &str, user_id: &str) -> AppResult<bool> {
        let id_filter = format!("eq.{}", conversation_id);
        let user_filter = format!("eq.{}", user_id);
        let request = self.client.get(self.rest("conversations")).query(&[
            ("select", "id"),
            ("id", id_filter.as_str()),
            ("user_id", user_filter.as_str()),
        ]);
        let response = self.with_service_auth(request).send().await?;
        let rows: Vec<IdRow> = Self::checked(response, "conversation lookup").await?.json().await?;
        Ok(!rows.is_empty())
    }

    pub async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[NewMessage],
    ) -> AppResult<()> {
        let rows: Vec<Value> = messages
            .iter()
            .map(|m| {
                let mut row = json!({
                    "conversation_id": conversation_id,
                    "role": m.role,
                    "content": m.content,
                });
                if let Some(model) = &m.model {
                    row["model"] = json!(model);
                }
                row
            })
            .collect();
        let request = self.client.post(self.rest("messages")).json(&rows);
        let response = self.with_service_auth(request).send().await?;
        Self::checked(response, "message insert").await?;
        Ok(())
    }
}
