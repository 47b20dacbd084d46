//! Local SQLite storage: usage records, subscriptions and conversations.
//!
//! Every call opens its own connection on a blocking thread.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub plan: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    pub created_at: i64,
}

/// A message row to insert
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub model: Option<String>,
}

/// One successful vendor call
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub endpoint: String,
    pub provider: String,
    pub model: String,
    pub user_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
}

fn open_conn(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Token counts are stored as SQLite INTEGER; larger values clamp.
fn clamp_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn optimize_connection(conn: &Connection) {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "temp_store", "MEMORY").ok();
}

impl Database {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = open_conn(path)?;
        optimize_connection(&conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                endpoint TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                user_id TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_logs_user_timestamp
                ON usage_logs(user_id, timestamp DESC);

            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                plan TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user_updated
                ON conversations(user_id, updated_at DESC);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('system', 'user', 'assistant')),
                content TEXT NOT NULL,
                model TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
                ON messages(conversation_id, created_at, id);",
        )?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    async fn run_blocking<T, F>(&self, task: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> AppResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_conn(&path)?;
            task(conn)
        })
        .await?
    }

    pub async fn log_usage(&self, record: UsageRecord) -> AppResult<()> {
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO usage_logs (timestamp, endpoint, provider, model, user_id, prompt_tokens, completion_tokens, total_tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chrono::Utc::now().timestamp(),
                    record.endpoint,
                    record.provider,
                    record.model,
                    record.user_id,
                    clamp_count(record.prompt_tokens),
                    clamp_count(record.completion_tokens),
                    clamp_count(record.total_tokens)
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// (requests, total tokens) recorded for a user
    pub async fn usage_totals(&self, user_id: &str) -> AppResult<(i64, i64)> {
        let user_id = user_id.to_string();
        self.run_blocking(move |conn| {
            let totals = conn.query_row(
                "SELECT COUNT(*), IFNULL(SUM(total_tokens), 0) FROM usage_logs WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(totals)
        })
        .await
    }

    /// Most recent subscription in `trialing` or `active` status
    pub async fn active_subscription(&self, user_id: &str) -> AppResult<Option<SubscriptionRow>> {
        let user_id = user_id.to_string();
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, status, plan FROM subscriptions
                     WHERE user_id = ?1 AND status IN ('trialing', 'active')
                     ORDER BY created_at DESC LIMIT 1",
                    params![user_id],
                    |row| {
                        Ok(SubscriptionRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            status: row.get(2)?,
                            plan: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn insert_subscription(
        &self,
        user_id: &str,
        status: &str,
        plan: Option<&str>,
    ) -> AppResult<String> {
        let user_id = user_id.to_string();
        let status = status.to_string();
        let plan = plan.map(str::to_string);
        self.run_blocking(move |conn| {
            let id = format!("sub_{}", uuid::Uuid::new_v4().simple());
            conn.execute(
                "INSERT INTO subscriptions (id, user_id, status, plan, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, user_id, status, plan, chrono::Utc::now().timestamp_millis()],
            )?;
            Ok(id)
        })
        .await
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        provider: &str,
        title: &str,
    ) -> AppResult<String> {
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        let title = title.to_string();
        self.run_blocking(move |conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let now = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO conversations (id, user_id, provider, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, user_id, provider, title, now],
            )?;
            Ok(id)
        })
        .await
    }

    pub async fn conversation_exists(&self, conversation_id: &str, user_id: &str) -> AppResult<bool> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        self.run_blocking(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1 AND user_id = ?2 LIMIT 1",
                    params![conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// Insert `messages` in order and bump the conversation's `updated_at`.
    pub async fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<NewMessage>,
    ) -> AppResult<()> {
        let conversation_id = conversation_id.to_string();
        self.run_blocking(move |mut conn| {
            let tx = conn.transaction()?;
            let now = chrono::Utc::now().timestamp_millis();

            let updated = tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;
            if updated == 0 {
                return Err(AppError::Backend(format!(
                    "Conversation {} does not exist",
                    conversation_id
                )));
            }

            for (offset, message) in messages.into_iter().enumerate() {
                tx.execute(
                    "INSERT INTO messages (id, conversation_id, role, content, model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        conversation_id,
                        message.role,
                        message.content,
                        message.model,
                        now + offset as i64
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<StoredMessage>> {
        let conversation_id = conversation_id.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, model, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    model: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
    }
}
