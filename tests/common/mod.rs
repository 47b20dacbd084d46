#![allow(dead_code)]

use std::collections::HashMap;

use ai_proxy::config::{BackendKind, Settings};
use ai_proxy::server::{app, AppState};

pub const TOKEN: &str = "tok-1";
pub const USER_ID: &str = "user-1";

pub struct TestServer {
    pub url: String,
    pub state: AppState,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }
}

/// Settings with a throwaway database and one static token.
pub fn local_settings(dir: &tempfile::TempDir) -> Settings {
    let mut cfg = Settings::default();
    cfg.database_path = Some(dir.path().join("proxy.db"));
    cfg.backend.kind = BackendKind::Local;
    cfg.backend.tokens = HashMap::from([(TOKEN.to_string(), USER_ID.to_string())]);
    cfg
}

/// Serve the router for `configure`d settings on an ephemeral port.
pub async fn spawn_with<F>(configure: F) -> TestServer
where
    F: FnOnce(&mut Settings),
{
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = local_settings(&dir);
    configure(&mut cfg);

    let state = AppState::from_settings(&cfg).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    TestServer {
        url: format!("http://{}", addr),
        state,
        _dir: dir,
    }
}

pub fn anthropic_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "model": "claude-x",
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 10, "output_tokens": 5}
    })
}

pub fn openai_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4-0613",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
    })
}
