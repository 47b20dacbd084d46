mod common;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{anthropic_reply, openai_reply, spawn_with, TOKEN, USER_ID};

async fn post_json(url: &str, token: Option<&str>, body: Value) -> reqwest::Response {
    let mut request = reqwest::Client::new().post(url).json(&body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    request.send().await.unwrap()
}

#[tokio::test]
async fn missing_auth_never_reaches_vendor() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_reply("hi")))
        .expect(0)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.anthropic.api_key = Some("ant-key".to_string());
        cfg.anthropic.base_url = Some(vendor.uri());
    })
    .await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        None,
        json!({"provider": "anthropic", "prompt": "hello"}),
    )
    .await;
    assert_eq!(r.status(), 400);
    assert_eq!(r.headers()["access-control-allow-origin"], "*");
    let body: Value = r.json().await.unwrap();
    assert_eq!(body, json!({"error": "Missing Authorization header"}));

    let r = post_json(
        &server.endpoint("/ai-chat"),
        Some("wrong-token"),
        json!({"provider": "anthropic", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;
    assert_eq!(r.status(), 400);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["error"], "Invalid token or user not found");
}

#[tokio::test]
async fn anthropic_completion_with_inline_directives() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ant-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 1000,
            "messages": [
                {"role": "user", "content": "<system>\nbe terse\n</system>"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_reply("hi")))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.anthropic.api_key = Some("ant-key".to_string());
        cfg.anthropic.base_url = Some(vendor.uri());
    })
    .await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        Some(TOKEN),
        json!({"provider": "claude", "prompt": "system: be terse user: hello"}),
    )
    .await;
    assert_eq!(r.status(), 200);
    assert_eq!(
        r.headers()["access-control-allow-headers"],
        "authorization, x-client-info, apikey, content-type"
    );
    let body: Value = r.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "provider": "anthropic",
            "model": "claude-x",
            "content": "hi",
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    );

    assert_eq!(server.state.db.usage_totals(USER_ID).await.unwrap(), (1, 15));
}

#[tokio::test]
async fn openai_completion_with_attachment() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "temperature": 0.2,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBORw0"}}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("a cat")))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.openai.api_key = Some("sk-test".to_string());
        cfg.openai.base_url = Some(vendor.uri());
    })
    .await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        Some(TOKEN),
        json!({
            "provider": "openai",
            "prompt": "what is this?",
            "model": "gpt-4o",
            "temperature": 0.2,
            "fileContent": "iVBORw0",
            "fileType": "image/png"
        }),
    )
    .await;
    assert_eq!(r.status(), 200);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["content"], "a cat");
    assert_eq!(body["usage"]["total_tokens"], 21);
}

#[tokio::test]
async fn vendor_error_message_is_surfaced() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "bad key"}
        })))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.anthropic.api_key = Some("ant-key".to_string());
        cfg.anthropic.base_url = Some(vendor.uri());
    })
    .await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        Some(TOKEN),
        json!({"provider": "anthropic", "prompt": "hello"}),
    )
    .await;
    assert_eq!(r.status(), 400);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body, json!({"error": "Claude API error: bad key"}));

    assert_eq!(server.state.db.usage_totals(USER_ID).await.unwrap(), (0, 0));
}

#[tokio::test]
async fn missing_vendor_key_is_reported() {
    let server = spawn_with(|_| {}).await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        Some(TOKEN),
        json!({"provider": "openai", "prompt": "hello"}),
    )
    .await;
    assert_eq!(r.status(), 400);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["error"], "OPENAI_API_KEY is not set");
}

#[tokio::test]
async fn request_validation_errors() {
    let server = spawn_with(|_| {}).await;
    let client = reqwest::Client::new();

    let r = client
        .post(server.endpoint("/ai-chat"))
        .bearer_auth(TOKEN)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), 400);
    let body: Value = r.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON body"));

    let cases = [
        ("/ai-completion", json!({"provider": "openai"}), "Provider and prompt are required"),
        ("/ai-completion", json!({"provider": "mistral", "prompt": "hi"}), "Invalid provider specified"),
        ("/ai-chat", json!({"provider": "openai", "messages": []}), "Provider and messages are required"),
    ];
    for (endpoint, payload, expected) in cases {
        let r = post_json(&server.endpoint(endpoint), Some(TOKEN), payload).await;
        assert_eq!(r.status(), 400);
        let body: Value = r.json().await.unwrap();
        assert_eq!(body["error"], expected);
    }
}

#[tokio::test]
async fn chat_creates_and_extends_conversation() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "What is Rust?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("A language.")))
        .expect(2)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.openai.api_key = Some("sk-test".to_string());
        cfg.openai.base_url = Some(vendor.uri());
    })
    .await;

    let payload = json!({
        "provider": "openai",
        "messages": [
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": "What is Rust?"}
        ]
    });
    let r = post_json(&server.endpoint("/ai-chat"), Some(TOKEN), payload.clone()).await;
    assert_eq!(r.status(), 200);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["content"], "A language.");
    assert_eq!(body["model"], "gpt-4-0613");
    let conversation_id = body["conversationId"].as_str().unwrap().to_string();

    let db = &server.state.db;
    assert!(db.conversation_exists(&conversation_id, USER_ID).await.unwrap());
    let stored = db.list_messages(&conversation_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, "user");
    assert_eq!(stored[0].content, "What is Rust?");
    assert_eq!(stored[1].content, "A language.");

    let mut follow_up = payload;
    follow_up["conversationId"] = json!(conversation_id);
    let r = post_json(&server.endpoint("/ai-chat"), Some(TOKEN), follow_up).await;
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["conversationId"], conversation_id.as_str());
    assert_eq!(db.list_messages(&conversation_id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn identical_requests_give_identical_responses() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_reply("same")))
        .expect(2)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.anthropic.api_key = Some("ant-key".to_string());
        cfg.anthropic.base_url = Some(vendor.uri());
    })
    .await;

    let payload = json!({"provider": "anthropic", "prompt": "hello", "maxTokens": 10});
    let first = post_json(&server.endpoint("/ai-completion"), Some(TOKEN), payload.clone())
        .await
        .bytes()
        .await
        .unwrap();
    let second = post_json(&server.endpoint("/ai-completion"), Some(TOKEN), payload)
        .await
        .bytes()
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn transient_vendor_failure_is_retried_when_enabled() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&vendor)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_reply("ok")))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.anthropic.api_key = Some("ant-key".to_string());
        cfg.anthropic.base_url = Some(vendor.uri());
        cfg.retry_max_attempts = 2;
        cfg.retry_initial_ms = 1;
        cfg.retry_max_ms = 5;
    })
    .await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        Some(TOKEN),
        json!({"provider": "anthropic", "prompt": "hello"}),
    )
    .await;
    assert_eq!(r.status(), 200);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["content"], "ok");
}

#[tokio::test]
async fn single_attempt_by_default() {
    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = spawn_with(|cfg| {
        cfg.openai.api_key = Some("sk-test".to_string());
        cfg.openai.base_url = Some(vendor.uri());
    })
    .await;

    let r = post_json(
        &server.endpoint("/ai-completion"),
        Some(TOKEN),
        json!({"provider": "openai", "prompt": "hello"}),
    )
    .await;
    assert_eq!(r.status(), 400);
    let body: Value = r.json().await.unwrap();
    assert_eq!(body["error"], "OpenAI API error: Service Unavailable");
}
