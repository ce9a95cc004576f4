use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use persona::agent::provider::{CompletionRequest, StopReason, StreamEvent, TokenUsage};
use persona::agent::{
    AgentError, AgentRegistry, InMemoryConversationMemory, LlmProvider, MemoryInvoker,
    APOLOGY_MESSAGE,
};
use persona::server::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Streams a fixed reply, or fails midway when the user message is "fail".
#[derive(Default)]
struct ScriptedProvider {
    requests: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        _cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().push(request);

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: "Hello ".into(),
                })
                .await;
            if last == "fail" {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: "model overloaded".into(),
                    })
                    .await;
                return;
            }
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: "friend!".into(),
                })
                .await;
            let _ = tx
                .send(StreamEvent::Stop {
                    reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                })
                .await;
        });
        Ok(rx)
    }
}

struct Harness {
    app: Router,
    registry: Arc<AgentRegistry>,
    provider: Arc<ScriptedProvider>,
}

fn harness() -> Harness {
    let registry = Arc::new(AgentRegistry::new());
    let provider = Arc::new(ScriptedProvider::default());
    let invoker = MemoryInvoker::new(
        provider.clone(),
        Arc::new(InMemoryConversationMemory::new()),
    );
    let app = build_router(AppState::new(registry.clone(), Arc::new(invoker)));
    Harness {
        app,
        registry,
        provider,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    (status, body.to_vec())
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = get_json(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["agents"], 0);
}

#[tokio::test]
async fn test_create_agent_applies_defaults() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/api/agents",
        json!({ "config": { "name": "FriendlyBot", "personality": "cheerful" } }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["agentId"], "friendlybot");
    assert_eq!(body["config"]["model"], "gpt-4o-mini");
    assert_eq!(body["config"]["maxMemoryMessages"], 10);
    assert_eq!(
        body["config"]["systemPrompt"],
        "You are a helpful assistant.\nYour name is FriendlyBot.\nPlease respond in a cheerful tone."
    );
    assert!(h.registry.contains("friendlybot"));
}

#[tokio::test]
async fn test_create_agent_without_config_is_rejected() {
    let h = harness();
    let (status, body) = post_json(&h.app, "/api/agents", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "agent configuration is required");

    let request = Request::builder()
        .method("POST")
        .uri("/api/agents")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_create_agent_with_zero_memory_is_invalid() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/api/agents",
        json!({ "config": { "name": "Bot", "maxMemoryMessages": 0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid agent configuration"));
}

#[tokio::test]
async fn test_reconfigure_replaces_agent() {
    let h = harness();
    post_json(
        &h.app,
        "/api/agents",
        json!({ "config": { "name": "Friendly Bot", "model": "gpt-4o" } }),
    )
    .await;
    post_json(
        &h.app,
        "/api/agents",
        json!({ "config": { "name": "friendly   bot" } }),
    )
    .await;

    let (status, body) = get_json(&h.app, "/api/agents/friendly_bot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "friendly   bot");
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn test_list_and_get_agents() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Zed" } })).await;
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Amy" } })).await;

    let (status, body) = get_json(&h.app, "/api/agents").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["identity"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["amy", "zed"]);

    let (status, body) = get_json(&h.app, "/api/agents/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "agent not found: nobody");
}

#[tokio::test]
async fn test_chat_synthesizes_session_ids() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "FriendlyBot" } })).await;

    let (status, body) = post_json(
        &h.app,
        "/api/chat",
        json!({ "agentId": "friendlybot", "message": "Hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["agentId"], "friendlybot");
    assert_eq!(body["response"], "Hello friend!");
    assert!(body["threadId"].as_str().unwrap().starts_with("thread_"));
    assert!(body["resourceId"].as_str().unwrap().starts_with("resource_"));

    let requests = h.provider.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "gpt-4o-mini");
    assert_eq!(
        requests[0].system.as_deref(),
        Some("You are a helpful assistant.\nYour name is FriendlyBot.\nPlease respond in a neutral tone.")
    );
}

#[tokio::test]
async fn test_create_then_chat_end_to_end() {
    let h = harness();
    let (status, created) = post_json(
        &h.app,
        "/api/agents",
        json!({ "config": {
            "name": "FriendlyBot",
            "instructions": "You are cheerful.",
            "personality": "friendly",
        } }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["agentId"], "friendlybot");
    assert_eq!(created["config"]["model"], "gpt-4o-mini");
    assert_eq!(created["config"]["maxMemoryMessages"], 10);

    let (status, body) = post_json(
        &h.app,
        "/api/chat",
        json!({ "agentId": "friendlybot", "message": "Hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let thread_id = body["threadId"].as_str().unwrap();
    let resource_id = body["resourceId"].as_str().unwrap();
    assert!(!thread_id.is_empty());
    assert!(!resource_id.is_empty());
    assert_ne!(thread_id, resource_id);

    let requests = h.provider.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].system.as_deref(),
        Some("You are cheerful.\nYour name is FriendlyBot.\nPlease respond in a friendly tone.")
    );
}

#[tokio::test]
async fn test_chat_resumes_thread_with_memory() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Bot" } })).await;

    let turn = json!({
        "agentId": "bot",
        "message": "Hi",
        "threadId": "t-1",
        "resourceId": "user-7",
    });
    let (_, first) = post_json(&h.app, "/api/chat", turn.clone()).await;
    assert_eq!(first["threadId"], "t-1");
    assert_eq!(first["resourceId"], "user-7");
    post_json(&h.app, "/api/chat", turn).await;

    let requests = h.provider.requests.lock();
    // second turn replays the first exchange
    assert_eq!(requests[1].messages.len(), 3);
    assert_eq!(requests[1].messages[1].content, "Hello friend!");
}

#[tokio::test]
async fn test_chat_unknown_agent_is_not_found() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/api/chat",
        json!({ "agentId": "ghost", "message": "Hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert!(h.registry.is_empty());
    assert!(h.provider.requests.lock().is_empty());

    let (status, _) = post_json(&h.app, "/api/chat", json!({ "message": "Hello" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chat_without_message_is_rejected() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Bot" } })).await;
    let (status, body) = post_json(&h.app, "/api/chat", json!({ "agentId": "bot" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "message is required");
    assert!(h.provider.requests.lock().is_empty());
}

#[tokio::test]
async fn test_chat_invocation_failure_is_degraded() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Bot" } })).await;

    let (status, body) = post_json(
        &h.app,
        "/api/chat",
        json!({ "agentId": "bot", "message": "fail", "threadId": "t-2" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "error");
    assert_eq!(body["response"], APOLOGY_MESSAGE);
    assert_eq!(body["threadId"], "t-2");

    // other conversations are unaffected
    let (status, _) = post_json(
        &h.app,
        "/api/chat",
        json!({ "agentId": "bot", "message": "Hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_chat_stream_emits_ordered_events() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Bot" } })).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "agentId": "bot", "message": "Hello", "threadId": "t-3" }).to_string(),
        ))
        .unwrap();
    let resp = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events, vec!["session", "delta", "delta", "done"]);
    assert!(text.contains(r#""threadId":"t-3""#));
    assert!(text.contains(r#"{"response":"Hello friend!"}"#));
}

#[tokio::test]
async fn test_chat_stream_failure_ends_with_error_event() {
    let h = harness();
    post_json(&h.app, "/api/agents", json!({ "config": { "name": "Bot" } })).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "agentId": "bot", "message": "fail" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events, vec!["session", "delta", "error"]);
    assert!(text.contains(APOLOGY_MESSAGE));
}

#[tokio::test]
async fn test_chat_stream_unknown_agent_fails_before_stream() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/api/chat/stream",
        json!({ "agentId": "ghost", "message": "Hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}
