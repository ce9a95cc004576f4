//! HTTP API
//!
//! Routes:
//! - `GET  /health`
//! - `POST /api/agents`, `GET /api/agents`, `GET /api/agents/{id}`
//! - `POST /api/chat` (buffered reply)
//! - `POST /api/chat/stream` (server-sent events)

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::agent::relay::{collect_response, Relay, RelayItem};
use crate::agent::{
    resolve_session, AgentConfig, AgentError, AgentRegistry, AgentView, InvocationRequest,
    Invoker, APOLOGY_MESSAGE,
};

use super::error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub invoker: Arc<dyn Invoker>,
}

impl AppState {
    pub fn new(registry: Arc<AgentRegistry>, invoker: Arc<dyn Invoker>) -> Self {
        Self { registry, invoker }
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/agents", post(create_agent).get(list_agents))
        .route("/api/agents/{id}", get(get_agent))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    #[serde(default)]
    config: Option<AgentConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentResponse {
    status: &'static str,
    agent_id: String,
    config: AgentView,
}

/// Body of both chat endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    status: &'static str,
    agent_id: String,
    response: String,
    thread_id: String,
    resource_id: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.registry.len(),
    }))
}

/// The body is parsed by hand so that an empty body reads as a missing
/// configuration rather than a content-type error.
async fn create_agent(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AgentError::ConfigurationMissing.into());
    }
    let request: CreateAgentRequest = serde_json::from_slice(&body)
        .map_err(|e| AgentError::InvalidConfiguration(e.to_string()))?;
    let config = request.config.ok_or(AgentError::ConfigurationMissing)?;

    let definition = state.registry.create(&config);
    let response = CreateAgentResponse {
        status: "success",
        agent_id: definition.identity().to_string(),
        config: definition.view(),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    let agents: Vec<AgentView> = state.registry.list().iter().map(|d| d.view()).collect();
    Json(json!({ "agents": agents }))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentView>, ApiError> {
    let definition = state.registry.resolve(&id)?;
    Ok(Json(definition.view()))
}

/// Validate a chat request and resolve its agent and session.
fn prepare_turn(
    registry: &AgentRegistry,
    request: ChatRequest,
) -> Result<(String, InvocationRequest), ApiError> {
    let message = request
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or(AgentError::MessageMissing)?;
    let agent_id = request.agent_id.unwrap_or_default();
    let definition = registry.resolve(&agent_id)?;
    let session = resolve_session(request.thread_id.as_deref(), request.resource_id.as_deref());
    Ok((
        definition.identity().to_string(),
        InvocationRequest::for_agent(&definition, message, session),
    ))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let (agent_id, request) = prepare_turn(&state.registry, request)?;
    let session = request.session.clone();
    info!(
        agent_id = %agent_id,
        thread_id = %session.thread_id,
        resource_id = %session.resource_id,
        model = %request.model,
        "Chat turn started"
    );

    // Dropping the handler (client gone) cancels the invocation.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let result = match state.invoker.invoke(request, cancel).await {
        Ok(rx) => collect_response(rx).await,
        Err(e) => Err(e),
    };
    guard.disarm();

    match result {
        Ok(response) => Ok(Json(ChatResponse {
            status: "success",
            agent_id,
            response,
            thread_id: session.thread_id,
            resource_id: session.resource_id,
        })),
        Err(e) => {
            error!(
                agent_id = %agent_id,
                thread_id = %session.thread_id,
                resource_id = %session.resource_id,
                error = %e,
                "Agent invocation failed"
            );
            Err(ApiError::Degraded {
                session,
                cause: e.to_string(),
            })
        }
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let (agent_id, request) = prepare_turn(&state.registry, request)?;

    let (sse_tx, mut sse_rx) = mpsc::channel::<Bytes>(64);
    let cancel = CancellationToken::new();
    tokio::spawn(relay_to_sse(
        Arc::clone(&state.invoker),
        agent_id,
        request,
        cancel.clone(),
        sse_tx,
    ));

    let guard = cancel.drop_guard();
    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(chunk) = sse_rx.recv().await {
            yield Ok::<Bytes, Infallible>(chunk);
        }
    };
    Ok(sse_response(stream))
}

/// Frame one server-sent event.
pub fn sse_frame(event: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

/// Run one turn and forward it as SSE frames: `session`, then `delta` per
/// fragment, then `done` or `error`.
async fn relay_to_sse(
    invoker: Arc<dyn Invoker>,
    agent_id: String,
    request: InvocationRequest,
    cancel: CancellationToken,
    tx: mpsc::Sender<Bytes>,
) {
    let session = request.session.clone();
    let opening = json!({
        "agentId": agent_id,
        "threadId": session.thread_id,
        "resourceId": session.resource_id,
    });
    if tx.send(sse_frame("session", &opening)).await.is_err() {
        cancel.cancel();
        return;
    }

    let failure = match invoker.invoke(request, cancel.clone()).await {
        Ok(rx) => {
            let mut relay = Relay::new(rx);
            let mut response = String::new();
            loop {
                match relay.next().await {
                    Some(RelayItem::Fragment(text)) => {
                        let frame = sse_frame("delta", &json!({ "text": text }));
                        response.push_str(&text);
                        if tx.send(frame).await.is_err() {
                            debug!(agent_id = %agent_id, "Stream client disconnected");
                            cancel.cancel();
                            return;
                        }
                    }
                    Some(RelayItem::Done) => {
                        let _ = tx
                            .send(sse_frame("done", &json!({ "response": response })))
                            .await;
                        return;
                    }
                    Some(RelayItem::Failed(e)) => break e,
                    None => return,
                }
            }
        }
        Err(e) => e,
    };

    error!(
        agent_id = %agent_id,
        thread_id = %session.thread_id,
        resource_id = %session.resource_id,
        error = %failure,
        "Agent invocation failed"
    );
    let _ = tx
        .send(sse_frame("error", &json!({ "error": APOLOGY_MESSAGE })))
        .await;
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (headers, Body::from_stream(stream)).into_response()
}
