//! OpenAI-compatible LLM provider.
//!
//! Streams `/v1/chat/completions` responses over SSE and forwards text
//! deltas as `StreamEvent`s. The SSE processing here is shared with the
//! Ollama provider, which exposes the same endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::provider::*;
use crate::agent::AgentError;

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// OpenAI LLM provider.
#[derive(Debug)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider. The API key must be non-empty.
    pub fn new(api_key: String) -> Result<Self, AgentError> {
        if api_key.trim().is_empty() {
            return Err(AgentError::Provider("OpenAI API key is empty".to_string()));
        }
        Ok(Self {
            client: build_http_client(std::time::Duration::from_secs(300))?,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key,
        })
    }

    /// Override the base URL (for proxies or compatible endpoints).
    ///
    /// Only `https` is accepted since the API key is sent on every request.
    pub fn with_base_url(mut self, url: String) -> Result<Self, AgentError> {
        let parsed = url::Url::parse(&url)
            .map_err(|e| AgentError::InvalidBaseUrl(format!("invalid URL \"{url}\": {e}")))?;
        if parsed.scheme() != "https" {
            return Err(AgentError::InvalidBaseUrl(format!(
                "base URL must use https scheme, got \"{}\"",
                parsed.scheme()
            )));
        }
        self.base_url = normalize_base_url(&url);
        Ok(self)
    }

    /// Returns the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
        let body = build_body(&request);
        stream_chat_completions(
            &self.client,
            &self.base_url,
            Some(self.api_key.as_str()),
            body,
            cancel_token,
        )
        .await
    }
}

pub(crate) fn build_http_client(
    timeout: std::time::Duration,
) -> Result<reqwest::Client, AgentError> {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| AgentError::Provider(format!("failed to build HTTP client: {e}")))
}

/// Strip a trailing slash and a trailing `/v1` so paths can be joined uniformly.
pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}

/// Build the JSON body for the chat completions endpoint.
pub(crate) fn build_body(request: &CompletionRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);

    if let Some(ref system) = request.system {
        messages.push(json!({
            "role": "system",
            "content": system,
        }));
    }

    for msg in &request.messages {
        messages.push(json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }));
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
        "max_completion_tokens": request.max_tokens,
    });

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    body
}

/// POST a streaming chat completion and spawn a task that forwards the SSE
/// stream as `StreamEvent`s.
pub(crate) async fn stream_chat_completions(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    body: Value,
    cancel_token: CancellationToken,
) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
    if cancel_token.is_cancelled() {
        return Err(AgentError::Cancelled);
    }
    let url = format!("{base_url}/v1/chat/completions");

    let mut http_request = client
        .post(&url)
        .header("content-type", "application/json")
        .header("accept", "text/event-stream");
    if let Some(key) = api_key {
        http_request = http_request.header("authorization", format!("Bearer {key}"));
    }

    let response = tokio::select! {
        _ = cancel_token.cancelled() => {
            return Err(AgentError::Cancelled);
        }
        response = http_request.json(&body).send() => {
            response.map_err(|e| AgentError::Provider(format!("HTTP request failed: {e}")))?
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());
        return Err(AgentError::Provider(format!(
            "chat completions returned {status}: {body}"
        )));
    }

    let (tx, rx) = mpsc::channel(64);
    let stream = response.bytes_stream();
    tokio::spawn(async move {
        if let Err(e) = process_sse_stream(stream, &tx, &cancel_token).await {
            let _ = tx
                .send(StreamEvent::Error {
                    message: e.to_string(),
                })
                .await;
        }
    });

    Ok(rx)
}

/// Outcome of decoding one SSE `data:` payload.
#[derive(Debug, Default, PartialEq)]
struct ChunkOutcome {
    text: Option<String>,
    finish: Option<StopReason>,
    usage: Option<TokenUsage>,
}

fn parse_chunk(payload: &str) -> Result<ChunkOutcome, AgentError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| AgentError::Provider(format!("malformed stream chunk: {e}")))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(AgentError::Provider(message));
    }

    let choice = value.get("choices").and_then(|c| c.get(0));
    let text = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let finish = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|f| f.as_str())
        .map(|reason| match reason {
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        });
    let usage = value
        .get("usage")
        .filter(|u| u.is_object())
        .map(|u| TokenUsage {
            input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            output_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        });

    Ok(ChunkOutcome {
        text,
        finish,
        usage,
    })
}

/// Read an SSE byte stream and forward text deltas until `[DONE]`.
///
/// A stream that ends before `[DONE]` without a finish reason is an error.
pub(crate) async fn process_sse_stream<S, E>(
    stream: S,
    tx: &mpsc::Sender<StreamEvent>,
    cancel_token: &CancellationToken,
) -> Result<(), AgentError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();
    let mut finish: Option<StopReason> = None;
    let mut usage = TokenUsage::default();

    loop {
        let chunk = tokio::select! {
            _ = cancel_token.cancelled() => return Err(AgentError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk.map_err(|e| AgentError::Provider(format!("stream read failed: {e}")))?;
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(payload) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                send_stop(tx, finish.unwrap_or(StopReason::EndTurn), usage).await;
                return Ok(());
            }

            let outcome = parse_chunk(payload)?;
            if let Some(u) = outcome.usage {
                usage = u;
            }
            if outcome.finish.is_some() {
                finish = outcome.finish;
            }
            if let Some(text) = outcome.text {
                if tx.send(StreamEvent::TextDelta { text }).await.is_err() {
                    debug!("stream receiver dropped, abandoning SSE stream");
                    return Ok(());
                }
            }
        }
    }

    match finish {
        Some(reason) => {
            send_stop(tx, reason, usage).await;
            Ok(())
        }
        None => Err(AgentError::Provider(
            "stream ended before completion".to_string(),
        )),
    }
}

async fn send_stop(tx: &mpsc::Sender<StreamEvent>, reason: StopReason, usage: TokenUsage) {
    let _ = tx.send(StreamEvent::Stop { reason, usage }).await;
}
