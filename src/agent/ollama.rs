//! Ollama LLM provider for local model inference.
//!
//! Uses Ollama's OpenAI-compatible `/v1/chat/completions` endpoint, so the
//! body construction and SSE streaming in `openai.rs` are reused. The
//! differences from the OpenAI provider are:
//!
//! - Default base URL is `http://localhost:11434` (local Ollama server)
//! - No API key is required by default (local inference)
//! - HTTP (not just HTTPS) is allowed for base URLs
//! - Model names are passed through after stripping the `ollama:` or `ollama/` prefix

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::openai::{
    build_body, build_http_client, normalize_base_url, stream_chat_completions,
};
use crate::agent::provider::*;
use crate::agent::AgentError;

/// Default Ollama base URL (local server).
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Ollama LLM provider.
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the default base URL.
    pub fn new() -> Result<Self, AgentError> {
        Ok(Self {
            // local inference can be slow
            client: build_http_client(std::time::Duration::from_secs(600))?,
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            api_key: None,
        })
    }

    /// Set a custom base URL for the Ollama server.
    ///
    /// Both `http` and `https` schemes are accepted since Ollama is typically
    /// run locally over plain HTTP.
    pub fn with_base_url(mut self, url: String) -> Result<Self, AgentError> {
        let parsed = url::Url::parse(&url)
            .map_err(|e| AgentError::InvalidBaseUrl(format!("invalid URL \"{url}\": {e}")))?;
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(AgentError::InvalidBaseUrl(format!(
                "base URL must use http or https scheme, got \"{scheme}\""
            )));
        }
        self.base_url = normalize_base_url(&url);
        Ok(self)
    }

    /// Set an optional API key for remote Ollama instances that require auth.
    pub fn with_api_key(mut self, api_key: String) -> Self {
        if api_key.trim().is_empty() {
            self.api_key = None;
        } else {
            self.api_key = Some(api_key);
        }
        self
    }

    /// Returns the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check connectivity to the Ollama server and return available models.
    ///
    /// Calls `GET /api/tags` which lists all locally available models.
    pub async fn check_connectivity(&self) -> Result<Vec<String>, AgentError> {
        let url = format!("{}/api/tags", self.base_url);

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("Ollama connectivity check failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            return Err(AgentError::Provider(format!(
                "Ollama /api/tags returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("failed to parse Ollama response: {e}")))?;

        Ok(model_names(&body))
    }
}

fn model_names(tags: &Value) -> Vec<String> {
    tags.get("models")
        .and_then(|m| m.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
        let body = build_body(&request);
        stream_chat_completions(
            &self.client,
            &self.base_url,
            self.api_key.as_deref(),
            body,
            cancel_token,
        )
        .await
    }
}

/// Determine whether a model identifier should route to the Ollama provider.
///
/// Models starting with `ollama:` or `ollama/` are routed to Ollama.
pub fn is_ollama_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.starts_with("ollama:") || lower.starts_with("ollama/")
}

/// Strip the `ollama:` or `ollama/` prefix from a model name.
///
/// If the model doesn't have the prefix, it is returned unchanged.
pub fn strip_ollama_prefix(model: &str) -> &str {
    if is_ollama_model(model) {
        // the prefix is ASCII, so byte 7 is a char boundary
        &model["ollama:".len()..]
    } else {
        model
    }
}
