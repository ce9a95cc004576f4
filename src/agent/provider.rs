//! LLM provider trait and common types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentError;

/// Default output token cap for a single reply.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A streaming event from the LLM.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text output.
    TextDelta { text: String },

    /// The model finished its turn.
    Stop {
        reason: StopReason,
        usage: TokenUsage,
    },

    /// Unrecoverable error from the provider.
    Error { message: String },
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
}

/// Token counts for a single LLM response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A request to the LLM.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

/// A message in the LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message in the LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

impl LlmRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }
}

/// Trait for LLM providers (OpenAI, Ollama, etc.).
///
/// Implementations send a completion request and return a channel that
/// yields streaming events until the model stops or errors.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError>;
}

/// A provider that dispatches to OpenAI or Ollama based on the model
/// identifier in the request.
pub struct MultiProvider {
    openai: Option<Arc<dyn LlmProvider>>,
    ollama: Option<Arc<dyn LlmProvider>>,
}

impl std::fmt::Debug for MultiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProvider")
            .field("openai", &self.openai.is_some())
            .field("ollama", &self.ollama.is_some())
            .finish()
    }
}

impl MultiProvider {
    /// Create a new multi-provider dispatcher.
    pub fn new(openai: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            openai,
            ollama: None,
        }
    }

    /// Set the Ollama provider for local model inference.
    pub fn with_ollama(mut self, ollama: Option<Arc<dyn LlmProvider>>) -> Self {
        self.ollama = ollama;
        self
    }

    /// Returns `true` if at least one provider is configured.
    pub fn has_any_provider(&self) -> bool {
        self.openai.is_some() || self.ollama.is_some()
    }

    /// Models prefixed with `ollama:` or `ollama/` go to Ollama, everything
    /// else to the OpenAI-compatible endpoint.
    fn select_provider(&self, model: &str) -> Result<&dyn LlmProvider, AgentError> {
        if crate::agent::ollama::is_ollama_model(model) {
            self.ollama.as_deref().ok_or_else(|| {
                AgentError::Provider(format!(
                    "model \"{model}\" requires Ollama provider, but Ollama is not configured"
                ))
            })
        } else {
            self.openai.as_deref().ok_or_else(|| {
                AgentError::Provider(format!(
                    "model \"{model}\" requires OpenAI provider, but no OPENAI_API_KEY is configured"
                ))
            })
        }
    }
}

#[async_trait]
impl LlmProvider for MultiProvider {
    async fn complete(
        &self,
        mut request: CompletionRequest,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
        let provider = self.select_provider(&request.model)?;

        // Ollama expects the bare model name (e.g. "llama3").
        if crate::agent::ollama::is_ollama_model(&request.model) {
            request.model = crate::agent::ollama::strip_ollama_prefix(&request.model).to_string();
        }

        provider.complete(request, cancel_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the model it was asked for and replies with one stop event.
    #[derive(Default)]
    struct RecordingProvider {
        models: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
            _cancel_token: CancellationToken,
        ) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
            self.models.lock().push(request.model);
            let (tx, rx) = mpsc::channel(1);
            let _ = tx
                .send(StreamEvent::Stop {
                    reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                })
                .await;
            Ok(rx)
        }
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![LlmMessage::user("hi")],
            system: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    fn error_of(result: Result<&dyn LlmProvider, AgentError>) -> String {
        match result {
            Err(e) => e.to_string(),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_multi_provider_has_any_provider() {
        let empty = MultiProvider::new(None);
        assert!(!empty.has_any_provider());

        let with_openai = MultiProvider::new(Some(Arc::new(RecordingProvider::default())));
        assert!(with_openai.has_any_provider());

        let with_ollama =
            MultiProvider::new(None).with_ollama(Some(Arc::new(RecordingProvider::default())));
        assert!(with_ollama.has_any_provider());
    }

    #[test]
    fn test_multi_provider_select_openai_model() {
        let provider = MultiProvider::new(None);
        let msg = error_of(provider.select_provider("gpt-4o-mini"));
        assert!(msg.contains("OpenAI"), "expected OpenAI in error: {msg}");
    }

    #[test]
    fn test_multi_provider_select_ollama_model() {
        let provider = MultiProvider::new(None);
        let msg = error_of(provider.select_provider("ollama/mistral"));
        assert!(msg.contains("Ollama"), "expected Ollama in error: {msg}");
    }

    #[tokio::test]
    async fn test_multi_provider_strips_ollama_prefix() {
        let ollama = Arc::new(RecordingProvider::default());
        let openai = Arc::new(RecordingProvider::default());
        let provider = MultiProvider::new(Some(openai.clone() as Arc<dyn LlmProvider>))
            .with_ollama(Some(ollama.clone() as Arc<dyn LlmProvider>));

        provider
            .complete(request("ollama:llama3"), CancellationToken::new())
            .await
            .unwrap();
        provider
            .complete(request("gpt-4o"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*ollama.models.lock(), vec!["llama3".to_string()]);
        assert_eq!(*openai.models.lock(), vec!["gpt-4o".to_string()]);
    }

    #[test]
    fn test_multi_provider_debug_lists_backends() {
        let provider = MultiProvider::new(None);
        let debug = format!("{:?}", provider);
        assert!(debug.contains("openai"));
        assert!(debug.contains("ollama"));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(LlmRole::User.as_str(), "user");
        assert_eq!(LlmRole::Assistant.as_str(), "assistant");
    }
}
