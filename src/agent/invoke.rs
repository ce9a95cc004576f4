//! Invocation of an agent turn.
//!
//! `Invoker` is the seam between request handling and the model: it takes
//! the system prompt, the message, the session ids and the memory bound, and
//! returns a channel of stream events. `MemoryInvoker` implements it on top
//! of an `LlmProvider` and a `ConversationMemory`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::definition::AgentDefinition;
use super::memory::ConversationMemory;
use super::provider::{
    CompletionRequest, LlmMessage, LlmProvider, StreamEvent, DEFAULT_MAX_TOKENS,
};
use super::session::SessionIds;
use super::AgentError;

/// Everything the model collaborator receives for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub model: String,
    pub system_prompt: String,
    pub message: String,
    pub session: SessionIds,
    pub memory_limit: usize,
}

impl InvocationRequest {
    pub fn for_agent(
        definition: &AgentDefinition,
        message: impl Into<String>,
        session: SessionIds,
    ) -> Self {
        Self {
            model: definition.model().to_string(),
            system_prompt: definition.system_prompt().to_string(),
            message: message.into(),
            session,
            memory_limit: definition.max_memory_messages().get(),
        }
    }
}

/// Runs one agent turn and streams its output.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        request: InvocationRequest,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError>;
}

/// Invoker that replays remembered turns to the provider and records the
/// completed turn afterwards.
pub struct MemoryInvoker {
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn ConversationMemory>,
    max_tokens: u32,
}

impl MemoryInvoker {
    pub fn new(provider: Arc<dyn LlmProvider>, memory: Arc<dyn ConversationMemory>) -> Self {
        Self {
            provider,
            memory,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Cap on generated tokens per reply.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Invoker for MemoryInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, AgentError> {
        let mut messages = self
            .memory
            .recall(&request.session, request.memory_limit)
            .await?;
        debug!(
            thread_id = %request.session.thread_id,
            resource_id = %request.session.resource_id,
            recalled = messages.len(),
            "Recalled conversation history"
        );
        messages.push(LlmMessage::user(request.message.clone()));

        let completion = CompletionRequest {
            model: request.model.clone(),
            messages,
            system: Some(request.system_prompt.clone()),
            max_tokens: self.max_tokens,
            temperature: None,
        };
        let mut upstream = self.provider.complete(completion, cancel_token).await?;

        let (tx, rx) = mpsc::channel(64);
        let memory = Arc::clone(&self.memory);
        tokio::spawn(async move {
            let mut reply = String::new();
            while let Some(event) = upstream.recv().await {
                match &event {
                    StreamEvent::TextDelta { text } => reply.push_str(text),
                    StreamEvent::Stop { .. } => {
                        // Record before forwarding Stop so the caller's next
                        // turn already sees this one.
                        let turn = vec![
                            LlmMessage::user(request.message.clone()),
                            LlmMessage::assistant(std::mem::take(&mut reply)),
                        ];
                        if let Err(e) = memory.remember(&request.session, turn).await {
                            warn!(
                                thread_id = %request.session.thread_id,
                                error = %e,
                                "Failed to record conversation turn"
                            );
                        }
                    }
                    StreamEvent::Error { .. } => {}
                }
                let terminal = !matches!(event, StreamEvent::TextDelta { .. });
                if tx.send(event).await.is_err() {
                    debug!("invocation consumer dropped");
                    return;
                }
                if terminal {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
