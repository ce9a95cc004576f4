//! Agent System
//!
//! Turns partial agent configurations into registered agent definitions,
//! resolves conversation sessions, and relays model output for a turn.

pub mod definition;
pub mod factory;
pub mod identity;
pub mod invoke;
pub mod memory;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod relay;
pub mod session;

pub use definition::*;
pub use identity::derive_identity;
pub use invoke::{InvocationRequest, Invoker, MemoryInvoker};
pub use memory::{ConversationMemory, InMemoryConversationMemory};
pub use provider::{LlmProvider, StreamEvent};
pub use registry::AgentRegistry;
pub use session::{resolve_session, SessionIds};

/// User-visible reply when a turn fails inside the model collaborator.
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error while processing your message.";

/// Agent errors
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent configuration is required")]
    ConfigurationMissing,
    #[error("invalid agent configuration: {0}")]
    InvalidConfiguration(String),
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("message is required")]
    MessageMissing,
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("missing startup configuration: {0}")]
    StartupConfigurationMissing(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("cancelled")]
    Cancelled,
}

impl AgentError {
    /// Whether the error was caused by caller input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AgentError::ConfigurationMissing
                | AgentError::InvalidConfiguration(_)
                | AgentError::AgentNotFound(_)
                | AgentError::MessageMissing
        )
    }
}
