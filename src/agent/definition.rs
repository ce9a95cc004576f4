//! Agent configuration and normalized agent definitions.
//!
//! `AgentConfig` is what callers send: every field optional. `normalize`
//! fills each missing or blank field from its default and composes the
//! system prompt, producing an `AgentDefinition` that never changes after
//! construction.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::identity::derive_identity;

/// Display name used when none is supplied.
pub const DEFAULT_AGENT_NAME: &str = "Base Agent";
/// Instructions used when none are supplied.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";
/// Tone used when none is supplied.
pub const DEFAULT_PERSONALITY: &str = "neutral";
/// Model used when none is supplied.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Conversation history bound used when none is supplied.
pub const DEFAULT_MAX_MEMORY_MESSAGES: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// Partial agent configuration as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Behavior guideline placed first in the system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Tone descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    /// Model identifier, also selects the provider backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Bound on remembered conversation messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_messages: Option<NonZeroUsize>,
}

impl AgentConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_memory_messages(mut self, max: NonZeroUsize) -> Self {
        self.max_memory_messages = Some(max);
        self
    }
}

/// A fully normalized agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    identity: String,
    name: String,
    instructions: String,
    personality: String,
    model: String,
    max_memory_messages: NonZeroUsize,
    system_prompt: String,
}

impl AgentDefinition {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn personality(&self) -> &str {
        &self.personality
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_memory_messages(&self) -> NonZeroUsize {
        self.max_memory_messages
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Caller-facing view of the normalized configuration.
    pub fn view(&self) -> AgentView {
        AgentView {
            identity: self.identity.clone(),
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            personality: self.personality.clone(),
            model: self.model.clone(),
            max_memory_messages: self.max_memory_messages,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

/// Serializable snapshot of an `AgentDefinition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub identity: String,
    pub name: String,
    pub instructions: String,
    pub personality: String,
    pub model: String,
    pub max_memory_messages: NonZeroUsize,
    pub system_prompt: String,
}

/// Normalize a partial configuration into a complete definition.
///
/// Never fails: blank fields are treated exactly like absent ones. The
/// identity is derived from the supplied name, not the defaulted one, so an
/// unnamed agent receives a generated identity.
pub fn normalize(raw: &AgentConfig) -> AgentDefinition {
    let name = or_default(raw.name.as_deref(), DEFAULT_AGENT_NAME);
    let instructions = or_default(raw.instructions.as_deref(), DEFAULT_INSTRUCTIONS);
    let personality = or_default(raw.personality.as_deref(), DEFAULT_PERSONALITY);
    let model = or_default(raw.model.as_deref(), DEFAULT_MODEL);

    AgentDefinition {
        identity: derive_identity(raw.name.as_deref()),
        system_prompt: compose_system_prompt(&name, &instructions, &personality),
        name,
        instructions,
        personality,
        model,
        max_memory_messages: raw
            .max_memory_messages
            .unwrap_or(DEFAULT_MAX_MEMORY_MESSAGES),
    }
}

/// Compose the system prompt. Instructions always come first, then the name
/// line, then the tone line; the result is trimmed.
pub fn compose_system_prompt(name: &str, instructions: &str, personality: &str) -> String {
    format!("{instructions}\nYour name is {name}.\nPlease respond in a {personality} tone.")
        .trim()
        .to_string()
}

fn or_default(value: Option<&str>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}
