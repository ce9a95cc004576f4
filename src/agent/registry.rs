//! Agent Registry
//!
//! In-process store mapping identities to agent definitions. Owned by the
//! application and shared by handle; nothing is persisted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::definition::{normalize, AgentConfig, AgentDefinition};
use super::AgentError;

/// Registry of agent definitions keyed by identity.
///
/// Writes replace a whole entry under the write lock, so readers see either
/// the old definition or the new one.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentDefinition>>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition, replacing any entry at the same identity.
    pub fn register(&self, identity: impl Into<String>, definition: AgentDefinition) {
        self.insert(identity.into(), Arc::new(definition));
    }

    /// Normalize a configuration and register it under its derived identity.
    pub fn create(&self, config: &AgentConfig) -> Arc<AgentDefinition> {
        let definition = Arc::new(normalize(config));
        self.insert(definition.identity().to_string(), Arc::clone(&definition));
        definition
    }

    fn insert(&self, identity: String, definition: Arc<AgentDefinition>) {
        let replaced = self
            .agents
            .write()
            .insert(identity.clone(), definition)
            .is_some();
        if replaced {
            info!(agent_id = %identity, "Replaced agent definition");
        } else {
            info!(agent_id = %identity, "Registered agent");
        }
    }

    /// Look up a definition by identity.
    pub fn resolve(&self, identity: &str) -> Result<Arc<AgentDefinition>, AgentError> {
        let found = self.agents.read().get(identity).cloned();
        match found {
            Some(def) => Ok(def),
            None => {
                debug!(agent_id = %identity, "Agent lookup missed");
                Err(AgentError::AgentNotFound(identity.to_string()))
            }
        }
    }

    /// Whether an identity is registered
    pub fn contains(&self, identity: &str) -> bool {
        self.agents.read().contains_key(identity)
    }

    /// All definitions, sorted by identity
    pub fn list(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<_> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.identity().cmp(b.identity()));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}
