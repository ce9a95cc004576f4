//! Conversation memory.
//!
//! Prior turns keyed by (thread id, resource id). Callers ask for at most
//! `limit` of the most recent messages; retention beyond that is up to the
//! store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::provider::LlmMessage;
use super::session::SessionIds;
use super::AgentError;

/// Per-conversation cap for the in-process store.
pub const DEFAULT_RETAINED_MESSAGES: usize = 1000;
/// Number of conversations the in-process store keeps before evicting the
/// least recently used one.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Storage for prior conversation turns.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// The most recent `limit` messages for a session, oldest first.
    async fn recall(&self, session: &SessionIds, limit: usize)
        -> Result<Vec<LlmMessage>, AgentError>;

    /// Append messages to a session's history.
    async fn remember(
        &self,
        session: &SessionIds,
        messages: Vec<LlmMessage>,
    ) -> Result<(), AgentError>;
}

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<LlmMessage>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Threads {
    conversations: HashMap<SessionIds, Conversation>,
    clock: u64,
}

impl Threads {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .conversations
            .iter()
            .min_by_key(|(_, c)| c.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!(
                thread_id = %key.thread_id,
                resource_id = %key.resource_id,
                "Evicting least recently used conversation"
            );
            self.conversations.remove(&key);
        }
    }
}

/// Process-local memory; lost on restart. Bounded both per conversation
/// and in the number of conversations held.
#[derive(Debug)]
pub struct InMemoryConversationMemory {
    threads: Mutex<Threads>,
    max_retained: usize,
    max_sessions: usize,
}

impl Default for InMemoryConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationMemory {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RETAINED_MESSAGES, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_max_retained(max_retained: usize) -> Self {
        Self::with_limits(max_retained, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(max_retained: usize, max_sessions: usize) -> Self {
        Self {
            threads: Mutex::new(Threads::default()),
            max_retained: max_retained.max(1),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Number of messages held for a session
    pub fn message_count(&self, session: &SessionIds) -> usize {
        self.threads
            .lock()
            .conversations
            .get(session)
            .map_or(0, |c| c.messages.len())
    }

    /// Number of conversations currently held
    pub fn session_count(&self) -> usize {
        self.threads.lock().conversations.len()
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationMemory {
    async fn recall(
        &self,
        session: &SessionIds,
        limit: usize,
    ) -> Result<Vec<LlmMessage>, AgentError> {
        let mut threads = self.threads.lock();
        let now = threads.tick();
        let Some(conversation) = threads.conversations.get_mut(session) else {
            return Ok(Vec::new());
        };
        conversation.last_used = now;
        let start = conversation.messages.len().saturating_sub(limit);
        Ok(conversation.messages[start..].to_vec())
    }

    async fn remember(
        &self,
        session: &SessionIds,
        messages: Vec<LlmMessage>,
    ) -> Result<(), AgentError> {
        let mut threads = self.threads.lock();
        let now = threads.tick();
        if !threads.conversations.contains_key(session)
            && threads.conversations.len() >= self.max_sessions
        {
            threads.evict_least_recent();
        }
        let conversation = threads.conversations.entry(session.clone()).or_default();
        conversation.last_used = now;
        conversation.messages.extend(messages);
        if conversation.messages.len() > self.max_retained {
            let excess = conversation.messages.len() - self.max_retained;
            conversation.messages.drain(..excess);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(thread: &str, resource: &str) -> SessionIds {
        SessionIds {
            thread_id: thread.to_string(),
            resource_id: resource.to_string(),
        }
    }

    #[tokio::test]
    async fn test_recall_unknown_session_is_empty() {
        let memory = InMemoryConversationMemory::new();
        let recalled = memory.recall(&session("t", "r"), 10).await.unwrap();
        assert!(recalled.is_empty());
    }

    #[tokio::test]
    async fn test_recall_returns_most_recent_in_order() {
        let memory = InMemoryConversationMemory::new();
        let s = session("t", "r");
        memory
            .remember(
                &s,
                vec![
                    LlmMessage::user("one"),
                    LlmMessage::assistant("two"),
                    LlmMessage::user("three"),
                ],
            )
            .await
            .unwrap();

        let recalled = memory.recall(&s, 2).await.unwrap();
        assert_eq!(
            recalled,
            vec![LlmMessage::assistant("two"), LlmMessage::user("three")]
        );
        assert_eq!(memory.recall(&s, 0).await.unwrap().len(), 0);
        assert_eq!(memory.recall(&s, 50).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_by_both_ids() {
        let memory = InMemoryConversationMemory::new();
        memory
            .remember(&session("t", "alice"), vec![LlmMessage::user("hi")])
            .await
            .unwrap();
        assert!(memory
            .recall(&session("t", "bob"), 10)
            .await
            .unwrap()
            .is_empty());
        assert!(memory
            .recall(&session("other", "alice"), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retention_cap_drops_oldest() {
        let memory = InMemoryConversationMemory::with_max_retained(3);
        let s = session("t", "r");
        for i in 0..5 {
            memory
                .remember(&s, vec![LlmMessage::user(format!("m{i}"))])
                .await
                .unwrap();
        }
        assert_eq!(memory.message_count(&s), 3);
        let recalled = memory.recall(&s, 10).await.unwrap();
        assert_eq!(recalled[0].content, "m2");
        assert_eq!(recalled[2].content, "m4");
    }

    #[tokio::test]
    async fn test_session_cap_evicts_least_recently_used() {
        let memory = InMemoryConversationMemory::with_limits(10, 3);
        let sessions: Vec<SessionIds> = (0..3)
            .map(|i| session(&format!("t{i}"), "r"))
            .collect();
        for s in &sessions {
            memory
                .remember(s, vec![LlmMessage::user("hi")])
                .await
                .unwrap();
        }
        // touching t0 makes t1 the least recently used
        memory.recall(&sessions[0], 10).await.unwrap();

        memory
            .remember(&session("t3", "r"), vec![LlmMessage::user("new")])
            .await
            .unwrap();

        assert_eq!(memory.session_count(), 3);
        assert_eq!(memory.message_count(&sessions[0]), 1);
        assert_eq!(memory.message_count(&sessions[1]), 0);
        assert_eq!(memory.message_count(&sessions[2]), 1);
        assert_eq!(memory.message_count(&session("t3", "r")), 1);
    }

    #[tokio::test]
    async fn test_one_shot_sessions_stay_bounded() {
        let memory = InMemoryConversationMemory::with_limits(10, 100);
        for _ in 0..500 {
            let s = crate::agent::session::resolve_session(None, None);
            memory
                .remember(&s, vec![LlmMessage::user("hello")])
                .await
                .unwrap();
        }
        assert_eq!(memory.session_count(), 100);
    }
}
