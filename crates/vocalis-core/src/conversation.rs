//! Per-session conversation state, keyed by the client-supplied session id.
//!
//! Each session owns an active role and an ordered message history seeded with the role's
//! system prompt. Entries live for the process lifetime. Every entry sits behind its own
//! `tokio::sync::Mutex`, so a turn that holds [`SessionGuard`] has exclusive use of the
//! session while other sessions proceed independently.

use crate::roles::{Role, RoleId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Author of a message in the completion history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    System,
    User,
    Assistant,
}

/// One entry of a conversation, in the shape the completion endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Speaker,
    pub content: String,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::Assistant,
            content: content.into(),
        }
    }
}

/// Active role plus ordered history of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub role: RoleId,
    pub messages: Vec<ConversationMessage>,
}

impl ConversationState {
    /// Fresh state holding only the role's system prompt.
    pub fn seeded(role: &Role) -> Self {
        Self {
            role: role.id,
            messages: vec![ConversationMessage::system(role.system_prompt.clone())],
        }
    }

    /// Messages sent to the completion call: the leading system prompt plus at most
    /// `limit` of the most recent messages. `limit == 0` returns the whole history.
    pub fn history_window(&self, limit: usize) -> Vec<ConversationMessage> {
        if limit == 0 || self.messages.len() <= limit + 1 {
            return self.messages.clone();
        }
        let mut window = Vec::with_capacity(limit + 1);
        if let Some(first) = self.messages.first().filter(|m| m.role == Speaker::System) {
            window.push(first.clone());
        }
        window.extend_from_slice(&self.messages[self.messages.len() - limit..]);
        window
    }
}

/// Aggregate counts used by the periodic statistics sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub active_sessions: usize,
    pub total_messages: usize,
    pub average_messages_per_session: f64,
}

/// Exclusive access to one session's state for the duration of a turn.
pub type SessionGuard = OwnedMutexGuard<ConversationState>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Lock the session, creating it seeded from `role` if it does not exist yet.
    /// The flag is `true` when the session was created by this call.
    async fn lock(&self, session_id: &str, role: &Role) -> (SessionGuard, bool);

    /// Current state of the session, creating it if needed.
    async fn get_or_create(&self, session_id: &str, role: &Role) -> ConversationState {
        let (guard, _) = self.lock(session_id, role).await;
        guard.clone()
    }

    /// Append one message, creating the session from `role` if it is missing.
    async fn append(&self, session_id: &str, role: &Role, message: ConversationMessage) {
        let (mut guard, _) = self.lock(session_id, role).await;
        guard.messages.push(message);
    }

    /// Replace the session with a freshly seeded state for `default_role`.
    async fn reset(&self, session_id: &str, default_role: &Role);

    /// Copy of the session's state, `None` when unknown. Never creates.
    async fn snapshot(&self, session_id: &str) -> Option<ConversationState>;

    async fn stats(&self) -> StoreStats;
}

/// Process-wide in-memory store; no persistence and no eviction.
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: DashMap<String, Arc<Mutex<ConversationState>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn lock(&self, session_id: &str, role: &Role) -> (SessionGuard, bool) {
        let mut created = false;
        // Clone the Arc out so no DashMap shard lock is held across the await.
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(ConversationState::seeded(role)))
            })
            .clone();
        if created {
            debug!("Created session {} with role {}", session_id, role.id);
        }
        (entry.lock_owned().await, created)
    }

    async fn reset(&self, session_id: &str, default_role: &Role) {
        let existing = self.sessions.get(session_id).map(|e| e.value().clone());
        match existing {
            // Wait for any in-flight turn so the reset is not overwritten by it.
            Some(entry) => *entry.lock().await = ConversationState::seeded(default_role),
            None => {
                self.sessions.insert(
                    session_id.to_string(),
                    Arc::new(Mutex::new(ConversationState::seeded(default_role))),
                );
            }
        }
    }

    async fn snapshot(&self, session_id: &str) -> Option<ConversationState> {
        let entry = self.sessions.get(session_id).map(|e| e.value().clone())?;
        let state = entry.lock().await;
        Some(state.clone())
    }

    async fn stats(&self) -> StoreStats {
        let entries: Vec<Arc<Mutex<ConversationState>>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut total_messages = 0;
        for entry in &entries {
            total_messages += entry.lock().await.messages.len();
        }
        let active_sessions = entries.len();
        let average_messages_per_session = if active_sessions == 0 {
            0.0
        } else {
            total_messages as f64 / active_sessions as f64
        };
        StoreStats {
            active_sessions,
            total_messages,
            average_messages_per_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleRegistry;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_use_seeds_with_requested_role() {
        let roles = RoleRegistry::builtin();
        let store = InMemoryConversationStore::new();
        let state = store.get_or_create("s1", roles.resolve("tech")).await;
        assert_eq!(state.role, RoleId::Tech);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Speaker::System);

        // A later reference with another role keeps the first one.
        let again = store.get_or_create("s1", roles.resolve("business")).await;
        assert_eq!(again.role, RoleId::Tech);
    }

    #[tokio::test]
    async fn test_reset_leaves_only_default_prompt() {
        let roles = RoleRegistry::builtin();
        let store = InMemoryConversationStore::new();
        let tech = roles.resolve("tech");
        for i in 0..5 {
            store
                .append("s1", tech, ConversationMessage::user(format!("msg {}", i)))
                .await;
        }
        store.reset("s1", roles.default_role()).await;
        let state = store.snapshot("s1").await.unwrap();
        assert_eq!(state.role, RoleId::Default);
        assert_eq!(
            state.messages,
            vec![ConversationMessage::system(
                roles.default_role().system_prompt.clone()
            )]
        );
    }

    #[tokio::test]
    async fn test_stats_average_is_zero_without_sessions() {
        let store = InMemoryConversationStore::new();
        let stats = store.stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.average_messages_per_session, 0.0);
    }

    #[tokio::test]
    async fn test_stats_counts_messages() {
        let roles = RoleRegistry::builtin();
        let store = InMemoryConversationStore::new();
        let role = roles.default_role();
        store.append("a", role, ConversationMessage::user("hi")).await;
        store.get_or_create("b", role).await;
        let stats = store.stats().await;
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.average_messages_per_session, 1.5);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let roles = RoleRegistry::builtin();
        let store = Arc::new(InMemoryConversationStore::new());
        let role = roles.default_role().clone();

        let (guard, created) = store.lock("s1", &role).await;
        assert!(created);

        let contender = {
            let store = store.clone();
            let role = role.clone();
            tokio::spawn(async move {
                let (mut g, created) = store.lock("s1", &role).await;
                g.messages.push(ConversationMessage::user("second"));
                created
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let mut guard = guard;
        guard.messages.push(ConversationMessage::user("first"));
        drop(guard);

        assert!(!contender.await.unwrap());
        let state = store.snapshot("s1").await.unwrap();
        assert_eq!(state.messages[1].content, "first");
        assert_eq!(state.messages[2].content, "second");
    }

    #[test]
    fn test_history_window_keeps_system_prompt() {
        let roles = RoleRegistry::builtin();
        let mut state = ConversationState::seeded(roles.default_role());
        for i in 0..6 {
            state.messages.push(ConversationMessage::user(format!("{}", i)));
        }
        assert_eq!(state.history_window(0).len(), 7);

        let windowed = state.history_window(2);
        assert_eq!(windowed.len(), 3);
        assert_eq!(windowed[0].role, Speaker::System);
        assert_eq!(windowed[1].content, "4");
        assert_eq!(windowed[2].content, "5");

        // Short histories are returned untouched.
        assert_eq!(state.history_window(10).len(), 7);
    }
}
